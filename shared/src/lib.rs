use serde::{Deserialize, Serialize};

/// Largest client command payload the server accepts, in bytes.
pub const MAX_INPUT_LENGTH: usize = 512;
pub const DEFAULT_PLAYGROUND_WIDTH: u8 = 40;
pub const DEFAULT_PLAYGROUND_HEIGHT: u8 = 28;

/// Messages sent from the server to a client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    /// First packet after admission, carries the id assigned inside the pool.
    ConnId {
        id: u16,
    },
    Rejected {
        reason: String,
    },

    /// Pool-wide state, broadcast to every member of the pool.
    Playground {
        tick: u32,
        width: u8,
        height: u8,
        snakes: Vec<SnakeView>,
        food: Vec<Dot>,
    },

    // Private, per-player messages
    Notice {
        message: String,
    },
    Pong {
        nonce: u64,
    },
    Error {
        message: String,
    },
}

impl Packet {
    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn decode(data: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(data)
    }
}

/// Commands sent from a client to its player.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Turn(Direction),
    Ping { nonce: u64 },
}

impl Command {
    pub fn encode(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn decode(data: &[u8]) -> bincode::Result<Self> {
        bincode::deserialize(data)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    North,
    East,
    South,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::East => Direction::West,
            Direction::South => Direction::North,
            Direction::West => Direction::East,
        }
    }
}

/// A single cell on the playground.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dot {
    pub x: u8,
    pub y: u8,
}

impl Dot {
    pub fn new(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// Moves one cell in `dir`, wrapping around the playground edges.
    pub fn step(self, dir: Direction, width: u8, height: u8) -> Dot {
        let (w, h) = (width as i16, height as i16);
        let (dx, dy) = match dir {
            Direction::North => (0, -1),
            Direction::East => (1, 0),
            Direction::South => (0, 1),
            Direction::West => (-1, 0),
        };
        let x = (self.x as i16 + dx).rem_euclid(w);
        let y = (self.y as i16 + dy).rem_euclid(h);
        Dot::new(x as u8, y as u8)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SnakeView {
    pub id: u32,
    pub head: Dot,
    pub direction: Direction,
    pub score: u32,
}
