//! Game collaborators consumed by the pool core, plus the stub snake
//! playground used by the server binary.
//!
//! The core only depends on the two capabilities below. Any game variant can
//! back a pool as long as it implements both.

use crate::error::GameError;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{Command, Direction, Dot, Packet, SnakeView};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Capacity of a player's private output queue.
pub const PLAYER_OUTPUT_BUFFER: usize = 32;

/// Pool-wide state polled by the broadcast scheduler once per tick.
pub trait SharedState: Send + Sync {
    /// Returns true if the state changed since the last call.
    fn updated(&self) -> bool;

    fn serialize(&self) -> Result<Vec<u8>, GameError>;
}

/// Starts private per-player work bound to a cancellation scope.
///
/// The returned queue carries messages meant for one player only. The
/// provider must stop sending promptly once `token` is cancelled.
pub trait PlayerProvider: Send + Sync {
    fn start_player(
        &self,
        token: CancellationToken,
        input: mpsc::Receiver<Vec<u8>>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, GameError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PlaygroundConfig {
    pub width: u8,
    pub height: u8,
    /// Interval between world updates
    pub tick: Duration,
    /// Number of food cells kept on the playground
    pub food: usize,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            width: shared::DEFAULT_PLAYGROUND_WIDTH,
            height: shared::DEFAULT_PLAYGROUND_HEIGHT,
            tick: Duration::from_millis(150),
            food: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct Snake {
    head: Dot,
    direction: Direction,
    score: u32,
}

struct World {
    tick: u32,
    width: u8,
    height: u8,
    snakes: HashMap<u32, Snake>,
    food: Vec<Dot>,
    food_target: usize,
    next_snake_id: u32,
    rng: StdRng,
}

impl World {
    fn new(config: &PlaygroundConfig) -> Self {
        let mut world = Self {
            tick: 0,
            width: config.width,
            height: config.height,
            snakes: HashMap::new(),
            food: Vec::new(),
            food_target: config.food,
            next_snake_id: 1,
            rng: StdRng::from_entropy(),
        };
        world.refill_food();
        world
    }

    fn is_occupied(&self, dot: Dot) -> bool {
        self.food.contains(&dot) || self.snakes.values().any(|s| s.head == dot)
    }

    fn free_cell(&mut self) -> Option<Dot> {
        for _ in 0..16 {
            let dot = Dot::new(
                self.rng.gen_range(0..self.width),
                self.rng.gen_range(0..self.height),
            );
            if !self.is_occupied(dot) {
                return Some(dot);
            }
        }

        // Crowded playground, fall back to a scan
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| Dot::new(x, y)))
            .find(|dot| !self.is_occupied(*dot))
    }

    fn refill_food(&mut self) {
        while self.food.len() < self.food_target {
            match self.free_cell() {
                Some(dot) => self.food.push(dot),
                None => break,
            }
        }
    }

    fn spawn_snake(&mut self) -> Option<u32> {
        let head = self.free_cell()?;
        let direction = Direction::ALL[self.rng.gen_range(0..Direction::ALL.len())];

        let id = self.next_snake_id;
        self.next_snake_id = self.next_snake_id.wrapping_add(1);
        self.snakes.insert(
            id,
            Snake {
                head,
                direction,
                score: 0,
            },
        );

        info!("Added snake {} at ({}, {})", id, head.x, head.y);
        Some(id)
    }

    fn remove_snake(&mut self, id: u32) {
        if self.snakes.remove(&id).is_some() {
            info!("Removed snake {}", id);
        }
    }

    /// Moves every snake one cell and feeds the ones that reach food.
    /// Returns true if anything visible changed.
    fn advance(&mut self) -> bool {
        self.tick = self.tick.wrapping_add(1);

        if self.snakes.is_empty() {
            return false;
        }

        let (width, height) = (self.width, self.height);
        for snake in self.snakes.values_mut() {
            snake.head = snake.head.step(snake.direction, width, height);

            if let Some(pos) = self.food.iter().position(|f| *f == snake.head) {
                self.food.swap_remove(pos);
                snake.score += 1;
            }
        }

        self.refill_food();
        true
    }

    fn turn(&mut self, id: u32, direction: Direction) -> Packet {
        match self.snakes.get_mut(&id) {
            Some(snake) if snake.direction.opposite() == direction => Packet::Error {
                message: "cannot turn back".to_string(),
            },
            Some(snake) => {
                snake.direction = direction;
                Packet::Notice {
                    message: format!("turned {:?}", direction),
                }
            }
            None => Packet::Error {
                message: "snake is gone".to_string(),
            },
        }
    }

    fn to_packet(&self) -> Packet {
        let mut snakes: Vec<SnakeView> = self
            .snakes
            .iter()
            .map(|(id, snake)| SnakeView {
                id: *id,
                head: snake.head,
                direction: snake.direction,
                score: snake.score,
            })
            .collect();
        snakes.sort_by_key(|s| s.id);

        Packet::Playground {
            tick: self.tick,
            width: self.width,
            height: self.height,
            snakes,
            food: self.food.clone(),
        }
    }
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    // A panicked player task must not take the whole pool down with it
    world.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stub snake game backing one pool.
///
/// A background loop moves every snake once per game tick until the pool
/// scope is cancelled. Players steer their snake with [`Command::Turn`].
pub struct Playground {
    world: Arc<Mutex<World>>,
    updated: Arc<AtomicBool>,
    config: PlaygroundConfig,
}

impl Playground {
    /// Validates the config and starts the world loop bound to `token`.
    pub fn start(
        token: CancellationToken,
        config: PlaygroundConfig,
    ) -> Result<Arc<Self>, GameError> {
        if token.is_cancelled() {
            return Err(GameError::Cancelled);
        }
        if config.width == 0 || config.height == 0 {
            return Err(GameError::InvalidPlayground {
                width: config.width,
                height: config.height,
            });
        }

        let playground = Arc::new(Self {
            world: Arc::new(Mutex::new(World::new(&config))),
            updated: Arc::new(AtomicBool::new(true)),
            config,
        });

        let world = Arc::clone(&playground.world);
        let updated = Arc::clone(&playground.updated);
        tokio::spawn(async move {
            let mut ticker = interval(config.tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            // Skip the first tick since it fires immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if lock(&world).advance() {
                            updated.store(true, Ordering::Release);
                        }
                    }
                }
            }

            info!("Finishing game");
        });

        info!(
            "Game was started on {}x{} playground",
            config.width, config.height
        );
        Ok(playground)
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn snake_count(&self) -> usize {
        lock(&self.world).snakes.len()
    }
}

impl SharedState for Playground {
    fn updated(&self) -> bool {
        self.updated.swap(false, Ordering::AcqRel)
    }

    fn serialize(&self) -> Result<Vec<u8>, GameError> {
        let packet = lock(&self.world).to_packet();
        Ok(packet.encode()?)
    }
}

impl PlayerProvider for Playground {
    fn start_player(
        &self,
        token: CancellationToken,
        mut input: mpsc::Receiver<Vec<u8>>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, GameError> {
        if token.is_cancelled() {
            return Err(GameError::PlayerCancelled);
        }

        let id = lock(&self.world).spawn_snake().ok_or(GameError::NoRoom)?;
        self.updated.store(true, Ordering::Release);

        let (output_tx, output_rx) = mpsc::channel(PLAYER_OUTPUT_BUFFER);
        let world = Arc::clone(&self.world);
        let updated = Arc::clone(&self.updated);

        tokio::spawn(async move {
            loop {
                let data = tokio::select! {
                    _ = token.cancelled() => break,
                    data = input.recv() => match data {
                        Some(data) => data,
                        None => break,
                    },
                };

                let reply = match Command::decode(&data) {
                    Ok(Command::Turn(direction)) => lock(&world).turn(id, direction),
                    Ok(Command::Ping { nonce }) => Packet::Pong { nonce },
                    Err(e) => {
                        debug!("Snake {} sent undecodable command: {}", id, e);
                        Packet::Error {
                            message: "unknown command".to_string(),
                        }
                    }
                };

                let data = match reply.encode() {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("Cannot encode reply for snake {}: {}", id, e);
                        continue;
                    }
                };

                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = output_tx.send(data) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            lock(&world).remove_snake(id);
            updated.store(true, Ordering::Release);
            debug!("Finishing player {}", id);
        });

        Ok(output_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> PlaygroundConfig {
        PlaygroundConfig {
            width: 10,
            height: 8,
            tick: Duration::from_millis(50),
            food: 2,
        }
    }

    fn decode_playground(data: &[u8]) -> (u32, Vec<SnakeView>, Vec<Dot>) {
        match Packet::decode(data).unwrap() {
            Packet::Playground {
                tick, snakes, food, ..
            } => (tick, snakes, food),
            other => panic!("Unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_world_refills_food() {
        let world = World::new(&test_config());
        assert_eq!(world.food.len(), 2);
        assert_ne!(world.food[0], world.food[1]);
    }

    #[test]
    fn test_world_advance_without_snakes_is_quiet() {
        let mut world = World::new(&test_config());
        assert!(!world.advance());
        assert_eq!(world.tick, 1);
    }

    #[test]
    fn test_world_snake_eats_food() {
        let mut world = World::new(&test_config());
        let id = world.spawn_snake().unwrap();

        let snake = world.snakes.get_mut(&id).unwrap();
        snake.head = Dot::new(1, 1);
        snake.direction = Direction::East;
        world.food = vec![Dot::new(2, 1)];

        assert!(world.advance());

        let snake = &world.snakes[&id];
        assert_eq!(snake.head, Dot::new(2, 1));
        assert_eq!(snake.score, 1);
        assert_eq!(world.food.len(), 2);
        assert!(!world.food.contains(&Dot::new(2, 1)));
    }

    #[test]
    fn test_world_rejects_reverse_turn() {
        let mut world = World::new(&test_config());
        let id = world.spawn_snake().unwrap();
        world.snakes.get_mut(&id).unwrap().direction = Direction::North;

        assert!(matches!(
            world.turn(id, Direction::South),
            Packet::Error { .. }
        ));
        assert!(matches!(world.turn(id, Direction::East), Packet::Notice { .. }));
        assert_eq!(world.snakes[&id].direction, Direction::East);
    }

    #[test]
    fn test_world_full_playground_has_no_room() {
        let mut world = World::new(&PlaygroundConfig {
            width: 1,
            height: 1,
            tick: Duration::from_millis(50),
            food: 0,
        });

        assert!(world.spawn_snake().is_some());
        assert!(world.spawn_snake().is_none());
    }

    #[tokio::test]
    async fn test_start_rejects_cancelled_token() {
        let token = CancellationToken::new();
        token.cancel();

        let result = Playground::start(token, test_config());
        assert!(matches!(result, Err(GameError::Cancelled)));
    }

    #[tokio::test]
    async fn test_start_rejects_empty_playground() {
        let config = PlaygroundConfig {
            width: 0,
            ..test_config()
        };

        let result = Playground::start(CancellationToken::new(), config);
        assert!(matches!(
            result,
            Err(GameError::InvalidPlayground {
                width: 0,
                height: 8
            })
        ));
    }

    #[tokio::test]
    async fn test_updated_flag_is_consumed() {
        let playground = Playground::start(CancellationToken::new(), test_config()).unwrap();

        assert!(playground.updated());
        assert!(!playground.updated());
    }

    #[tokio::test]
    async fn test_serialize_reports_snakes() {
        let token = CancellationToken::new();
        let playground = Playground::start(token.clone(), test_config()).unwrap();

        let (_input_tx, input_rx) = mpsc::channel(4);
        let _output = playground
            .start_player(token.child_token(), input_rx)
            .unwrap();

        let (_, snakes, food) = decode_playground(&playground.serialize().unwrap());
        assert_eq!(snakes.len(), 1);
        assert_eq!(food.len(), 2);
        token.cancel();
    }

    #[tokio::test]
    async fn test_player_replies_to_commands() {
        let token = CancellationToken::new();
        let playground = Playground::start(token.clone(), test_config()).unwrap();

        let (input_tx, input_rx) = mpsc::channel(4);
        let mut output = playground
            .start_player(token.child_token(), input_rx)
            .unwrap();

        input_tx
            .send(Command::Ping { nonce: 7 }.encode().unwrap())
            .await
            .unwrap();
        let reply = Packet::decode(&output.recv().await.unwrap()).unwrap();
        assert_eq!(reply, Packet::Pong { nonce: 7 });

        input_tx.send(vec![0xFF; 9]).await.unwrap();
        let reply = Packet::decode(&output.recv().await.unwrap()).unwrap();
        assert!(matches!(reply, Packet::Error { .. }));

        token.cancel();
    }

    #[tokio::test]
    async fn test_player_stops_on_cancel_and_removes_snake() {
        let pool_token = CancellationToken::new();
        let playground = Playground::start(pool_token.clone(), test_config()).unwrap();

        let player_token = pool_token.child_token();
        let (_input_tx, input_rx) = mpsc::channel(4);
        let mut output = playground
            .start_player(player_token.clone(), input_rx)
            .unwrap();
        assert_eq!(playground.snake_count(), 1);

        player_token.cancel();

        // Output closes once the player task has exited
        assert!(output.recv().await.is_none());
        assert_eq!(playground.snake_count(), 0);
        pool_token.cancel();
    }

    #[tokio::test]
    async fn test_player_stops_when_input_closes() {
        let token = CancellationToken::new();
        let playground = Playground::start(token.clone(), test_config()).unwrap();

        let (input_tx, input_rx) = mpsc::channel(4);
        let mut output = playground
            .start_player(token.child_token(), input_rx)
            .unwrap();

        drop(input_tx);
        assert!(output.recv().await.is_none());
        assert_eq!(playground.snake_count(), 0);
        token.cancel();
    }

    #[tokio::test]
    async fn test_start_player_rejects_cancelled_token() {
        let token = CancellationToken::new();
        let playground = Playground::start(token.clone(), test_config()).unwrap();

        let player_token = token.child_token();
        player_token.cancel();
        let (_input_tx, input_rx) = mpsc::channel(4);

        let result = playground.start_player(player_token, input_rx);
        assert!(matches!(result, Err(GameError::PlayerCancelled)));
        assert_eq!(playground.snake_count(), 0);
        token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_world_loop_moves_snakes() {
        let token = CancellationToken::new();
        let playground = Playground::start(token.clone(), test_config()).unwrap();

        let (_input_tx, input_rx) = mpsc::channel(4);
        let _output = playground
            .start_player(token.child_token(), input_rx)
            .unwrap();
        assert!(playground.updated());

        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(playground.updated());
        let (tick, _, _) = decode_playground(&playground.serialize().unwrap());
        assert!(tick >= 1);
        token.cancel();
    }
}
