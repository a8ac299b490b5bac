//! Server error types.
//!
//! Each layer wraps the error of the layer below it and adds one line of
//! context:
//! - Game collaborators (start, player, serialization)
//! - Broadcast scheduling and subscriber delivery
//! - Pool and pool manager admission/removal
//! - Connection sessions and their transport
//! - Process startup (configuration, listeners)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("cannot start game: scope was cancelled")]
    Cancelled,

    #[error("cannot start game: invalid playground size {width}x{height}")]
    InvalidPlayground { width: u8, height: u8 },

    #[error("cannot start player: scope was cancelled")]
    PlayerCancelled,

    #[error("cannot start player: no free cell on playground")]
    NoRoom,

    #[error("cannot encode game state: {0}")]
    Encode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("cannot create streamer: parent scope was cancelled")]
    ParentCancelled,

    #[error("cannot create streamer: invalid delay")]
    InvalidDelay,
}

/// A subscriber could not take a broadcast payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("subscriber queue is full")]
    Full,

    #[error("subscriber is gone")]
    Closed,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("cannot create pool: invalid connection limit")]
    InvalidConnLimit,

    #[error("cannot create pool: parent scope was cancelled")]
    ParentCancelled,

    #[error("cannot create pool: {0}")]
    Game(#[source] GameError),

    #[error("cannot add connection to pool: pool is full")]
    Full,

    #[error("cannot add connection to pool: pool is closed")]
    Closed,

    #[error("cannot add connection to pool: connection already added")]
    AlreadyAdded,

    #[error("cannot delete connection from pool: connection was not found in pool")]
    NotFound,
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cannot create pool manager: invalid pool limit")]
    InvalidPoolLimit,

    #[error("cannot create new pool: server is full")]
    ServerFull,

    #[error("cannot admit connection: connection already added")]
    AlreadyAdded,

    #[error("cannot create new pool: {0}")]
    CreatePool(#[source] PoolError),

    #[error("cannot admit connection: {0}")]
    Admission(#[source] PoolError),

    #[error("cannot remove connection: {0}")]
    Removal(#[source] PoolError),

    #[error("connection to remove was not found")]
    ConnNotFound,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection was not admitted: {0}")]
    Admission(#[from] ManagerError),

    #[error("cannot send connection id: {0}")]
    SendConnId(#[source] TransportError),

    #[error("cannot start player: {0}")]
    StartPlayer(#[source] GameError),

    #[error("cannot encode packet: {0}")]
    Encode(#[from] bincode::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid pool limit")]
    InvalidPoolLimit,

    #[error("invalid connection limit per pool")]
    InvalidConnLimit,

    #[error("invalid playground size {width}x{height}")]
    InvalidPlayground { width: u8, height: u8 },

    #[error("invalid {0}: must be greater than zero")]
    ZeroDuration(&'static str),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot create listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("starting server error: {0}")]
    Streamer(#[from] StreamerError),

    #[error("starting server error: {0}")]
    Pool(#[from] PoolError),

    #[error("starting server error: {0}")]
    Manager(#[from] ManagerError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
