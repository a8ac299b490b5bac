//! # Pool Server Library
//!
//! This library provides the connection core of a real-time multiplayer game
//! server. Players connect over WebSockets and are grouped into pools; each
//! pool runs its own game instance, and the state shared by a pool is
//! broadcast periodically to all of its members.
//!
//! ## Core Responsibilities
//!
//! ### Admission
//! Connections are admitted into the first pool with a free slot. A new pool
//! is created on demand while the pool limit allows it; otherwise the
//! connection is rejected with a "server is full" packet. Pools disappear as
//! soon as their last member leaves.
//!
//! ### Broadcasting
//! A single streamer serves every pool. On each tick it checks which shared
//! states changed, serializes each of them once and hands the snapshot to all
//! subscribers of that state. The streamer loop runs only while there is at
//! least one subscriber.
//!
//! ### Connection Sessions
//! Every admitted connection runs a session with two duties:
//! - Reading client commands and forwarding them to the player, in order
//! - Writing private player output and broadcast snapshots to the socket
//!
//! ## Architecture Design
//!
//! ### Cancellation Tree
//! Lifetimes are expressed as a tree of cancellation tokens:
//! server root → pool → session → player. Cancelling a node stops everything
//! below it. A pool cancels its own scope when it becomes empty; shutting the
//! server down cancels the root.
//!
//! ### Game Collaborators
//! The core never looks inside a game. A pool's game is reached through the
//! [`game::SharedState`] and [`game::PlayerProvider`] traits; the bundled
//! [`game::Playground`] is a small snake game implementing both.
//!
//! ## Module Organization
//!
//! - `config`: command line configuration
//! - `error`: error types for every layer
//! - `game`: game collaborator traits and the playground game
//! - `pool` / `pool_manager`: pools and admission control
//! - `server`: accept loop, shutdown listener, stats reporter
//! - `session`: per-connection actor
//! - `streamer`: broadcast scheduler
//! - `transport`: message-oriented socket halves
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::game::PlaygroundConfig;
//! use server::pool::pool_factory;
//! use server::pool_manager::PoolManager;
//! use server::server::Server;
//! use server::streamer::Streamer;
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let root = CancellationToken::new();
//!
//!     // Broadcast pool state every 100ms
//!     let streamer = Arc::new(Streamer::new(root.clone(), Duration::from_millis(100))?);
//!
//!     // Up to 10 pools of 4 players each
//!     let factory = pool_factory(root.clone(), 4, streamer, PlaygroundConfig::default())?;
//!     let manager = Arc::new(PoolManager::new(factory, 10)?);
//!
//!     let server = Server::bind("127.0.0.1:8081", manager, root, Duration::from_secs(1)).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod game;
pub mod pool;
pub mod pool_manager;
pub mod server;
pub mod session;
pub mod streamer;
pub mod transport;
