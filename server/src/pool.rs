//! Game pools: isolated, capacity-bounded sessions sharing one game.
//!
//! A pool owns:
//! - The connections admitted into it, keyed by small reusable ids
//! - A cancellation scope that lives as long as the pool has members
//! - A broadcast group handle for the game's shared state
//!
//! Admission hands the connection a [`PoolFeatures`] bundle, which is all a
//! session needs to hook itself up to the pool without touching pool state.

use crate::error::{GameError, PoolError};
use crate::game::{PlayerProvider, Playground, PlaygroundConfig, SharedState};
use crate::streamer::{Streamer, Subscriber};
use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

static NEXT_CONN_KEY: AtomicU64 = AtomicU64::new(1);

/// Identity of one accepted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    /// Unique for the life of the process
    key: u64,
    /// Remote address of the socket
    peer: SocketAddr,
}

impl ConnHandle {
    /// Creates a handle with a process-unique key.
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            key: NEXT_CONN_KEY.fetch_add(1, Ordering::Relaxed),
            peer,
        }
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// The pool's shared state source together with the streamer that
/// broadcasts it.
#[derive(Clone)]
pub struct BroadcastGroup {
    streamer: Arc<Streamer>,
    source: Arc<dyn SharedState>,
}

impl BroadcastGroup {
    pub fn new(streamer: Arc<Streamer>, source: Arc<dyn SharedState>) -> Self {
        Self { streamer, source }
    }

    pub async fn subscribe(&self, sink: Arc<dyn Subscriber>) {
        self.streamer.subscribe(Arc::clone(&self.source), sink).await;
    }

    pub async fn unsubscribe(&self, sink: &Arc<dyn Subscriber>) {
        self.streamer.unsubscribe(&self.source, sink).await;
    }

    pub fn source(&self) -> &Arc<dyn SharedState> {
        &self.source
    }

    pub fn streamer(&self) -> &Arc<Streamer> {
        &self.streamer
    }
}

/// Hooks handed to a newly admitted connection.
#[derive(Clone)]
pub struct PoolFeatures {
    /// Id assigned to the connection in the pool
    conn_id: u16,
    group: BroadcastGroup,
    players: Arc<dyn PlayerProvider>,
    /// The pool scope
    token: CancellationToken,
}

impl PoolFeatures {
    /// Id of the connection inside its pool.
    pub fn conn_id(&self) -> u16 {
        self.conn_id
    }

    /// Attaches `sink` to the pool's broadcast group.
    pub async fn attach(&self, sink: Arc<dyn Subscriber>) {
        self.group.subscribe(sink).await;
    }

    /// Detaches `sink` from the pool's broadcast group.
    pub async fn detach(&self, sink: &Arc<dyn Subscriber>) {
        self.group.unsubscribe(sink).await;
    }

    /// Starts the private player task for this connection.
    pub fn start_player(
        &self,
        token: CancellationToken,
        input: mpsc::Receiver<Vec<u8>>,
    ) -> Result<mpsc::Receiver<Vec<u8>>, GameError> {
        self.players.start_player(token, input)
    }

    /// The pool scope. Derive child scopes from it; it is cancelled by the
    /// pool itself when the last member leaves.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Builds pools on demand for the pool manager.
pub type PoolFactory = Box<dyn Fn() -> Result<Pool, PoolError> + Send + Sync>;

/// Returns a factory creating playground-backed pools under `parent`.
pub fn pool_factory(
    parent: CancellationToken,
    conn_limit: u16,
    streamer: Arc<Streamer>,
    playground: PlaygroundConfig,
) -> Result<PoolFactory, PoolError> {
    if parent.is_cancelled() {
        return Err(PoolError::ParentCancelled);
    }
    if conn_limit == 0 {
        return Err(PoolError::InvalidConnLimit);
    }

    Ok(Box::new(move || {
        Pool::new(&parent, conn_limit, Arc::clone(&streamer), |token| {
            Playground::start(token, playground)
        })
    }))
}

/// One game session with a bounded number of members.
pub struct Pool {
    /// Members keyed by their id inside the pool
    conns: HashMap<u16, ConnHandle>,
    /// Maximum number of members
    conn_limit: u16,
    /// Pool scope, cancelled when the last member leaves
    token: CancellationToken,
    /// Broadcast of the game's shared state
    group: BroadcastGroup,
    /// Starts per-member player tasks in the pool's game
    players: Arc<dyn PlayerProvider>,
}

impl Pool {
    /// Creates a pool under `parent` and starts its game.
    ///
    /// `start_game` receives the pool scope; the game must stop once it is
    /// cancelled.
    pub fn new<G, F>(
        parent: &CancellationToken,
        conn_limit: u16,
        streamer: Arc<Streamer>,
        start_game: F,
    ) -> Result<Self, PoolError>
    where
        G: SharedState + PlayerProvider + 'static,
        F: FnOnce(CancellationToken) -> Result<Arc<G>, GameError>,
    {
        if conn_limit == 0 {
            return Err(PoolError::InvalidConnLimit);
        }
        if parent.is_cancelled() {
            return Err(PoolError::ParentCancelled);
        }

        let token = parent.child_token();
        let game = match start_game(token.clone()) {
            Ok(game) => game,
            Err(e) => {
                token.cancel();
                return Err(PoolError::Game(e));
            }
        };

        let source: Arc<dyn SharedState> = game.clone();
        let players: Arc<dyn PlayerProvider> = game;

        info!("Pool was created with connection limit {}", conn_limit);
        Ok(Self {
            conns: HashMap::new(),
            conn_limit,
            token,
            group: BroadcastGroup::new(streamer, source),
            players,
        })
    }

    pub fn is_full(&self) -> bool {
        self.conns.len() == self.conn_limit as usize
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// True once the pool scope was cancelled, either because the pool
    /// emptied or because the server is shutting down.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn has_conn(&self, conn: &ConnHandle) -> bool {
        self.conns.values().any(|c| c == conn)
    }

    pub fn conn_count(&self) -> u16 {
        self.conns.len() as u16
    }

    pub fn conn_limit(&self) -> u16 {
        self.conn_limit
    }

    /// Ids of the current members, ascending.
    pub fn conn_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.conns.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn group(&self) -> &BroadcastGroup {
        &self.group
    }

    /// Admits `conn` under the lowest free id.
    pub fn add_conn(&mut self, conn: ConnHandle) -> Result<PoolFeatures, PoolError> {
        if self.is_full() {
            return Err(PoolError::Full);
        }
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        if self.has_conn(&conn) {
            return Err(PoolError::AlreadyAdded);
        }

        // Not full, so a free id below the limit exists
        let conn_id = (0..self.conn_limit)
            .find(|id| !self.conns.contains_key(id))
            .ok_or(PoolError::Full)?;
        self.conns.insert(conn_id, conn);

        info!(
            "Connection {} from {} was added to pool as {}",
            conn.key, conn.peer, conn_id
        );

        Ok(PoolFeatures {
            conn_id,
            group: self.group.clone(),
            players: Arc::clone(&self.players),
            token: self.token.clone(),
        })
    }

    /// Removes `conn`. Cancels the pool scope when the last member leaves.
    pub fn del_conn(&mut self, conn: &ConnHandle) -> Result<(), PoolError> {
        let conn_id = self
            .conns
            .iter()
            .find(|(_, c)| *c == conn)
            .map(|(id, _)| *id)
            .ok_or(PoolError::NotFound)?;

        self.conns.remove(&conn_id);
        debug!("Connection {} was removed from pool", conn.key);

        if self.is_empty() {
            info!("Pool is empty, cancelling pool scope");
            // Cancelling twice is harmless
            self.token.cancel();
        }

        Ok(())
    }
}
