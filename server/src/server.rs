//! Process surface: the WebSocket accept loop, the shutdown listener and the
//! stats reporter.

use crate::error::ServerError;
use crate::pool::ConnHandle;
use crate::pool_manager::PoolManager;
use crate::session::ConnectionSession;
use crate::transport::ws_split;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Accepts WebSocket connections and runs one session per connection.
pub struct Server {
    listener: TcpListener,
    manager: Arc<PoolManager>,
    /// Root scope; accepting stops once it fires
    token: CancellationToken,
    /// Delay between shutdown and closing the listener
    grace: Duration,
}

impl Server {
    /// Binds the game listener. Accepting stops once `token` is cancelled.
    pub async fn bind(
        addr: &str,
        manager: Arc<PoolManager>,
        token: CancellationToken,
        grace: Duration,
    ) -> Result<Self, ServerError> {
        let listener = bind_listener(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            manager,
            token,
            grace,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn manager(&self) -> &Arc<PoolManager> {
        &self.manager
    }

    /// Runs the accept loop until the root scope is cancelled, then gives
    /// sessions the grace delay before the listener is closed.
    pub async fn run(self) -> Result<(), ServerError> {
        info!("Server started successfully");

        loop {
            let accepted = tokio::select! {
                _ = self.token.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    tokio::spawn(handle_conn(stream, peer, Arc::clone(&self.manager)));
                }
                Err(e) => error!("Cannot accept connection: {}", e),
            }
        }

        info!("Server shutting down, waiting {:?}", self.grace);
        sleep(self.grace).await;
        drop(self.listener);
        info!("Listener was closed");

        Ok(())
    }
}

async fn handle_conn(stream: TcpStream, peer: SocketAddr, manager: Arc<PoolManager>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let conn = ConnHandle::new(peer);
    info!("Connection {} from {} was opened", conn.key(), peer);

    let (reader, writer) = ws_split(ws);
    if let Err(e) = ConnectionSession::new(conn, reader, writer, manager)
        .run()
        .await
    {
        warn!("Connection {} from {} ended: {}", conn.key(), peer, e);
    }
}

pub async fn bind_listener(addr: &str) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Spawns a task that cancels `token` on the first connection accepted by
/// `listener`.
pub fn spawn_shutdown_listener(
    listener: TcpListener,
    token: CancellationToken,
) -> JoinHandle<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Shutdown listener on {}", addr);
    }

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            accepted = listener.accept() => {
                match accepted {
                    Ok((_, peer)) => info!("Shutdown requested from {}", peer),
                    Err(e) => error!("Shutdown listener failed: {}", e),
                }
                token.cancel();
            }
        }
    })
}

/// Spawns a task that logs pool and connection counts every `period`.
pub fn spawn_stats_reporter(
    manager: Arc<PoolManager>,
    period: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let infos = manager.pool_infos().await;
                    let conns: usize = infos.iter().map(|i| i.conn_count as usize).sum();
                    debug!(
                        "Stats: {} of {} pools, {} connections ({} admitted, {} released)",
                        infos.len(),
                        manager.pool_limit(),
                        conns,
                        manager.admitted_total(),
                        manager.released_total()
                    );
                    for info in infos {
                        debug!(
                            "Pool {}: {}/{} connections",
                            info.index, info.conn_count, info.conn_limit
                        );
                    }
                }
            }
        }
    })
}
