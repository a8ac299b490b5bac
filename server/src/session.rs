//! Per-connection session actor.
//!
//! Once a connection is admitted into a pool, its session runs two duties
//! side by side under one cancellation token:
//! - **Intake** reads client commands from the socket and forwards them, in
//!   order, into the player's input queue
//! - **Delivery** writes the player's private output and the pool broadcast
//!   to the socket
//!
//! Any terminal event (peer disconnect, read error, pool emptied, server
//! shutdown, broadcast sink pruned) cancels the token, both duties wind down,
//! and the connection is released from its pool exactly once.
//!
//! The broadcast sink is owned by the streamer alone; the session only keeps
//! a weak handle to detach it. Once the streamer prunes a sink that fell
//! behind, the broadcast queue closes and the session ends.

use crate::error::SessionError;
use crate::pool::{ConnHandle, PoolFeatures};
use crate::pool_manager::PoolManager;
use crate::streamer::Subscriber;
use crate::transport::{MessageReader, MessageWriter};
use log::{debug, error, info, warn};
use shared::{Packet, MAX_INPUT_LENGTH};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the client → player command queue.
pub const INPUT_BUFFER: usize = 16;

/// Broadcast snapshots a connection may lag behind before it is pruned.
pub const BROADCAST_BUFFER: usize = 8;

pub struct ConnectionSession<R, W> {
    /// Identity of the accepted socket
    conn: ConnHandle,
    /// Incoming half of the socket
    reader: R,
    /// Outgoing half of the socket
    writer: W,
    /// Admission control the connection is added to and released from
    manager: Arc<PoolManager>,
}

impl<R, W> ConnectionSession<R, W>
where
    R: MessageReader,
    W: MessageWriter,
{
    pub fn new(conn: ConnHandle, reader: R, writer: W, manager: Arc<PoolManager>) -> Self {
        Self {
            conn,
            reader,
            writer,
            manager,
        }
    }

    /// Runs the session until the connection ends.
    ///
    /// Returns an error only if the connection could not be set up; errors
    /// while running end the session and are logged.
    pub async fn run(self) -> Result<(), SessionError> {
        let Self {
            conn,
            reader,
            mut writer,
            manager,
        } = self;

        let features = match manager.add_conn(conn).await {
            Ok(features) => features,
            Err(e) => {
                reject(&mut writer, e.to_string()).await;
                return Err(e.into());
            }
        };

        let result = attach_and_run(conn, reader, &mut writer, &features).await;

        if let Err(e) = writer.close().await {
            debug!("Cannot close connection {}: {}", conn.key(), e);
        }
        if let Err(e) = manager.del_conn(&conn).await {
            error!("Cannot release connection {}: {}", conn.key(), e);
        }

        info!("Connection {} session finished", conn.key());
        result
    }
}

async fn reject<W: MessageWriter>(writer: &mut W, reason: String) {
    warn!("Rejecting connection: {}", reason);

    match (Packet::Rejected { reason }).encode() {
        Ok(data) => {
            if let Err(e) = writer.write(data).await {
                debug!("Cannot send rejection: {}", e);
            }
        }
        Err(e) => warn!("Cannot encode rejection: {}", e),
    }

    if let Err(e) = writer.close().await {
        debug!("Cannot close rejected connection: {}", e);
    }
}

/// Hooks the admitted connection up to its pool and runs both duties.
/// Everything set up here is undone before returning.
async fn attach_and_run<R, W>(
    conn: ConnHandle,
    reader: R,
    writer: &mut W,
    features: &PoolFeatures,
) -> Result<(), SessionError>
where
    R: MessageReader,
    W: MessageWriter,
{
    let hello = Packet::ConnId {
        id: features.conn_id(),
    }
    .encode()?;
    writer.write(hello).await.map_err(SessionError::SendConnId)?;

    let token = features.token().child_token();

    let (shared_tx, shared_rx) = mpsc::channel::<Arc<[u8]>>(BROADCAST_BUFFER);
    let sink: Arc<dyn Subscriber> = Arc::new(shared_tx);
    let registration = Arc::downgrade(&sink);
    debug!("Creating connection to common game stream");
    features.attach(sink).await;

    let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
    debug!("Starting player");
    let output_rx = match features.start_player(token.clone(), input_rx) {
        Ok(output_rx) => output_rx,
        Err(e) => {
            detach(features, &registration).await;
            return Err(SessionError::StartPlayer(e));
        }
    };

    info!(
        "Connection {} is active as {} in its pool",
        conn.key(),
        features.conn_id()
    );

    tokio::join!(
        intake(conn, reader, input_tx, token.clone()),
        deliver(conn, writer, output_rx, shared_rx, token.clone()),
    );

    // Delivery may end on its own; make sure the player goes down too
    token.cancel();
    detach(features, &registration).await;
    Ok(())
}

/// Detaches the broadcast sink unless the streamer already pruned it.
async fn detach(features: &PoolFeatures, registration: &Weak<dyn Subscriber>) {
    if let Some(sink) = registration.upgrade() {
        features.detach(&sink).await;
    }
}

/// Forwards client messages into the player's input queue until the session
/// is cancelled. The only duty that cancels on socket failure.
///
/// Owns the sending half of the input queue, which is closed on return.
async fn intake<R: MessageReader>(
    conn: ConnHandle,
    mut reader: R,
    input: mpsc::Sender<Vec<u8>>,
    token: CancellationToken,
) {
    loop {
        let read = tokio::select! {
            _ = token.cancelled() => break,
            read = reader.read() => read,
        };

        match read {
            Ok(Some(data)) if data.len() > MAX_INPUT_LENGTH => {
                warn!(
                    "Connection {} sent {} bytes, over the {} byte limit; dropping message",
                    conn.key(),
                    data.len(),
                    MAX_INPUT_LENGTH
                );
            }
            Ok(Some(data)) => {
                let sent = tokio::select! {
                    _ = token.cancelled() => break,
                    sent = input.send(data) => sent,
                };
                if sent.is_err() {
                    debug!("Player of connection {} stopped reading", conn.key());
                    token.cancel();
                    break;
                }
            }
            Ok(None) => {
                debug!("Connection {} closed by peer", conn.key());
                token.cancel();
                break;
            }
            Err(e) => {
                error!("Cannot read from connection {}: {}", conn.key(), e);
                token.cancel();
                break;
            }
        }
    }

    debug!("Player listener of connection {} stops", conn.key());
}

/// Writes broadcast snapshots and private player output to the socket until
/// the session is cancelled or a write fails.
///
/// A closed broadcast queue means the streamer pruned this connection's sink;
/// it will never get shared state again, so the session is cancelled.
async fn deliver<W: MessageWriter>(
    conn: ConnHandle,
    writer: &mut W,
    mut output: mpsc::Receiver<Vec<u8>>,
    mut shared: mpsc::Receiver<Arc<[u8]>>,
    token: CancellationToken,
) {
    loop {
        let data = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            data = shared.recv() => match data {
                Some(data) => data.to_vec(),
                None => {
                    warn!(
                        "Connection {} fell behind the game stream and was dropped from it",
                        conn.key()
                    );
                    token.cancel();
                    break;
                }
            },
            data = output.recv() => match data {
                Some(data) => data,
                None => {
                    debug!("Player of connection {} finished", conn.key());
                    break;
                }
            },
        };

        if let Err(e) = writer.write(data).await {
            error!("Cannot send game data to connection {}: {}", conn.key(), e);
            break;
        }
    }

    debug!("Private game stream of connection {} stops", conn.key());
}
