//! Message-oriented socket halves used by connection sessions.
//!
//! Sessions read and write whole messages through these traits, so the core
//! never depends on a concrete socket type. The WebSocket adapters wrap the
//! split halves of a `tokio_tungstenite` stream.

use crate::error::TransportError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::debug;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

/// Inbound half of a connection.
pub trait MessageReader: Send + 'static {
    /// Waits for the next message. `Ok(None)` means the peer closed the
    /// connection cleanly.
    ///
    /// Must be cancel-safe: dropping the future loses no message.
    fn read(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;
}

/// Outbound half of a connection.
pub trait MessageWriter: Send + 'static {
    fn write(&mut self, data: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

pub struct WsReader<S> {
    inner: SplitStream<WebSocketStream<S>>,
}

pub struct WsWriter<S> {
    inner: SplitSink<WebSocketStream<S>, Message>,
}

/// Splits an established WebSocket into session halves.
pub fn ws_split<S>(stream: WebSocketStream<S>) -> (WsReader<S>, WsWriter<S>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = stream.split();
    (WsReader { inner: stream }, WsWriter { inner: sink })
}

impl<S> MessageReader for WsReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn read(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data)),
                Some(Ok(Message::Text(text))) => return Ok(Some(text.into_bytes())),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Peer sent close frame: {:?}", frame);
                    return Ok(None);
                }
                // Pings are answered by tungstenite on the next write
                Some(Ok(_)) => continue,
                Some(Err(WsError::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(TransportError::WebSocket(e)),
            }
        }
    }
}

impl<S> MessageWriter for WsWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.inner.send(Message::Binary(data)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.inner.close().await {
            Ok(()) | Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
