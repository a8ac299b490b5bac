//! # Game Client Library
//!
//! A headless WebSocket client for the pool server. It performs the
//! connection handshake, decodes server packets and sends player commands.
//! The `client` binary uses it as a simple bot; the workspace tests use it
//! to drive the server end to end.
//!
//! ## Connection Flow
//!
//! 1. [`Client::connect`] opens the WebSocket
//! 2. The first packet is either `Packet::ConnId` (admitted) or
//!    `Packet::Rejected` (server full)
//! 3. After admission the client receives private replies to its commands
//!    interleaved with periodic `Packet::Playground` broadcasts
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::Client;
//! use shared::{Command, Direction};
//!
//! #[tokio::main]
//! async fn main() -> client::ClientResult<()> {
//!     let mut client = Client::connect("ws://127.0.0.1:8081").await?;
//!     let id = client.join().await?;
//!     println!("Joined as {}", id);
//!
//!     client.send(&Command::Turn(Direction::North)).await?;
//!     while let Some(packet) = client.recv().await? {
//!         println!("{:?}", packet);
//!     }
//!     Ok(())
//! }
//! ```

use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{Command, Packet};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type ClientResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub struct Client {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    conn_id: Option<u16>,
}

impl Client {
    pub async fn connect(url: &str) -> ClientResult<Self> {
        info!("Connecting to {}...", url);
        let (stream, _) = connect_async(url).await?;

        Ok(Self {
            stream,
            conn_id: None,
        })
    }

    /// Id assigned by the server, once the handshake packet was received.
    pub fn conn_id(&self) -> Option<u16> {
        self.conn_id
    }

    /// Waits for the handshake packet. Fails if the server rejected the
    /// connection or closed it first.
    pub async fn join(&mut self) -> ClientResult<u16> {
        match self.recv().await? {
            Some(Packet::ConnId { id }) => Ok(id),
            Some(Packet::Rejected { reason }) => Err(format!("rejected: {}", reason).into()),
            Some(other) => Err(format!("unexpected handshake packet: {:?}", other).into()),
            None => Err("connection closed before handshake".into()),
        }
    }

    /// Next packet from the server, `None` once the connection is closed.
    /// Non-binary frames are skipped.
    pub async fn recv(&mut self) -> ClientResult<Option<Packet>> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message?,
                None => return Ok(None),
            };

            match message {
                Message::Binary(data) => {
                    let packet = Packet::decode(&data)?;
                    if let Packet::ConnId { id } = packet {
                        info!("Connected with id {}", id);
                        self.conn_id = Some(id);
                    }
                    return Ok(Some(packet));
                }
                Message::Close(_) => return Ok(None),
                other => debug!("Skipping frame: {:?}", other),
            }
        }
    }

    pub async fn send(&mut self, command: &Command) -> ClientResult<()> {
        self.stream.send(Message::Binary(command.encode()?)).await?;
        Ok(())
    }

    /// Sends raw bytes, bypassing command encoding.
    pub async fn send_raw(&mut self, data: Vec<u8>) -> ClientResult<()> {
        self.stream.send(Message::Binary(data)).await?;
        Ok(())
    }

    pub async fn close(mut self) -> ClientResult<()> {
        self.stream.close(None).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Direction;
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    /// Accepts one WebSocket connection, sends `packets` and echoes back the
    /// first command it receives as a notice.
    async fn fake_server(packets: Vec<Packet>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for packet in packets {
                ws.send(Message::Binary(packet.encode().unwrap()))
                    .await
                    .unwrap();
            }
            ws.send(Message::Text("ignored".to_string())).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                if let Message::Binary(data) = message {
                    let command = Command::decode(&data).unwrap();
                    let reply = Packet::Notice {
                        message: format!("{:?}", command),
                    };
                    ws.send(Message::Binary(reply.encode().unwrap()))
                        .await
                        .unwrap();
                    break;
                }
            }
            ws.close(None).await.ok();
        });

        format!("ws://{}", addr)
    }

    #[tokio::test]
    async fn test_join_records_conn_id() {
        let url = fake_server(vec![Packet::ConnId { id: 3 }]).await;
        let mut client = Client::connect(&url).await.unwrap();

        assert_eq!(client.conn_id(), None);
        assert_eq!(client.join().await.unwrap(), 3);
        assert_eq!(client.conn_id(), Some(3));
    }

    #[tokio::test]
    async fn test_join_fails_when_rejected() {
        let url = fake_server(vec![Packet::Rejected {
            reason: "server is full".to_string(),
        }])
        .await;
        let mut client = Client::connect(&url).await.unwrap();

        let err = client.join().await.unwrap_err();
        assert!(err.to_string().contains("server is full"));
        assert_eq!(client.conn_id(), None);
    }

    #[tokio::test]
    async fn test_send_and_skip_text_frames() {
        let url = fake_server(vec![Packet::ConnId { id: 0 }]).await;
        let mut client = Client::connect(&url).await.unwrap();
        client.join().await.unwrap();

        assert_ok!(client.send(&Command::Turn(Direction::West)).await);
        assert_eq!(
            client.recv().await.unwrap(),
            Some(Packet::Notice {
                message: "Turn(West)".to_string()
            })
        );
        assert_eq!(client.recv().await.unwrap(), None);
    }
}
