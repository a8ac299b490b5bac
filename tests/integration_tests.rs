//! Integration tests for the pool server
//!
//! These tests run the full server on real sockets and drive it with the
//! headless client.

use client::Client;
use server::game::PlaygroundConfig;
use server::pool::pool_factory;
use server::pool_manager::PoolManager;
use server::server::{bind_listener, spawn_shutdown_listener, Server};
use server::streamer::Streamer;
use shared::{Command, Direction, Packet, MAX_INPUT_LENGTH};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(3);

struct TestServer {
    url: String,
    root: CancellationToken,
    manager: Arc<PoolManager>,
    handle: JoinHandle<Result<(), server::error::ServerError>>,
}

impl TestServer {
    async fn start(pool_limit: u16, conn_limit: u16) -> Self {
        let root = CancellationToken::new();
        let streamer = Arc::new(Streamer::new(root.clone(), Duration::from_millis(20)).unwrap());
        let playground = PlaygroundConfig {
            tick: Duration::from_millis(20),
            ..PlaygroundConfig::default()
        };
        let factory = pool_factory(root.clone(), conn_limit, streamer, playground).unwrap();
        let manager = Arc::new(PoolManager::new(factory, pool_limit).unwrap());

        let server = Server::bind(
            "127.0.0.1:0",
            Arc::clone(&manager),
            root.clone(),
            Duration::ZERO,
        )
        .await
        .unwrap();
        let addr: SocketAddr = server.local_addr().unwrap();

        TestServer {
            url: format!("ws://{}", addr),
            root,
            manager,
            handle: tokio::spawn(server.run()),
        }
    }

    async fn join(&self) -> (Client, u16) {
        let mut client = Client::connect(&self.url).await.unwrap();
        let id = timeout(WAIT, client.join()).await.unwrap().unwrap();
        (client, id)
    }

    async fn wait_for_conns(&self, expected: usize) {
        timeout(WAIT, async {
            while self.manager.conn_count().await != expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection count not reached in time");
    }

    async fn stop(self) {
        self.root.cancel();
        let joined = assert_ok!(timeout(WAIT, self.handle).await);
        assert_ok!(assert_ok!(joined));
    }
}

/// Reads packets until one matches `pred`.
async fn recv_until<F: Fn(&Packet) -> bool>(client: &mut Client, pred: F) -> Packet {
    timeout(WAIT, async {
        loop {
            match client.recv().await.unwrap() {
                Some(packet) if pred(&packet) => return packet,
                Some(_) => continue,
                None => panic!("Connection closed while waiting for packet"),
            }
        }
    })
    .await
    .expect("packet not received in time")
}

/// ADMISSION TESTS
mod admission_tests {
    use super::*;

    /// Clients in one pool get consecutive ids
    #[tokio::test]
    async fn clients_share_pool_with_distinct_ids() {
        let server = TestServer::start(1, 2).await;

        let (_first, first_id) = server.join().await;
        let (_second, second_id) = server.join().await;

        assert_eq!((first_id, second_id), (0, 1));
        assert_eq!(server.manager.pool_count().await, 1);

        server.stop().await;
    }

    /// A connection beyond every pool's capacity is rejected with a reason
    #[tokio::test]
    async fn full_server_rejects_connection() {
        let server = TestServer::start(1, 1).await;
        let (_first, _) = server.join().await;

        let mut rejected = Client::connect(&server.url).await.unwrap();
        let err = assert_err!(timeout(WAIT, rejected.join()).await.unwrap());
        assert!(err.to_string().contains("server is full"));

        let mut extra = Client::connect(&server.url).await.unwrap();
        match timeout(WAIT, extra.recv()).await.unwrap().unwrap() {
            Some(Packet::Rejected { reason }) => {
                assert_eq!(reason, "cannot create new pool: server is full")
            }
            other => panic!("Expected rejection, got {:?}", other),
        }
        assert_eq!(timeout(WAIT, extra.recv()).await.unwrap().unwrap(), None);
        assert_eq!(server.manager.conn_count().await, 1);

        server.stop().await;
    }

    /// Overflow goes to a second pool while the limit allows it
    #[tokio::test]
    async fn second_pool_created_on_demand() {
        let server = TestServer::start(2, 1).await;

        let (_first, first_id) = server.join().await;
        let (_second, second_id) = server.join().await;

        // Each connection is alone in its own pool
        assert_eq!((first_id, second_id), (0, 0));
        assert_eq!(server.manager.pool_count().await, 2);

        server.stop().await;
    }

    /// A slot freed by a disconnect is handed to the next client
    #[tokio::test]
    async fn slot_reused_after_disconnect() {
        let server = TestServer::start(1, 2).await;

        let (first, _) = server.join().await;
        let (_second, _) = server.join().await;

        first.close().await.unwrap();
        server.wait_for_conns(1).await;

        let (_third, third_id) = server.join().await;
        assert_eq!(third_id, 0);
        assert_eq!(server.manager.pool_count().await, 1);

        server.stop().await;
    }

    /// The pool disappears with its last member
    #[tokio::test]
    async fn empty_pool_is_removed() {
        let server = TestServer::start(1, 2).await;

        let (client, _) = server.join().await;
        assert_eq!(server.manager.pool_count().await, 1);

        client.close().await.unwrap();
        server.wait_for_conns(0).await;
        assert_eq!(server.manager.pool_count().await, 0);

        server.stop().await;
    }
}

/// GAMEPLAY TESTS
mod gameplay_tests {
    use super::*;

    /// Every member receives the pool's playground broadcast
    #[tokio::test]
    async fn members_receive_playground() {
        let server = TestServer::start(1, 2).await;
        let (mut first, _) = server.join().await;
        let (mut second, _) = server.join().await;

        for client in [&mut first, &mut second] {
            let packet = recv_until(client, |p| {
                matches!(p, Packet::Playground { snakes, .. } if snakes.len() == 2)
            })
            .await;

            match packet {
                Packet::Playground { width, height, .. } => {
                    assert_eq!((width, height), (40, 28));
                }
                _ => unreachable!(),
            }
        }

        server.stop().await;
    }

    /// Ping is answered privately with the same nonce
    #[tokio::test]
    async fn ping_answered_with_pong() {
        let server = TestServer::start(1, 2).await;
        let (mut client, _) = server.join().await;

        assert_ok!(client.send(&Command::Ping { nonce: 42 }).await);
        let packet = recv_until(&mut client, |p| matches!(p, Packet::Pong { .. })).await;
        assert_eq!(packet, Packet::Pong { nonce: 42 });

        server.stop().await;
    }

    /// Garbage gets an error reply; oversized input is dropped without one
    #[tokio::test]
    async fn bad_input_does_not_end_session() {
        let server = TestServer::start(1, 2).await;
        let (mut client, _) = server.join().await;

        client
            .send_raw(vec![0xFF; MAX_INPUT_LENGTH + 1])
            .await
            .unwrap();
        client.send_raw(vec![0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();
        recv_until(&mut client, |p| matches!(p, Packet::Error { .. })).await;

        client.send(&Command::Ping { nonce: 1 }).await.unwrap();
        recv_until(&mut client, |p| matches!(p, Packet::Pong { nonce: 1 })).await;
        assert_eq!(server.manager.conn_count().await, 1);

        server.stop().await;
    }

    /// Turn commands are acknowledged and other players are unaffected
    #[tokio::test]
    async fn turns_are_acknowledged() {
        let server = TestServer::start(1, 2).await;
        let (mut client, _) = server.join().await;
        let (mut other, _) = server.join().await;

        for direction in Direction::ALL {
            client.send(&Command::Turn(direction)).await.unwrap();
        }
        for _ in Direction::ALL {
            recv_until(&mut client, |p| {
                matches!(p, Packet::Notice { .. } | Packet::Error { .. })
            })
            .await;
        }

        other.send(&Command::Ping { nonce: 9 }).await.unwrap();
        recv_until(&mut other, |p| matches!(p, Packet::Pong { nonce: 9 })).await;

        server.stop().await;
    }
}

/// SHUTDOWN TESTS
mod shutdown_tests {
    use super::*;

    /// Cancelling the root closes every session
    #[tokio::test]
    async fn root_cancel_closes_clients() {
        let server = TestServer::start(1, 2).await;
        let (mut client, _) = server.join().await;

        server.root.cancel();
        let closed = timeout(WAIT, async {
            loop {
                match client.recv().await {
                    Ok(Some(_)) => continue,
                    _ => break,
                }
            }
        })
        .await;
        assert!(closed.is_ok());

        server.wait_for_conns(0).await;
        server.stop().await;
    }

    /// Connecting to the shutdown port stops the accept loop
    #[tokio::test]
    async fn shutdown_port_stops_server() {
        let server = TestServer::start(1, 2).await;
        let listener = bind_listener("127.0.0.1:0").await.unwrap();
        let shutdown_addr = listener.local_addr().unwrap();
        spawn_shutdown_listener(listener, server.root.clone());

        tokio::net::TcpStream::connect(shutdown_addr).await.unwrap();

        timeout(WAIT, server.root.cancelled()).await.unwrap();
        server.stop().await;
    }
}
