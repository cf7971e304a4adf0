//! Registry and server behavior under concurrent load

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chat_transport::core::codec;
use chat_transport::protocol::dispatcher::{ClientRegistry, ClientSink};
use chat_transport::{ChatClient, ChatConfig, ChatServer, ClientId, Message};
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

#[derive(Default)]
struct CountingSink {
    delivered: AtomicUsize,
}

impl ClientSink for CountingSink {
    fn deliver(&self, _message: &Message) -> chat_transport::Result<()> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_register_broadcast_unregister() {
    let registry = Arc::new(ClientRegistry::new());
    let stable = Arc::new(CountingSink::default());
    registry.register(ClientId::new(), stable.clone()).unwrap();

    let rounds = 500usize;
    let mut tasks = JoinSet::new();
    for _ in 0..4 {
        let registry = registry.clone();
        tasks.spawn(async move {
            for _ in 0..rounds {
                let id = ClientId::new();
                registry
                    .register(id, Arc::new(CountingSink::default()))
                    .unwrap();
                tokio::task::yield_now().await;
                assert!(registry.unregister(id).unwrap().is_some());
            }
        });
    }
    for _ in 0..4 {
        let registry = registry.clone();
        tasks.spawn(async move {
            for _ in 0..rounds {
                let notice = Message::ClientConnected {
                    client: ClientId::new(),
                };
                assert!(registry.broadcast(&notice).unwrap() >= 1);
                tokio::task::yield_now().await;
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert_eq!(registry.len(), 1);
    assert_eq!(stable.delivered.load(Ordering::Relaxed), 4 * rounds);
}

/// Writes `bytes` in random sized pieces with short random pauses.
async fn jittered_write(stream: &mut TcpStream, bytes: &[u8]) {
    let plan: Vec<(usize, u64)> = {
        let mut rng = rand::rng();
        let mut plan = Vec::new();
        let mut offset = 0;
        while offset < bytes.len() {
            let take = rng.random_range(1..=32).min(bytes.len() - offset);
            plan.push((take, rng.random_range(0..3)));
            offset += take;
        }
        plan
    };

    let mut offset = 0;
    for (take, pause) in plan {
        stream.write_all(&bytes[offset..offset + take]).await.unwrap();
        offset += take;
        if pause > 0 {
            tokio::time::sleep(Duration::from_millis(pause)).await;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fragmented_senders_keep_per_sender_order() {
    let config = ChatConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".to_string();
        c.transport.read_timeout = Duration::from_millis(20);
        c.processing.wait_timeout = Duration::from_millis(20);
    });
    let server = ChatServer::bind(config).await.unwrap();
    server.start().await.unwrap();
    let addr = server.local_addr();

    let mut receiver = ChatClient::connect(addr).await.unwrap();
    let target = receiver.id();
    for _ in 0..200 {
        if server.connected_clients() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.connected_clients(), 1);

    let senders = 4usize;
    let per_sender = 25usize;
    let mut tasks = JoinSet::new();
    for s in 0..senders {
        tasks.spawn(async move {
            let id = ClientId::new();
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(id.as_bytes()).await.unwrap();

            let mut bytes = Vec::new();
            for i in 0..per_sender {
                let message = Message::DirectMessage {
                    emitter: id,
                    receiver: target,
                    content: format!("{s}:{i}"),
                };
                bytes.extend_from_slice(&codec::encode(&message).unwrap());
            }
            jittered_write(&mut stream, &bytes).await;
            stream
        });
    }

    let mut streams = Vec::new();
    while let Some(res) = tasks.join_next().await {
        streams.push(res.unwrap());
    }

    let mut next = vec![0usize; senders];
    let mut received = 0;
    while received < senders * per_sender {
        let message = receiver
            .receive_timeout(Duration::from_secs(5))
            .await
            .expect("message should arrive");
        let Some(content) = message.content() else {
            continue;
        };
        let (s, i) = content.split_once(':').unwrap();
        let (s, i): (usize, usize) = (s.parse().unwrap(), i.parse().unwrap());
        assert_eq!(i, next[s], "sender {s} out of order");
        next[s] += 1;
        received += 1;
    }

    drop(streams);
    server.shutdown().await.unwrap();
}
