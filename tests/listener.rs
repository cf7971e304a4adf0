//! Connection listener behavior: fault isolation, error reporting and shutdown

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use chat_transport::core::codec;
use chat_transport::core::framed::FramedConnection;
use chat_transport::transport::{ConnectionListener, ListenerHandler, ReadOutcome};
use chat_transport::{ClientId, Message, ProtocolError};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{duplex, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Debug)]
enum Event {
    Message(Message),
    Panic(String),
    Disconnect,
    ReadError(String),
}

/// Decodes frames and panics on any direct message whose content is "boom".
struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    close_on: Mutex<Option<String>>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                events,
                close_on: Mutex::new(None),
            }),
            rx,
        )
    }
}

impl ListenerHandler for Recorder {
    fn on_read_data<'a>(&'a self, _client: ClientId, data: &'a [u8]) -> BoxFuture<'a, ReadOutcome> {
        Box::pin(async move {
            let mut consumed = 0;
            while let Ok((message, len)) = codec::decode(&data[consumed..]) {
                if message.content() == Some("boom") {
                    panic!("handler exploded");
                }
                consumed += len;
                let close = self.close_on.lock().unwrap().as_deref() == message.content();
                let _ = self.events.send(Event::Message(message));
                if close {
                    return ReadOutcome::close(consumed);
                }
            }
            ReadOutcome::keep(consumed)
        })
    }

    fn on_disconnect(&self, _client: ClientId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let _ = self.events.send(Event::Disconnect);
        })
    }

    fn on_read_error<'a>(&'a self, _client: ClientId, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = self.events.send(Event::ReadError(error.to_string()));
        })
    }

    fn on_panic<'a>(&'a self, _client: ClientId, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = self.events.send(Event::Panic(error.to_string()));
        })
    }
}

/// Panics while building its first read future, before any async code runs.
struct EagerPanic {
    calls: AtomicUsize,
    events: mpsc::UnboundedSender<Event>,
}

impl ListenerHandler for EagerPanic {
    fn on_read_data<'a>(&'a self, _client: ClientId, data: &'a [u8]) -> BoxFuture<'a, ReadOutcome> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("failed before building the future");
        }
        Box::pin(async move {
            let mut consumed = 0;
            while let Ok((message, len)) = codec::decode(&data[consumed..]) {
                consumed += len;
                let _ = self.events.send(Event::Message(message));
            }
            ReadOutcome::keep(consumed)
        })
    }

    fn on_panic<'a>(&'a self, _client: ClientId, error: &'a ProtocolError) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = self.events.send(Event::Panic(error.to_string()));
        })
    }
}

fn direct(content: &str) -> Vec<u8> {
    codec::encode(&Message::DirectMessage {
        emitter: ClientId::new(),
        receiver: ClientId::new(),
        content: content.to_string(),
    })
    .unwrap()
    .to_vec()
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event should arrive")
        .expect("handler alive")
}

fn spawn<S>(stream: S, handler: Arc<Recorder>, max: usize) -> ConnectionListener
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let framed = FramedConnection::new(stream, Duration::from_millis(20), max);
    ConnectionListener::spawn(ClientId::new(), framed, handler, 8)
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_listener() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    let listener = spawn(local, handler, 4096);

    peer.write_all(&direct("boom")).await.unwrap();
    match next_event(&mut events).await {
        Event::Panic(msg) => assert!(msg.contains("handler exploded")),
        other => panic!("expected panic report, got {other:?}"),
    }

    peer.write_all(&direct("still here")).await.unwrap();
    match next_event(&mut events).await {
        Event::Message(message) => assert_eq!(message.content(), Some("still here")),
        other => panic!("expected message, got {other:?}"),
    }

    listener.close().await;
}

#[tokio::test]
async fn test_oversized_data_reports_read_error() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    let _listener = spawn(local, handler, 64);

    // Declares 500 bytes of content, more than the 64 byte limit
    let mut frame = vec![2, 0, 0, 0];
    frame.extend_from_slice(&[1u8; 32]);
    frame.extend_from_slice(&500u32.to_le_bytes());
    frame.extend_from_slice(&[b'a'; 100]);
    peer.write_all(&frame).await.unwrap();

    match next_event(&mut events).await {
        Event::ReadError(msg) => assert!(msg.contains("incomplete data")),
        other => panic!("expected read error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_peer_close_reports_disconnect() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    let listener = spawn(local, handler, 4096);

    peer.write_all(&direct("bye")).await.unwrap();
    drop(peer);

    assert!(matches!(next_event(&mut events).await, Event::Message(_)));
    assert!(matches!(next_event(&mut events).await, Event::Disconnect));
    listener.close().await;
}

#[tokio::test]
async fn test_handler_can_close_connection() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    *handler.close_on.lock().unwrap() = Some("last".to_string());
    let listener = spawn(local, handler, 4096);

    peer.write_all(&direct("last")).await.unwrap();
    assert!(matches!(next_event(&mut events).await, Event::Message(_)));

    // The listener task exits on its own; no disconnect callback follows
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(
        Duration::from_secs(2),
        tokio::io::AsyncReadExt::read(&mut peer, &mut buf),
    )
    .await
    .expect("stream should be shut down");
    assert_eq!(read.unwrap(), 0);

    listener.close().await;
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_no_callbacks_after_close() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    let listener = spawn(local, handler, 4096);

    listener.close().await;
    let _ = peer.write_all(&direct("too late")).await;
    drop(peer);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_panic_before_future_is_built_is_contained() {
    let (mut peer, local) = duplex(1024);
    let (events, mut rx) = mpsc::unbounded_channel();
    let handler = Arc::new(EagerPanic {
        calls: AtomicUsize::new(0),
        events,
    });
    let framed = FramedConnection::new(local, Duration::from_millis(20), 4096);
    let listener = ConnectionListener::spawn(ClientId::new(), framed, handler.clone(), 8);

    peer.write_all(&direct("first")).await.unwrap();
    match next_event(&mut rx).await {
        Event::Panic(msg) => assert!(msg.contains("before building the future")),
        other => panic!("expected panic report, got {other:?}"),
    }

    peer.write_all(&direct("second")).await.unwrap();
    match next_event(&mut rx).await {
        Event::Message(message) => assert_eq!(message.content(), Some("second")),
        other => panic!("expected message, got {other:?}"),
    }
    assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

    listener.close().await;
}

#[tokio::test]
async fn test_close_interrupts_stalled_write() {
    // The peer never reads, so a 4 KB frame cannot fit the 64 byte pipe
    let (_peer, local) = duplex(64);
    let (handler, _events) = Recorder::new();
    let listener = spawn(local, handler, 4096);

    listener
        .send(Message::DirectMessage {
            emitter: ClientId::new(),
            receiver: ClientId::new(),
            content: "x".repeat(4096),
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(2), listener.close())
        .await
        .expect("close should interrupt the pending write");
}

#[tokio::test]
async fn test_paused_listener_reads_nothing_until_resumed() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    let framed = FramedConnection::new(local, Duration::from_millis(20), 4096);
    let listener = ConnectionListener::spawn_paused(ClientId::new(), framed, handler, 8);

    peer.write_all(&direct("early")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(events.try_recv().is_err());

    listener.resume();
    match next_event(&mut events).await {
        Event::Message(message) => assert_eq!(message.content(), Some("early")),
        other => panic!("expected message, got {other:?}"),
    }

    listener.close().await;
}

#[tokio::test]
async fn test_paused_listener_closes_cleanly() {
    let (mut peer, local) = duplex(1024);
    let (handler, mut events) = Recorder::new();
    let framed = FramedConnection::new(local, Duration::from_millis(20), 4096);
    let listener = ConnectionListener::spawn_paused(ClientId::new(), framed, handler, 8);

    tokio::time::timeout(Duration::from_secs(1), listener.close())
        .await
        .expect("close should not wait for resume");

    let mut buf = [0u8; 1];
    let read = tokio::io::AsyncReadExt::read(&mut peer, &mut buf).await;
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(events.try_recv().is_err());
}

