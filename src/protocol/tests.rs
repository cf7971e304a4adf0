// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use tokio::io::{duplex, AsyncWriteExt};

use crate::core::id::ClientId;
use crate::error::ProtocolError;
use crate::protocol::handshake::*;

const TIMEOUT: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_identity_handshake_flow() {
    let (mut client, mut server) = duplex(64);
    let id = ClientId::new();

    send_client_id(&mut client, id)
        .await
        .expect("Client should send its identity");
    let received = read_client_id(&mut server, TIMEOUT)
        .await
        .expect("Server should read the identity");

    assert_eq!(received, id, "Server must see the identity the client sent");
}

#[tokio::test]
async fn test_handshake_split_across_writes() {
    let (mut client, mut server) = duplex(64);
    let id = ClientId::new();
    let bytes = *id.as_bytes();

    let writer = tokio::spawn(async move {
        client.write_all(&bytes[..5]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(&bytes[5..]).await.unwrap();
        client
    });

    assert_eq!(read_client_id(&mut server, TIMEOUT).await.unwrap(), id);
    drop(writer.await.unwrap());
}

#[tokio::test]
async fn test_silent_client_times_out() {
    let (_client, mut server) = duplex(64);

    let result = read_client_id(&mut server, TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::HandshakeTimeout)));
}

#[tokio::test]
async fn test_partial_identity_then_silence() {
    let (mut client, mut server) = duplex(64);
    client.write_all(&[7u8; 6]).await.unwrap();

    let result = read_client_id(&mut server, TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::IncompleteHandshake(6))));
}

#[tokio::test]
async fn test_partial_identity_then_close() {
    let (mut client, mut server) = duplex(64);
    client.write_all(&[7u8; 10]).await.unwrap();
    drop(client);

    let result = read_client_id(&mut server, TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::IncompleteHandshake(10))));
}

#[tokio::test]
async fn test_nil_identity_rejected() {
    let (mut client, mut server) = duplex(64);
    client.write_all(&[0u8; 16]).await.unwrap();

    let result = read_client_id(&mut server, TIMEOUT).await;
    assert!(matches!(result, Err(ProtocolError::HandshakeFailure(_))));
}

#[tokio::test]
async fn test_trailing_bytes_left_on_stream() {
    use tokio::io::AsyncReadExt;

    let (mut client, mut server) = duplex(64);
    let id = ClientId::new();
    client.write_all(id.as_bytes()).await.unwrap();
    client.write_all(b"next").await.unwrap();

    assert_eq!(read_client_id(&mut server, TIMEOUT).await.unwrap(), id);

    let mut rest = [0u8; 4];
    server.read_exact(&mut rest).await.unwrap();
    assert_eq!(&rest, b"next");
}
