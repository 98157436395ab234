//! End-to-end exchanges between the client and the reference server, plus
//! hand-written peers that misbehave on either side.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::time::Duration;

use bounce_notify::config::{ClientConfig, ServerConfig, EX_TEMPFAIL};
use bounce_notify::transport::resolver::StaticResolver;
use bounce_notify::core::{read_frame, FrameLimits};
use bounce_notify::utils::global_metrics;
use bounce_notify::{
    BounceClient, BounceError, ClientState, ExchangeOutcome, Header, RejectReason,
    ReferenceServer, ServerState, StatusLines,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn local_server(read_timeout: Option<Duration>) -> ReferenceServer {
    let config = ServerConfig {
        listen_address: "127.0.0.1:0".into(),
        read_timeout,
        ..ServerConfig::default()
    };
    ReferenceServer::bind(&config).await.expect("bind loopback")
}

fn client_for(addr: SocketAddr, timeout: Duration) -> BounceClient {
    BounceClient::new(ClientConfig {
        server_address: addr.to_string(),
        timeout,
        ..ClientConfig::default()
    })
}

/// Connect, write `bytes`, half-close and collect whatever the server replies.
async fn raw_peer(addr: SocketAddr, bytes: Vec<u8>) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(&bytes).await.unwrap();
    let _ = stream.shutdown().await;
    let mut reply = Vec::new();
    let _ = stream.read_to_end(&mut reply).await;
    reply
}

fn raw_prefix(magic: &[u8; 4], header_len: u32, body_len: u64) -> Vec<u8> {
    let mut out = magic.to_vec();
    out.extend_from_slice(&header_len.to_be_bytes());
    out.extend_from_slice(&body_len.to_be_bytes());
    out
}

fn rejection(outcome: &ExchangeOutcome) -> (RejectReason, ServerState) {
    match outcome {
        ExchangeOutcome::Rejected { reason, stage, .. } => (*reason, *stage),
        ExchangeOutcome::Accepted(frame) => panic!("unexpectedly accepted: {frame:?}"),
    }
}

#[tokio::test]
async fn test_hello_round_trip() {
    let server = local_server(None).await;
    let addr = server.local_addr();
    let mut lines = StatusLines::new(Vec::new());
    let mut client = client_for(addr, Duration::from_secs(5));
    let header = Header::new("a@x.com", "b@y.com");

    let (outcome, sent) = tokio::join!(
        server.serve_one(&mut lines),
        client.send(&header, b"hello".to_vec())
    );

    let report = sent.expect("client delivery");
    assert_eq!(report.peer, addr);
    assert_eq!(report.bytes_sent, 16 + 59 + 5);
    assert_eq!(client.state(), ClientState::Done);

    let ExchangeOutcome::Accepted(frame) = outcome else {
        panic!("server rejected the frame");
    };
    assert_eq!(frame.header_len, 59);
    assert_eq!(frame.body, b"hello");
    assert_eq!(frame.body_len(), 5);
    assert_eq!(frame.header, Some(header));

    let text = String::from_utf8(lines.into_inner()).unwrap();
    assert_eq!(
        text,
        format!(
            "LISTENING {addr}\n\
             FRAME header_len=59 body_len=5\n\
             HEADER {{\"from\":\"a@x.com\",\"to\":\"b@y.com\",\"kind\":null,\"source\":null}}\n\
             RESULT ok\n"
        )
    );
    assert!(global_metrics().snapshot().acks_received >= 1);
}

#[tokio::test]
async fn test_tagged_header_reaches_server() {
    let server = local_server(None).await;
    let mut client = client_for(server.local_addr(), Duration::from_secs(5));
    let header = Header::new("bounces@example.com", "user@example.net")
        .with_kind("dsn")
        .with_source("mx1");

    let (outcome, sent) = tokio::join!(
        server.serve_one(()),
        client.send(&header, b"Content-Type: message/delivery-status\r\n".to_vec())
    );
    sent.unwrap();
    let ExchangeOutcome::Accepted(frame) = outcome else {
        panic!("rejected");
    };
    assert_eq!(frame.header, Some(header));
    assert!(frame.header_text.contains(r#""kind":"dsn""#));
}

#[tokio::test]
async fn test_empty_body_round_trip() {
    let server = local_server(None).await;
    let mut client = client_for(server.local_addr(), Duration::from_secs(5));

    let header = Header::new("a", "b");
    let (outcome, sent) = tokio::join!(
        server.serve_one(()),
        client.send(&header, Vec::new())
    );
    sent.unwrap();
    let ExchangeOutcome::Accepted(frame) = outcome else {
        panic!("rejected");
    };
    assert_eq!(frame.body_len(), 0);
}

#[tokio::test]
async fn test_server_rejects_bad_magic_without_ack() {
    let server = local_server(None).await;
    let addr = server.local_addr();
    let mut lines = StatusLines::new(Vec::new());

    let mut bytes = raw_prefix(b"XXXX", 5, 0);
    bytes.extend_from_slice(b"hello");
    let (outcome, reply) = tokio::join!(server.serve_one(&mut lines), raw_peer(addr, bytes));

    assert_eq!(
        rejection(&outcome),
        (RejectReason::BadMagic, ServerState::ReadingPrefix)
    );
    assert!(reply.is_empty());
    let text = String::from_utf8(lines.into_inner()).unwrap();
    assert!(text.ends_with("REJECTED bad_magic\n"));
    assert!(!text.contains("RESULT ok"));
}

#[tokio::test]
async fn test_server_rejects_zero_header() {
    let server = local_server(None).await;
    let addr = server.local_addr();

    let (outcome, reply) = tokio::join!(
        server.serve_one(()),
        raw_peer(addr, raw_prefix(b"BNCE", 0, 0))
    );
    assert_eq!(rejection(&outcome).0, RejectReason::InvalidLength);
    assert!(reply.is_empty());
}

#[tokio::test]
async fn test_server_rejects_huge_declared_body() {
    let server = local_server(None).await;
    let addr = server.local_addr();

    let (outcome, reply) = tokio::join!(
        server.serve_one(()),
        raw_peer(addr, raw_prefix(b"BNCE", 10, u64::MAX))
    );
    let ExchangeOutcome::Rejected { reason, error, .. } = outcome else {
        panic!("accepted");
    };
    assert_eq!(reason, RejectReason::InvalidLength);
    assert!(matches!(error, BounceError::InvalidLength { body_len: u64::MAX, .. }));
    assert!(reply.is_empty());
}

#[tokio::test]
async fn test_server_reports_truncated_prefix() {
    let server = local_server(None).await;
    let addr = server.local_addr();

    let (outcome, _) = tokio::join!(server.serve_one(()), raw_peer(addr, b"BNCE\x00\x00".to_vec()));
    assert_eq!(
        rejection(&outcome),
        (RejectReason::Truncated, ServerState::ReadingPrefix)
    );
}

#[tokio::test]
async fn test_server_reports_truncated_body() {
    let server = local_server(None).await;
    let addr = server.local_addr();

    let mut bytes = raw_prefix(b"BNCE", 2, 5);
    bytes.extend_from_slice(b"{}he");
    let (outcome, reply) = tokio::join!(server.serve_one(()), raw_peer(addr, bytes));
    assert_eq!(
        rejection(&outcome),
        (RejectReason::Truncated, ServerState::ReadingPayload)
    );
    assert!(reply.is_empty());
}

#[tokio::test]
async fn test_server_read_timeout() {
    let server = local_server(Some(Duration::from_millis(200))).await;
    let addr = server.local_addr();

    let idle_peer = async {
        let stream = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(stream);
    };
    let (outcome, ()) = tokio::join!(server.serve_one(()), idle_peer);
    assert_eq!(
        rejection(&outcome),
        (RejectReason::Timeout, ServerState::ReadingPrefix)
    );
}

/// A receiver that reads one frame and answers with `reply`, or with nothing
/// and an immediate close when `reply` is `None`.
async fn fake_receiver(listener: TcpListener, reply: Option<&'static [u8]>) {
    let (mut stream, _) = listener.accept().await.unwrap();
    read_frame(&mut stream, &FrameLimits::default()).await.unwrap();
    if let Some(reply) = reply {
        stream.write_all(reply).await.unwrap();
    }
    let _ = stream.shutdown().await;
}

#[tokio::test]
async fn test_client_rejects_bad_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(listener.local_addr().unwrap(), Duration::from_secs(5));

    let header = Header::new("a", "b");
    let (_, sent) = tokio::join!(
        fake_receiver(listener, Some(b"NO\n")),
        client.send(&header, b"hello".to_vec())
    );
    let err = sent.unwrap_err();
    assert!(matches!(err, BounceError::BadAck(ack) if &ack == b"NO\n"));
    assert_eq!(err.exit_code(), EX_TEMPFAIL);
    assert_eq!(client.state(), ClientState::Failed);
}

#[tokio::test]
async fn test_client_rejects_short_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(listener.local_addr().unwrap(), Duration::from_secs(5));

    let header = Header::new("a", "b");
    let (_, sent) = tokio::join!(
        fake_receiver(listener, Some(b"OK")),
        client.send(&header, b"hello".to_vec())
    );
    assert!(matches!(sent.unwrap_err(), BounceError::NoAck(_)));
}

#[tokio::test]
async fn test_client_fails_when_receiver_closes_without_ack() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(listener.local_addr().unwrap(), Duration::from_secs(5));

    let header = Header::new("a", "b");
    let (_, sent) = tokio::join!(
        fake_receiver(listener, None),
        client.send(&header, b"hello".to_vec())
    );
    let err = sent.unwrap_err();
    assert!(matches!(err, BounceError::NoAck(_)));
    assert_eq!(err.exit_code(), EX_TEMPFAIL);
}

#[tokio::test]
async fn test_client_ack_wait_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(listener.local_addr().unwrap(), Duration::from_secs(1));

    let silent_receiver = async {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream, &FrameLimits::default()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        drop(stream);
    };
    let header = Header::new("a", "b");
    let ((), sent) = tokio::join!(
        silent_receiver,
        client.send(&header, b"hello".to_vec())
    );
    assert!(matches!(sent.unwrap_err(), BounceError::NoAck(_)));
}

#[tokio::test]
async fn test_client_connection_refused() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut client = client_for(addr, Duration::from_secs(2));
    let err = client
        .send(&Header::new("a", "b"), b"hello".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, BounceError::ConnectError { .. }));
    assert_eq!(err.exit_code(), EX_TEMPFAIL);
}

#[tokio::test]
async fn test_client_tries_candidates_in_order() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let server = local_server(None).await;
    let live = server.local_addr();

    let config = ClientConfig {
        server_address: "bounce.test:32147".into(),
        timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    };
    let mut client = BounceClient::with_resolver(config, StaticResolver::new(vec![closed, live]));
    let header = Header::new("a", "b");

    let (outcome, sent) = tokio::join!(
        server.serve_one(()),
        client.send(&header, b"hello".to_vec())
    );
    let report = sent.expect("second candidate accepts");
    assert_eq!(report.peer, live);
    assert!(outcome.is_accepted());
}

#[tokio::test]
async fn test_client_rejects_address_without_port() {
    let mut client = BounceClient::new(ClientConfig {
        server_address: "localhost".into(),
        ..ClientConfig::default()
    });
    let err = client
        .send(&Header::new("a", "b"), b"hello".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, BounceError::ResolutionError { .. }));
    assert_eq!(err.exit_code(), EX_TEMPFAIL);
}

#[tokio::test]
async fn test_oversized_body_is_not_sent() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut client = client_for(listener.local_addr().unwrap(), Duration::from_secs(1));

    let err = client
        .send(&Header::new("a", "b"), vec![b'x'; 50 * 1024 + 1])
        .await
        .unwrap_err();
    assert!(matches!(err, BounceError::BodyTooLarge { len: 51201, max: 51200 }));

    // Nothing ever connected.
    let accepted = tokio::time::timeout(Duration::from_millis(200), listener.accept()).await;
    assert!(accepted.is_err());
}
