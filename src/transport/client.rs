//! # Bounce Client
//!
//! Sends one frame to the receiver and waits for its acknowledgement.
//!
//! ```text
//! Idle -> Resolving -> Connecting -> Sending -> AwaitingAck -> Done
//!   \________\____________\____________\____________\-------> Failed
//! ```
//!
//! Every call opens at most one connection and performs exactly one attempt.
//! The connection is owned by the call and closed on every exit path. Retry
//! policy belongs to the caller (the MTA re-queues on `EX_TEMPFAIL`).

use futures::SinkExt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ClientConfig, ACK_BYTES};
use crate::core::codec::FrameCodec;
use crate::core::frame::{Frame, Header};
use crate::error::{constants, BounceError, ErrorClass, Result};
use crate::transport::resolver::{Resolver, SystemResolver};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_timeout_error;

/// Client exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Resolving,
    Connecting,
    Sending,
    AwaitingAck,
    Done,
    Failed,
}

/// Summary of a completed delivery
#[derive(Debug, Clone)]
pub struct SendReport {
    /// Endpoint that accepted the connection
    pub peer: SocketAddr,
    /// Frame bytes written
    pub bytes_sent: usize,
    /// Wall time from resolution to ACK
    pub elapsed: Duration,
}

/// Single-shot sender
pub struct BounceClient<R = SystemResolver> {
    config: ClientConfig,
    resolver: R,
    state: ClientState,
}

impl BounceClient<SystemResolver> {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_resolver(config, SystemResolver)
    }
}

impl<R: Resolver> BounceClient<R> {
    pub fn with_resolver(config: ClientConfig, resolver: R) -> Self {
        Self {
            config,
            resolver,
            state: ClientState::Idle,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// State reached by the last call to [`send`](Self::send)
    pub fn state(&self) -> ClientState {
        self.state
    }

    fn transition(&mut self, next: ClientState) {
        debug!(from = ?self.state, to = ?next, "Client state transition");
        self.state = next;
    }

    /// Deliver `header` and `body` to the configured server.
    ///
    /// Returns once the receiver has acknowledged the frame. A body larger
    /// than `max_body_bytes` fails before any connection is opened.
    #[instrument(
        skip(self, header, body),
        fields(server = %self.config.server_address, body_len = body.len())
    )]
    pub async fn send(&mut self, header: &Header, body: Vec<u8>) -> Result<SendReport> {
        self.state = ClientState::Idle;
        let target = self.config.server_address.clone();

        match self.exchange(&target, header, body).await {
            Ok(report) => {
                self.transition(ClientState::Done);
                info!(
                    peer = %report.peer,
                    bytes = report.bytes_sent,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Bounce delivered"
                );
                Ok(report)
            }
            Err(err) => {
                let failed_in = self.state;
                self.transition(ClientState::Failed);
                global_metrics().failure(err.class());
                if err.class() == ErrorClass::Protocol {
                    error!(
                        class = err.class().as_str(),
                        state = ?failed_in,
                        error = %err,
                        "Receiver spoke an unexpected protocol"
                    );
                } else {
                    warn!(
                        class = err.class().as_str(),
                        state = ?failed_in,
                        error = %err,
                        "Bounce delivery failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn exchange(
        &mut self,
        target: &str,
        header: &Header,
        body: Vec<u8>,
    ) -> Result<SendReport> {
        if body.len() > self.config.max_body_bytes {
            return Err(BounceError::BodyTooLarge {
                len: body.len(),
                max: self.config.max_body_bytes,
            });
        }
        let frame = Frame::new(header, body)?;
        let timeout = self.config.timeout;
        let started = Instant::now();

        self.transition(ClientState::Resolving);
        let candidates = self.resolver.resolve(target).await?;

        self.transition(ClientState::Connecting);
        let (stream, peer) = connect_any(target, &candidates, timeout).await?;
        global_metrics().connection_opened();

        self.transition(ClientState::Sending);
        let bytes_sent = frame.encoded_len();
        let mut framed = Framed::new(stream, FrameCodec::default());
        with_timeout_error(async { framed.send(&frame).await }, timeout)
            .await
            .map_err(|e| match e {
                BounceError::Timeout => {
                    BounceError::SendError(format!("timed out after {}s", timeout.as_secs()))
                }
                BounceError::Io(io) => BounceError::SendError(io.to_string()),
                other => other,
            })?;
        global_metrics().frame_sent(bytes_sent as u64);
        debug!(bytes = bytes_sent, "Frame written");

        self.transition(ClientState::AwaitingAck);
        let mut stream = framed.into_inner();
        await_ack(&mut stream, timeout).await?;
        global_metrics().ack_received();

        // Best effort: the exchange is already complete.
        let _ = stream.shutdown().await;

        Ok(SendReport {
            peer,
            bytes_sent,
            elapsed: started.elapsed(),
        })
    }
}

/// Try each candidate in order; the first successful connect wins.
async fn connect_any(
    target: &str,
    candidates: &[SocketAddr],
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr)> {
    let mut last_error = String::from(constants::ERR_ALL_CANDIDATES_FAILED);

    for &addr in candidates {
        match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                debug!(peer = %addr, "Connected");
                return Ok((stream, addr));
            }
            Ok(Err(e)) => {
                debug!(peer = %addr, error = %e, "Connect attempt failed");
                last_error = e.to_string();
            }
            Err(_) => {
                debug!(peer = %addr, "Connect attempt timed out");
                last_error = format!("timed out after {}s", timeout.as_secs());
            }
        }
    }

    Err(BounceError::ConnectError {
        address: target.to_string(),
        reason: last_error,
    })
}

/// Read exactly three bytes and compare them with the ACK literal.
async fn await_ack<S>(stream: &mut S, timeout: Duration) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut ack = [0u8; 3];
    match tokio::time::timeout(timeout, stream.read_exact(&mut ack)).await {
        Err(_) => Err(BounceError::NoAck(format!(
            "timed out after {}s",
            timeout.as_secs()
        ))),
        Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(BounceError::NoAck(constants::ERR_PEER_CLOSED.into()))
        }
        Ok(Err(e)) => Err(BounceError::NoAck(e.to_string())),
        Ok(Ok(_)) if ack == ACK_BYTES => Ok(()),
        Ok(Ok(_)) => Err(BounceError::BadAck(ack)),
    }
}

/// Read the mail body from `reader`, refusing anything over `max_bytes`.
///
/// At most `max_bytes + 1` bytes are consumed; an oversized body is a hard
/// failure, never truncated.
pub async fn read_body<Rd>(reader: &mut Rd, max_bytes: usize) -> Result<Vec<u8>>
where
    Rd: AsyncRead + Unpin,
{
    let cap = max_bytes.saturating_add(1);
    let mut body = Vec::new();
    body.try_reserve_exact(cap)
        .map_err(|_| BounceError::OutOfMemory(cap))?;

    reader.take(cap as u64).read_to_end(&mut body).await?;

    if body.len() > max_bytes {
        return Err(BounceError::BodyTooLarge {
            len: body.len(),
            max: max_bytes,
        });
    }
    Ok(body)
}

/// Deliver one frame to `target` with the default sender limits.
pub async fn send(
    target: &str,
    header: &Header,
    body: Vec<u8>,
    timeout: Duration,
) -> Result<SendReport> {
    let config = ClientConfig {
        server_address: target.to_string(),
        timeout,
        ..ClientConfig::default()
    };
    BounceClient::new(config).send(header, body).await
}
