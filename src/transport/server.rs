//! # Reference Server
//!
//! Single-shot receiver used to exercise the client end to end. It accepts
//! exactly one connection, reads exactly one frame, acknowledges it and
//! closes everything.
//!
//! ```text
//! Listening -> Accepted -> ReadingPrefix -> ReadingPayload -> Acking -> Closed
//!                     any state may end in Rejected(reason)
//! ```
//!
//! Progress is reported to an [`ExchangeObserver`]; [`StatusLines`] renders
//! it as the line protocol test harnesses read from stdout:
//!
//! ```text
//! LISTENING 127.0.0.1:32147
//! FRAME header_len=59 body_len=5
//! HEADER {"from":"a@x.com","to":"b@y.com","kind":null,"source":null}
//! RESULT ok
//! ```

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ServerConfig, ACK_BYTES};
use crate::core::codec::{read_payload, read_prefix};
use crate::core::frame::{FrameLimits, Header};
use crate::error::{BounceError, ErrorClass, RejectReason, Result};
use crate::transport::resolver::{Resolver, SystemResolver};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::with_optional_timeout;

/// Server exchange state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Accepted,
    ReadingPrefix,
    ReadingPayload,
    Acking,
    Closed,
    Rejected(RejectReason),
}

/// A frame that was fully received and acknowledged
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub peer: SocketAddr,
    pub header_len: u32,
    pub header_text: String,
    /// Header fields, when the header text is a well-formed header object
    pub header: Option<Header>,
    pub body: Vec<u8>,
}

impl ReceivedFrame {
    pub fn body_len(&self) -> u64 {
        self.body.len() as u64
    }
}

/// Result of one [`ReferenceServer::serve_one`] call
#[derive(Debug)]
pub enum ExchangeOutcome {
    Accepted(ReceivedFrame),
    Rejected {
        reason: RejectReason,
        /// State the exchange was in when it failed
        stage: ServerState,
        error: BounceError,
    },
}

impl ExchangeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ExchangeOutcome::Accepted(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            ExchangeOutcome::Accepted(_) => None,
            ExchangeOutcome::Rejected { reason, .. } => Some(*reason),
        }
    }
}

/// Progress events emitted while serving an exchange
#[derive(Debug)]
pub enum ServerEvent<'a> {
    Listening(SocketAddr),
    Accepted(SocketAddr),
    Frame { header_len: u32, body_len: u64 },
    Header(&'a str),
    Acked,
    Rejected {
        reason: RejectReason,
        stage: ServerState,
        error: &'a BounceError,
    },
}

/// Sink for server progress. Observers never influence the exchange.
pub trait ExchangeObserver {
    fn on_event(&mut self, event: &ServerEvent<'_>);
}

impl ExchangeObserver for () {
    fn on_event(&mut self, _event: &ServerEvent<'_>) {}
}

impl<O: ExchangeObserver + ?Sized> ExchangeObserver for &mut O {
    fn on_event(&mut self, event: &ServerEvent<'_>) {
        (**self).on_event(event)
    }
}

/// Writes one status line per event, flushing after each.
#[derive(Debug)]
pub struct StatusLines<W: Write> {
    out: W,
}

impl<W: Write> StatusLines<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn line(&mut self, event: &ServerEvent<'_>) -> std::io::Result<()> {
        match event {
            ServerEvent::Listening(addr) => writeln!(self.out, "LISTENING {addr}")?,
            ServerEvent::Accepted(_) => return Ok(()),
            ServerEvent::Frame {
                header_len,
                body_len,
            } => writeln!(self.out, "FRAME header_len={header_len} body_len={body_len}")?,
            ServerEvent::Header(text) => writeln!(self.out, "HEADER {text}")?,
            ServerEvent::Acked => writeln!(self.out, "RESULT ok")?,
            ServerEvent::Rejected { reason, .. } => writeln!(self.out, "REJECTED {reason}")?,
        }
        self.out.flush()
    }
}

impl<W: Write> ExchangeObserver for StatusLines<W> {
    fn on_event(&mut self, event: &ServerEvent<'_>) {
        if let Err(e) = self.line(event) {
            warn!(error = %e, "Failed to write status line");
        }
    }
}

/// Bound, not yet accepted, reference server
#[derive(Debug)]
pub struct ReferenceServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    limits: FrameLimits,
    read_timeout: Option<Duration>,
}

fn bind_error(address: &str, reason: impl Into<String>) -> BounceError {
    BounceError::BindError {
        address: address.to_string(),
        reason: reason.into(),
    }
}

impl ReferenceServer {
    /// Bind and listen on `config.listen_address` with a backlog of one.
    #[instrument(skip(config), fields(listen = %config.listen_address))]
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let address = config.listen_address.as_str();
        let candidates = SystemResolver
            .resolve(address)
            .await
            .map_err(|e| bind_error(address, e.to_string()))?;

        let mut last_error = String::new();
        for addr in candidates {
            match listen_on(addr) {
                Ok(listener) => {
                    let local_addr = listener
                        .local_addr()
                        .map_err(|e| bind_error(address, e.to_string()))?;
                    info!(local = %local_addr, "Reference server listening");
                    return Ok(Self {
                        listener,
                        local_addr,
                        limits: FrameLimits::from(config),
                        read_timeout: config.read_timeout,
                    });
                }
                Err(e) => {
                    debug!(addr = %addr, error = %e, "Bind attempt failed");
                    last_error = e.to_string();
                }
            }
        }

        Err(bind_error(address, last_error))
    }

    /// Address actually bound (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one connection and run one exchange on it. The listener is
    /// closed as soon as the connection is accepted.
    #[instrument(skip(self, observer), fields(local = %self.local_addr))]
    pub async fn serve_one<O: ExchangeObserver>(self, mut observer: O) -> ExchangeOutcome {
        let Self {
            listener,
            local_addr,
            limits,
            read_timeout,
        } = self;
        observer.on_event(&ServerEvent::Listening(local_addr));

        let accepted = listener.accept().await;
        drop(listener);
        let (mut stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                return reject(
                    &mut observer,
                    ServerState::Listening,
                    RejectReason::Accept,
                    BounceError::Io(e),
                )
            }
        };
        info!(peer = %peer, "Connection accepted");
        observer.on_event(&ServerEvent::Accepted(peer));
        let mut state = ServerState::Accepted;
        debug!(state = ?state, "Server state transition");

        state = ServerState::ReadingPrefix;
        let prefix = match with_optional_timeout(read_prefix(&mut stream, &limits), read_timeout)
            .await
        {
            Ok(prefix) => prefix,
            Err(e) => return reject_with(&mut observer, state, e),
        };
        debug!(
            header_len = prefix.header_len,
            body_len = prefix.body_len,
            "Frame prefix accepted"
        );

        state = ServerState::ReadingPayload;
        let frame = match with_optional_timeout(read_payload(&mut stream, &prefix), read_timeout)
            .await
        {
            Ok(frame) => frame,
            Err(e) => return reject_with(&mut observer, state, e),
        };
        global_metrics().frame_received(frame.encoded_len() as u64);

        let header_text = frame.header_text().into_owned();
        observer.on_event(&ServerEvent::Frame {
            header_len: prefix.header_len,
            body_len: prefix.body_len,
        });
        observer.on_event(&ServerEvent::Header(&header_text));
        info!(
            header_len = prefix.header_len,
            body_len = prefix.body_len,
            "Frame received"
        );

        state = ServerState::Acking;
        let acked = with_optional_timeout(
            async {
                stream.write_all(&ACK_BYTES).await?;
                stream.flush().await?;
                Ok::<(), BounceError>(())
            },
            read_timeout,
        )
        .await;
        if let Err(e) = acked {
            let err = BounceError::AckWriteError(e.to_string());
            return reject(&mut observer, state, RejectReason::AckWriteError, err);
        }
        global_metrics().ack_sent();
        let _ = stream.shutdown().await;
        drop(stream);

        observer.on_event(&ServerEvent::Acked);
        debug!(state = ?ServerState::Closed, "Server state transition");

        ExchangeOutcome::Accepted(ReceivedFrame {
            peer,
            header_len: prefix.header_len,
            header: frame.parsed_header(),
            header_text,
            body: frame.body,
        })
    }
}

fn listen_on(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1)
}

fn reject_with<O: ExchangeObserver>(
    observer: &mut O,
    stage: ServerState,
    error: BounceError,
) -> ExchangeOutcome {
    let reason = RejectReason::from(&error);
    reject(observer, stage, reason, error)
}

fn reject<O: ExchangeObserver>(
    observer: &mut O,
    stage: ServerState,
    reason: RejectReason,
    error: BounceError,
) -> ExchangeOutcome {
    global_metrics().rejection();
    global_metrics().failure(error.class());
    if error.class() == ErrorClass::Protocol {
        error!(reason = %reason, stage = ?stage, error = %error, "Peer sent a malformed frame");
    } else {
        warn!(reason = %reason, stage = ?stage, error = %error, "Exchange rejected");
    }

    observer.on_event(&ServerEvent::Rejected {
        reason,
        stage,
        error: &error,
    });
    debug!(state = ?ServerState::Rejected(reason), "Server state transition");

    ExchangeOutcome::Rejected {
        reason,
        stage,
        error,
    }
}

/// Bind `listen_address` with default limits and serve one exchange,
/// reporting status lines on stdout.
pub async fn serve(listen_address: &str) -> Result<ExchangeOutcome> {
    let config = ServerConfig {
        listen_address: listen_address.to_string(),
        ..ServerConfig::default()
    };
    let server = ReferenceServer::bind(&config).await?;
    Ok(server
        .serve_one(StatusLines::new(std::io::stdout()))
        .await)
}
