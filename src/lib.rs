//! # bounce-notify
//!
//! Delivers one bounce notification per connection: a JSON header and a raw
//! body packed into a length-prefixed frame, sent over TCP, and confirmed by
//! an explicit `"OK\n"` acknowledgement from the receiver.
//!
//! ## Modules
//! - [`core`]: frame layout and codec (no I/O)
//! - [`transport`]: client, reference server and address resolution
//! - [`config`]: limits, defaults and TOML/environment configuration
//! - [`error`]: error type, classification and exit codes
//! - [`utils`]: endian helpers, logging, metrics, timeouts
//!
//! ## Example
//! ```rust,no_run
//! use bounce_notify::{send, Header};
//! use std::time::Duration;
//!
//! # async fn run() -> bounce_notify::error::Result<()> {
//! let header = Header::new("MAILER-DAEMON@mx.example.com", "bounces@example.com");
//! send("127.0.0.1:32147", &header, b"hello".to_vec(), Duration::from_secs(10)).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod transport;
pub mod utils;

pub use crate::core::{Frame, FrameCodec, FrameLimits, Header};
pub use crate::error::{BounceError, ErrorClass, RejectReason, Result};
pub use crate::transport::client::{read_body, send, BounceClient, ClientState, SendReport};
pub use crate::transport::server::{
    serve, ExchangeObserver, ExchangeOutcome, ReceivedFrame, ReferenceServer, ServerEvent,
    ServerState, StatusLines,
};
