//! # Error Types
//!
//! Error handling for the bounce notification protocol.
//!
//! Every failure the codec or either transport can hit is a variant of
//! [`BounceError`]. Variants are grouped into an [`ErrorClass`] which drives
//! both logging and the exit code reported to the invoking mail system.
//!
//! ## Error Categories
//! - **Configuration**: missing or invalid settings, detected before any I/O
//! - **Resource**: allocation failure, oversized input
//! - **Transport**: resolution, connect, send, ACK wait, timeouts, truncation
//! - **Protocol**: bad magic, invalid declared lengths, bad ACK
//!
//! ## Example Usage
//! ```rust
//! use bounce_notify::error::{BounceError, ErrorClass};
//!
//! let err = BounceError::BodyTooLarge { len: 51_201, max: 51_200 };
//! assert_eq!(err.class(), ErrorClass::Resource);
//! assert_eq!(err.exit_code(), 75);
//! ```

use std::fmt;
use std::io;
use thiserror::Error;

use crate::config::{EX_TEMPFAIL, EX_USAGE};

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    pub const ERR_MISSING_PORT: &str = "address is missing a ':port' separator";
    pub const ERR_INVALID_PORT: &str = "address port is not a valid u16";
    pub const ERR_NO_ENDPOINTS: &str = "address resolved to no endpoints";
    pub const ERR_ALL_CANDIDATES_FAILED: &str = "all resolved endpoints refused the connection";
    pub const ERR_PEER_CLOSED: &str = "peer closed the connection";
    pub const ERR_HEADER_TOO_LARGE: &str = "serialized header does not fit a u32 length";
}

/// The part of a frame that was being read when the stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSection {
    Prefix,
    Header,
    Body,
}

impl fmt::Display for FrameSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSection::Prefix => f.write_str("prefix"),
            FrameSection::Header => f.write_str("header"),
            FrameSection::Body => f.write_str("body"),
        }
    }
}

/// BounceError is the error type for every codec and transport operation
#[derive(Error, Debug)]
pub enum BounceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Header serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Bad magic: {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("Invalid lengths header={header_len} body={body_len}")]
    InvalidLength { header_len: u32, body_len: u64 },

    #[error("Frame truncated while reading {0}")]
    Truncated(FrameSection),

    #[error("Allocation of {0} bytes failed")]
    OutOfMemory(usize),

    #[error("Mail body too large: {len} bytes (limit {max})")]
    BodyTooLarge { len: usize, max: usize },

    #[error("Failed to resolve {address}: {reason}")]
    ResolutionError { address: String, reason: String },

    #[error("Failed to connect to {address}: {reason}")]
    ConnectError { address: String, reason: String },

    #[error("Failed to send frame: {0}")]
    SendError(String),

    #[error("Missing ACK from server: {0}")]
    NoAck(String),

    #[error("Invalid ACK from server: {0:02x?}")]
    BadAck([u8; 3]),

    #[error("Failed to listen on {address}: {reason}")]
    BindError { address: String, reason: String },

    #[error("Failed to write ACK: {0}")]
    AckWriteError(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using BounceError
pub type Result<T> = std::result::Result<T, BounceError>;

/// Coarse grouping of errors by how the caller should react to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Not retryable until the input is corrected.
    Configuration,
    /// Allocation failure or oversized input.
    Resource,
    /// Network trouble; retry the whole exchange later.
    Transport,
    /// Peer misconfiguration or a corrupted stream.
    Protocol,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Resource => "resource",
            ErrorClass::Transport => "transport",
            ErrorClass::Protocol => "protocol",
        }
    }
}

impl BounceError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            BounceError::ConfigError(_) => ErrorClass::Configuration,
            BounceError::OutOfMemory(_) | BounceError::BodyTooLarge { .. } => {
                ErrorClass::Resource
            }
            BounceError::BadMagic(_)
            | BounceError::InvalidLength { .. }
            | BounceError::BadAck(_)
            | BounceError::Serialization(_) => ErrorClass::Protocol,
            BounceError::Io(_)
            | BounceError::Truncated(_)
            | BounceError::ResolutionError { .. }
            | BounceError::ConnectError { .. }
            | BounceError::SendError(_)
            | BounceError::NoAck(_)
            | BounceError::BindError { .. }
            | BounceError::AckWriteError(_)
            | BounceError::Timeout => ErrorClass::Transport,
        }
    }

    /// Exit code for the client process: `EX_USAGE` for configuration
    /// errors, `EX_TEMPFAIL` for everything the caller may retry later.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Configuration => EX_USAGE,
            _ => EX_TEMPFAIL,
        }
    }
}

/// Why the reference server rejected an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Accept,
    BadMagic,
    InvalidLength,
    Truncated,
    OutOfMemory,
    AckWriteError,
    Timeout,
    Io,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::Accept => "accept",
            RejectReason::BadMagic => "bad_magic",
            RejectReason::InvalidLength => "invalid_length",
            RejectReason::Truncated => "truncated",
            RejectReason::OutOfMemory => "out_of_memory",
            RejectReason::AckWriteError => "ack_write_error",
            RejectReason::Timeout => "timeout",
            RejectReason::Io => "io",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&BounceError> for RejectReason {
    fn from(err: &BounceError) -> Self {
        match err {
            BounceError::BadMagic(_) => RejectReason::BadMagic,
            BounceError::InvalidLength { .. } => RejectReason::InvalidLength,
            BounceError::Truncated(_) => RejectReason::Truncated,
            BounceError::OutOfMemory(_) => RejectReason::OutOfMemory,
            BounceError::AckWriteError(_) => RejectReason::AckWriteError,
            BounceError::Timeout => RejectReason::Timeout,
            _ => RejectReason::Io,
        }
    }
}
