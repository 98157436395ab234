//! # Transports
//!
//! TCP transports for the single-frame exchange.
//!
//! - **client**: resolve, connect, send one frame, wait for the ACK
//! - **server**: reference receiver that validates one frame and ACKs it
//! - **resolver**: `host:port` resolution behind a substitutable trait

pub mod client;
pub mod resolver;
pub mod server;
