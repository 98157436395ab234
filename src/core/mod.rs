//! # Core Protocol Components
//!
//! Frame layout and codec. No network I/O happens here.
//!
//! ## Components
//! - **Frame**: header/body model, prefix validation and encoding
//! - **Codec**: `tokio_util` codec plus exact-read async decoding
//!
//! ## Wire Format
//! ```text
//! [Magic "BNCE"(4)] [Header len u32 BE(4)] [Body len u64 BE(8)] [Header(N)] [Body(M)]
//! ```
//!
//! ## Security
//! - Header length must be nonzero and at most 16 KB by default
//! - Body length at most 2 MB by default on the receiving side
//! - Length validation before allocation

pub mod codec;
pub mod frame;

pub use codec::{decode_bytes, read_frame, FrameCodec};
pub use frame::{encode, Frame, FrameLimits, FramePrefix, Header};
