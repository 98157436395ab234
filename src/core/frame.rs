//! Bounce frame layout.
//!
//! ```text
//! [Magic "BNCE"(4)] [Header len u32 BE(4)] [Body len u64 BE(8)] [Header(N)] [Body(M)]
//! ```
//!
//! The header is a compact JSON object with the keys `from`, `to`, `kind`
//! and `source`, in that order. Its values are opaque to the transport.

use crate::config::{MAGIC_BYTES, MAX_HEADER_BYTES, MAX_SERVER_BODY_BYTES, PREFIX_LEN};
use crate::error::{constants, BounceError, FrameSection, Result};
use crate::utils::endian::{read_u32_at, read_u64_at, u32_to_be, u64_to_be};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Envelope metadata of a bounce notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub from: String,
    pub to: String,
    pub kind: Option<String>,
    pub source: Option<String>,
}

impl Header {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            kind: None,
            source: None,
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Serialize to the compact wire text. Quotes, backslashes and control
    /// characters in field values are escaped.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Best-effort parse of received header bytes.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

/// Receiver-side bounds on declared lengths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_header_bytes: u32,
    pub max_body_bytes: u64,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: MAX_HEADER_BYTES,
            max_body_bytes: MAX_SERVER_BODY_BYTES,
        }
    }
}

impl From<&crate::config::ServerConfig> for FrameLimits {
    fn from(config: &crate::config::ServerConfig) -> Self {
        Self {
            max_header_bytes: config.max_header_bytes,
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// The two declared lengths following the magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePrefix {
    pub header_len: u32,
    pub body_len: u64,
}

impl FramePrefix {
    /// Check a 4-byte magic marker
    pub fn check_magic(magic: [u8; 4]) -> Result<()> {
        if magic == MAGIC_BYTES {
            Ok(())
        } else {
            Err(BounceError::BadMagic(magic))
        }
    }

    /// Decode the 12 length bytes following the magic and validate them
    /// against `limits`.
    pub fn from_length_bytes(bytes: [u8; 12], limits: &FrameLimits) -> Result<Self> {
        let truncated = || BounceError::Truncated(FrameSection::Prefix);
        let prefix = Self {
            header_len: read_u32_at(&bytes, 0).ok_or_else(truncated)?,
            body_len: read_u64_at(&bytes, 4).ok_or_else(truncated)?,
        };
        prefix.validate(limits)?;
        Ok(prefix)
    }

    /// Header must be nonempty and within bounds; body may be empty.
    pub fn validate(&self, limits: &FrameLimits) -> Result<()> {
        if self.header_len == 0
            || self.header_len > limits.max_header_bytes
            || self.body_len > limits.max_body_bytes
        {
            return Err(BounceError::InvalidLength {
                header_len: self.header_len,
                body_len: self.body_len,
            });
        }
        Ok(())
    }

    /// Encode magic and both lengths
    pub fn to_bytes(&self) -> [u8; PREFIX_LEN] {
        let mut out = [0u8; PREFIX_LEN];
        out[..4].copy_from_slice(&MAGIC_BYTES);
        out[4..8].copy_from_slice(&u32_to_be(self.header_len));
        out[8..].copy_from_slice(&u64_to_be(self.body_len));
        out
    }

    /// Payload bytes that follow the prefix
    pub fn payload_len(&self) -> u64 {
        u64::from(self.header_len).saturating_add(self.body_len)
    }
}

/// One frame: serialized header bytes plus raw body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

impl Frame {
    /// Build a frame from a header and body. Body size limits are not
    /// checked here.
    pub fn new(header: &Header, body: Vec<u8>) -> Result<Self> {
        Ok(Self {
            header: header.to_json()?.into_bytes(),
            body,
        })
    }

    pub fn prefix(&self) -> Result<FramePrefix> {
        let header_len = u32::try_from(self.header.len())
            .map_err(|_| BounceError::SendError(constants::ERR_HEADER_TOO_LARGE.into()))?;
        Ok(FramePrefix {
            header_len,
            body_len: self.body.len() as u64,
        })
    }

    /// Total encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        PREFIX_LEN + self.header.len() + self.body.len()
    }

    /// Encode into a freshly allocated buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let prefix = self.prefix()?;
        let len = self.encoded_len();

        let mut out = Vec::new();
        out.try_reserve_exact(len)
            .map_err(|_| BounceError::OutOfMemory(len))?;
        out.extend_from_slice(&prefix.to_bytes());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    /// Header as text, lossily decoded
    pub fn header_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.header)
    }

    /// Header parsed back into fields, if it is a well-formed header object
    pub fn parsed_header(&self) -> Option<Header> {
        Header::parse(&self.header)
    }
}

/// Encode a header and body into wire bytes
pub fn encode(header: &Header, body: &[u8]) -> Result<Vec<u8>> {
    let header_json = header.to_json()?;
    let frame = Frame {
        header: header_json.into_bytes(),
        body: body.to_vec(),
    };
    frame.to_bytes()
}
