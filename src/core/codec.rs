//! Frame codec.
//!
//! Two decoding paths share one set of rules:
//! - [`FrameCodec`] implements `tokio_util` `Encoder`/`Decoder` over a
//!   `BytesMut` buffer, for sinks and in-memory input.
//! - [`read_prefix`], [`read_payload`] and [`read_frame`] pull exactly the
//!   declared bytes from an `AsyncRead`, never reading past the frame.
//!
//! Lengths are validated before anything is allocated for the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::PREFIX_LEN;
use crate::core::frame::{Frame, FrameLimits, FramePrefix};
use crate::error::{BounceError, FrameSection, Result};

/// Stateful frame codec; remembers a parsed prefix across partial reads.
#[derive(Debug, Default)]
pub struct FrameCodec {
    limits: FrameLimits,
    pending: Option<FramePrefix>,
}

impl FrameCodec {
    pub fn new(limits: FrameLimits) -> Self {
        Self {
            limits,
            pending: None,
        }
    }

    pub fn limits(&self) -> &FrameLimits {
        &self.limits
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = BounceError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&Frame>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a Frame> for FrameCodec {
    type Error = BounceError;

    fn encode(&mut self, item: &'a Frame, dst: &mut BytesMut) -> Result<()> {
        let prefix = item.prefix()?;
        grow_exact(dst, item.encoded_len())?;
        dst.put_slice(&prefix.to_bytes());
        dst.put_slice(&item.header);
        dst.put_slice(&item.body);
        Ok(())
    }
}

/// Make room for `additional` more bytes without aborting on allocation
/// failure. Existing contents are moved into the new buffer.
fn grow_exact(dst: &mut BytesMut, additional: usize) -> Result<()> {
    if dst.capacity() - dst.len() >= additional {
        return Ok(());
    }
    let needed = dst
        .len()
        .checked_add(additional)
        .ok_or(BounceError::OutOfMemory(usize::MAX))?;

    let mut grown = Vec::new();
    grown
        .try_reserve_exact(needed)
        .map_err(|_| BounceError::OutOfMemory(needed))?;
    grown.extend_from_slice(dst);
    *dst = BytesMut::from(Bytes::from(grown));
    Ok(())
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = BounceError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        let prefix = match self.pending {
            Some(prefix) => prefix,
            None => {
                // Magic is checked as soon as it is available so garbage is
                // never interpreted as lengths.
                if src.len() < 4 {
                    return Ok(None);
                }
                let mut magic = [0u8; 4];
                magic.copy_from_slice(&src[..4]);
                FramePrefix::check_magic(magic)?;

                if src.len() < PREFIX_LEN {
                    return Ok(None);
                }
                let mut lengths = [0u8; 12];
                lengths.copy_from_slice(&src[4..PREFIX_LEN]);
                let prefix = FramePrefix::from_length_bytes(lengths, &self.limits)?;
                src.advance(PREFIX_LEN);
                trace!(
                    header_len = prefix.header_len,
                    body_len = prefix.body_len,
                    "Frame prefix decoded"
                );
                self.pending = Some(prefix);
                prefix
            }
        };

        let header_len = prefix.header_len as usize;
        let total = usize::try_from(prefix.payload_len())
            .map_err(|_| BounceError::OutOfMemory(usize::MAX))?;

        if src.len() < total {
            return Ok(None);
        }
        let body_len = total - header_len;

        self.pending = None;
        let header = src.split_to(header_len).to_vec();
        let body = src.split_to(body_len).to_vec();
        Ok(Some(Frame { header, body }))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if self.pending.is_some() => {
                let section = match self.pending {
                    Some(p) if buf.len() < p.header_len as usize => FrameSection::Header,
                    _ => FrameSection::Body,
                };
                Err(BounceError::Truncated(section))
            }
            None if !buf.is_empty() => Err(BounceError::Truncated(FrameSection::Prefix)),
            None => Ok(None),
        }
    }
}

/// Decode one complete frame from an in-memory buffer. Trailing bytes after
/// the frame are ignored.
pub fn decode_bytes(bytes: &[u8], limits: &FrameLimits) -> Result<Frame> {
    let mut codec = FrameCodec::new(*limits);
    let mut buf = BytesMut::from(bytes);
    codec
        .decode_eof(&mut buf)?
        .ok_or(BounceError::Truncated(FrameSection::Prefix))
}

fn read_error(err: io::Error, section: FrameSection) -> BounceError {
    match err.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => BounceError::Truncated(section),
        _ => BounceError::Io(err),
    }
}

/// Read and validate magic plus both lengths. On a magic mismatch the
/// length bytes are left unread.
pub async fn read_prefix<R>(reader: &mut R, limits: &FrameLimits) -> Result<FramePrefix>
where
    R: AsyncRead + Unpin,
{
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .await
        .map_err(|e| read_error(e, FrameSection::Prefix))?;
    FramePrefix::check_magic(magic)?;

    let mut lengths = [0u8; 12];
    reader
        .read_exact(&mut lengths)
        .await
        .map_err(|e| read_error(e, FrameSection::Prefix))?;
    FramePrefix::from_length_bytes(lengths, limits)
}

fn alloc_exact(len: u64) -> Result<Vec<u8>> {
    let len = usize::try_from(len).map_err(|_| BounceError::OutOfMemory(usize::MAX))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| BounceError::OutOfMemory(len))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Read exactly the header and body declared by an already validated prefix.
pub async fn read_payload<R>(reader: &mut R, prefix: &FramePrefix) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = alloc_exact(u64::from(prefix.header_len))?;
    let mut body = alloc_exact(prefix.body_len)?;

    reader
        .read_exact(&mut header)
        .await
        .map_err(|e| read_error(e, FrameSection::Header))?;
    if !body.is_empty() {
        reader
            .read_exact(&mut body)
            .await
            .map_err(|e| read_error(e, FrameSection::Body))?;
    }

    Ok(Frame { header, body })
}

/// Read one complete frame from `reader`.
pub async fn read_frame<R>(reader: &mut R, limits: &FrameLimits) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let prefix = read_prefix(reader, limits).await?;
    read_payload(reader, &prefix).await
}
