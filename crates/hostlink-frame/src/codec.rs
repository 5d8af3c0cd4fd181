use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::tag::Tag;

/// Frame header: length (4) + tag (1) = 5 bytes.
///
/// The length delimits commands on byte-stream transports; it is never part
/// of a payload.
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One protocol command: a tag and its tag-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// What kind of command this is.
    pub tag: Tag,
    /// The command payload, exactly as carried on the wire.
    pub payload: Bytes,
}

impl Command {
    /// Create a new command.
    pub fn new(tag: Tag, payload: impl Into<Bytes>) -> Self {
        Self {
            tag,
            payload: payload.into(),
        }
    }

    /// Create a command without payload.
    pub fn empty(tag: Tag) -> Self {
        Self::new(tag, Bytes::new())
    }

    /// The total wire size of this command (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a command into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────────┬──────────┬─────────────────┐
/// │ Length       │ Tag      │ Payload          │
/// │ (4B LE)      │ (1B)     │ (Length bytes)   │
/// └──────────────┴──────────┴─────────────────┘
/// ```
pub fn encode_frame(tag: Tag, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u32_le(payload.len() as u32);
    dst.put_u8(tag.as_u8());
    dst.put_slice(payload);
    Ok(())
}

/// Decode a command from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Command>> {
    if src.len() < HEADER_SIZE {
        return Ok(None); // Need more data
    }

    let payload_len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
    let tag = Tag::from(src[4]);

    if payload_len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None); // Need more data
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Command { tag, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
