//! Payload field codec.
//!
//! 32-bit values are 4 bytes little-endian. Strings are UTF-8 followed by a
//! single NUL; decoding scans for the first NUL. Versions are four packed
//! bytes: major, minor, patch, build.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{FrameError, Result};

/// Version of the host plugin, as carried in the announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub build: u8,
}

impl PluginVersion {
    pub fn new(major: u8, minor: u8, patch: u8, build: u8) -> Self {
        Self {
            major,
            minor,
            patch,
            build,
        }
    }

    /// The packed wire form.
    pub fn to_bytes(self) -> [u8; 4] {
        [self.major, self.minor, self.patch, self.build]
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self::new(bytes[0], bytes[1], bytes[2], bytes[3])
    }
}

/// Formats as `major.minor.patch`.
impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Append a NUL-terminated UTF-8 string.
pub fn put_string(dst: &mut BytesMut, value: &str) -> Result<()> {
    if value.as_bytes().contains(&0) {
        return Err(FrameError::InteriorNul);
    }
    dst.reserve(value.len() + 1);
    dst.put_slice(value.as_bytes());
    dst.put_u8(0);
    Ok(())
}

/// Append a packed version.
pub fn put_version(dst: &mut BytesMut, version: PluginVersion) {
    dst.put_slice(&version.to_bytes());
}

/// Sequential reader over a command payload.
#[derive(Debug, Clone)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Start reading at `offset` instead of the beginning.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    /// Current offset into the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current offset.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8]> {
        if self.remaining() < needed {
            return Err(FrameError::Truncated {
                offset: self.pos,
                needed,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + needed];
        self.pos += needed;
        Ok(slice)
    }

    fn take4(&mut self) -> Result<[u8; 4]> {
        let bytes = self.take(4)?;
        Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take4()?))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take4()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take4()?))
    }

    pub fn read_version(&mut self) -> Result<PluginVersion> {
        Ok(PluginVersion::from_bytes(self.take4()?))
    }

    /// Read a string up to the first NUL and skip the terminator.
    pub fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        let rest = self.data.get(start..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FrameError::MissingTerminator(start))?;
        let text = std::str::from_utf8(&rest[..len]).map_err(|_| FrameError::InvalidUtf8(start))?;
        self.pos += len + 1;
        Ok(text.to_string())
    }

    /// The unread tail of the payload.
    pub fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }
}
