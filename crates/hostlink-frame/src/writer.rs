use std::io::{ErrorKind, Write};

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::codec::{encode_frame, Command, FrameConfig};
use crate::error::{FrameError, Result};
use crate::tag::Tag;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete commands to any `Write` stream.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete command (blocking).
    pub fn write_command(&mut self, command: &Command) -> Result<()> {
        self.send(command.tag, command.payload.as_ref())
    }

    /// Encode and send a payload under a tag.
    ///
    /// The whole frame is written and flushed before returning, so frames
    /// from one writer never interleave on the wire.
    pub fn send(&mut self, tag: Tag, payload: &[u8]) -> Result<()> {
        let max = self.config.max_payload_size;
        if payload.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max,
            });
        }

        self.buf.clear();
        encode_frame(tag, payload, &mut self.buf)?;
        self.drain()?;
        trace!(%tag, size = payload.len(), "frame written");
        self.flush()
    }

    /// Write out everything encoded into the buffer.
    fn drain(&mut self) -> Result<()> {
        while self.buf.has_remaining() {
            match self.inner.write(self.buf.chunk()) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => self.buf.advance(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
