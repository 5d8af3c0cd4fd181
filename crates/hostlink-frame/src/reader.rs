use std::io::{ErrorKind, Read};

use bytes::{BufMut, BytesMut};
use tracing::{debug, trace};

use crate::codec::{decode_frame, Command, FrameConfig};
use crate::error::{FrameError, Result};

const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Blocking command reader over any `Read` stream.
///
/// Bytes are accumulated until a whole frame is buffered, so a command split
/// across several reads is still returned in one piece. Bytes belonging to
/// the next frame stay buffered for the following call.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> FrameReader<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(READ_CHUNK_SIZE),
            config,
        }
    }

    /// Read the next complete command (blocking).
    ///
    /// End of stream yields [`FrameError::ConnectionClosed`], whether it
    /// falls between frames or inside one.
    pub fn read_command(&mut self) -> Result<Command> {
        loop {
            if let Some(command) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                trace!(tag = %command.tag, size = command.payload.len(), "frame decoded");
                return Ok(command);
            }
            if self.fill()? == 0 {
                if !self.buf.is_empty() {
                    debug!(buffered = self.buf.len(), "stream ended inside a frame");
                }
                return Err(FrameError::ConnectionClosed);
            }
        }
    }

    /// Append one read's worth of bytes to the buffer.
    fn fill(&mut self) -> Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => {
                    self.buf.put_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Bytes received but not yet returned as a command.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::codec::encode_frame;
    use crate::tag::Tag;

    #[test]
    fn read_single_command() {
        let mut wire = BytesMut::new();
        encode_frame(Tag::Print, b"hello\0", &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let command = reader.read_command().unwrap();

        assert_eq!(command.tag, Tag::Print);
        assert_eq!(command.payload.as_ref(), b"hello\0");
    }

    #[test]
    fn read_multiple_commands_in_order() {
        let mut wire = BytesMut::new();
        encode_frame(Tag::Tick, b"", &mut wire).unwrap();
        encode_frame(Tag::Pong, b"", &mut wire).unwrap();
        encode_frame(Tag::Response, &[0], &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));

        assert_eq!(reader.read_command().unwrap().tag, Tag::Tick);
        assert_eq!(reader.read_command().unwrap().tag, Tag::Pong);
        let response = reader.read_command().unwrap();
        assert_eq!(response.tag, Tag::Response);
        assert_eq!(response.payload.as_ref(), &[0]);
    }

    #[test]
    fn read_command_with_large_payload() {
        let payload = vec![0xAB; 64 * 1024];
        let mut wire = BytesMut::new();
        encode_frame(Tag::InvokeNative, &payload, &mut wire).unwrap();

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        let command = reader.read_command().unwrap();

        assert_eq!(command.tag, Tag::InvokeNative);
        assert_eq!(command.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn partial_read_handling() {
        let mut wire = BytesMut::new();
        encode_frame(Tag::PublicCall, b"slow\0", &mut wire).unwrap();

        let byte_reader = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut reader = FrameReader::new(byte_reader);

        let command = reader.read_command().unwrap();
        assert_eq!(command.tag, Tag::PublicCall);
        assert_eq!(command.payload.as_ref(), b"slow\0");
    }

    #[test]
    fn connection_closed_cleanly() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_command().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn bytes_of_the_next_frame_stay_buffered() {
        let mut wire = BytesMut::new();
        encode_frame(Tag::Pong, b"", &mut wire).unwrap();
        wire.put_u32_le(4);
        wire.put_u8(Tag::Response.as_u8());

        let mut reader = FrameReader::new(Cursor::new(wire.to_vec()));
        assert_eq!(reader.read_command().unwrap().tag, Tag::Pong);
        assert_eq!(reader.buffered(), 5);
        assert!(matches!(
            reader.read_command().unwrap_err(),
            FrameError::ConnectionClosed
        ));
    }

    #[test]
    fn connection_closed_mid_frame() {
        let mut partial = BytesMut::new();
        partial.put_u32_le(16);
        partial.put_u8(Tag::Response.as_u8());
        partial.put_slice(b"only-part");

        let mut reader = FrameReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_command().unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn oversized_frame_in_stream() {
        let mut wire = BytesMut::new();
        wire.put_u32_le(1024);
        wire.put_u8(Tag::Response.as_u8());

        let cfg = FrameConfig {
            max_payload_size: 16,
        };
        let mut reader = FrameReader::with_config(Cursor::new(wire.to_vec()), cfg);
        let err = reader.read_command().unwrap_err();
        assert!(matches!(err, FrameError::PayloadTooLarge { .. }));
    }

    #[test]
    fn interrupted_read_retries() {
        let mut wire = BytesMut::new();
        encode_frame(Tag::Tick, b"", &mut wire).unwrap();

        let reader = InterruptedThenData {
            interrupted: false,
            bytes: wire.to_vec(),
            pos: 0,
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_command().unwrap().tag, Tag::Tick);
    }

    #[cfg(unix)]
    #[test]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = crate::writer::FrameWriter::new(left);
        let mut reader = FrameReader::new(right);

        writer.send(Tag::FindNative, b"GetPlayerName\0").unwrap();
        let command = reader.read_command().unwrap();

        assert_eq!(command.tag, Tag::FindNative);
        assert_eq!(command.payload.as_ref(), b"GetPlayerName\0");
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
