use std::io::{Read, Write};

use crate::error::Result;

/// A connected pipe stream that implements Read + Write.
///
/// This is the fundamental I/O type returned by [`crate::connect`].
/// On Unix, this wraps a Unix domain socket stream.
/// On Windows, this wraps a named pipe client handle.
pub struct IpcStream {
    inner: IpcStreamInner,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(windows)]
    Pipe(crate::windows::PipeHandle),
}

impl Read for IpcStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.read(buf),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => pipe.read(buf),
        }
    }
}

impl Write for IpcStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.write(buf),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => pipe.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match &mut self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => stream.flush(),
            // Overlapped writes have completed by the time `write` returns.
            #[cfg(windows)]
            IpcStreamInner::Pipe(_) => Ok(()),
        }
    }
}

#[cfg(unix)]
impl From<std::os::unix::net::UnixStream> for IpcStream {
    fn from(stream: std::os::unix::net::UnixStream) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
        }
    }
}

impl IpcStream {
    #[cfg(windows)]
    pub(crate) fn from_pipe(pipe: crate::windows::PipeHandle) -> Self {
        Self {
            inner: IpcStreamInner::Pipe(pipe),
        }
    }

    /// Try to clone this stream (duplicates the descriptor/handle).
    ///
    /// The clone shares the same connection, so one half can be handed to a
    /// reader thread while the other keeps writing.
    pub fn try_clone(&self) -> Result<Self> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => Ok(Self::from(stream.try_clone()?)),
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => Ok(Self::from_pipe(pipe.clone())),
        }
    }

    /// Shut down both directions of the connection.
    ///
    /// Unblocks a reader parked on a cloned handle. On Windows pending pipe
    /// I/O is cancelled and later reads on any clone report end of stream.
    pub fn shutdown(&self) -> Result<()> {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                match stream.shutdown(std::net::Shutdown::Both) {
                    Ok(()) => Ok(()),
                    // Already torn down by the peer.
                    Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            #[cfg(windows)]
            IpcStreamInner::Pipe(pipe) => Ok(pipe.shutdown()?),
        }
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(windows)]
            IpcStreamInner::Pipe(_) => "named-pipe",
        }
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .finish()
    }
}
