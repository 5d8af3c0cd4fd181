//! Framed command I/O over the host pipe.
//!
//! Writes are blocking and happen on the logical thread. Reads are served by
//! a dedicated inbound thread that owns the [`FrameReader`] and forwards every
//! decoded command, in arrival order, into a queue. Both the suspending and
//! the thread-blocking read drain that same queue, so neither can reorder
//! frames relative to the other.

use std::cell::RefCell;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hostlink_frame::{Command, FrameConfig, FrameError, FrameReader, FrameWriter, Tag};
use hostlink_transport::IpcStream;
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::error::{Result, SessionError};

type Inbound = std::result::Result<Command, FrameError>;

/// A connected, framed command channel.
pub struct TransportChannel {
    writer: RefCell<FrameWriter<IpcStream>>,
    inbound: Receiver<Inbound>,
    ready: Arc<Notify>,
    control: IpcStream,
}

impl TransportChannel {
    /// Connect to the host pipe by name.
    pub fn connect(name: &str, config: FrameConfig) -> Result<Self> {
        let stream = hostlink_transport::connect(name)?;
        Self::from_stream(stream, config)
    }

    /// Wrap an already connected stream and start the inbound thread.
    pub fn from_stream(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let control = stream.try_clone()?;
        let transport = stream.transport_name();

        let (tx, inbound) = mpsc::channel();
        let ready = Arc::new(Notify::new());
        let reader = FrameReader::with_config(reader_stream, config.clone());
        let pump_ready = Arc::clone(&ready);

        thread::Builder::new()
            .name("hostlink-inbound".to_string())
            .spawn(move || pump(reader, tx, pump_ready))
            .map_err(SessionError::Scheduler)?;

        debug!(transport, "channel open");
        Ok(Self {
            writer: RefCell::new(FrameWriter::with_config(stream, config)),
            inbound,
            ready,
            control,
        })
    }

    /// Write one command (blocking).
    pub fn send(&self, tag: Tag, payload: &[u8]) -> Result<()> {
        debug!(%tag, size = payload.len(), "send");
        self.writer.borrow_mut().send(tag, payload)?;
        Ok(())
    }

    /// Take the next command if one has already arrived.
    pub fn try_receive(&self) -> Result<Option<Command>> {
        match self.inbound.try_recv() {
            Ok(inbound) => received(inbound).map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(closed()),
        }
    }

    /// Suspend until the inbound side signals activity.
    ///
    /// Wake-ups may be spurious; callers re-check their sources after every
    /// return.
    pub async fn readable(&self) {
        self.ready.notified().await;
    }

    /// Wake a task suspended in [`readable`](Self::readable).
    pub fn wake(&self) {
        self.ready.notify_one();
    }

    /// Receive the next command without blocking the logical thread.
    pub async fn receive_async(&self) -> Result<Command> {
        loop {
            if let Some(command) = self.try_receive()? {
                return Ok(command);
            }
            self.readable().await;
        }
    }

    /// Receive the next command, blocking the calling thread.
    ///
    /// `None` waits indefinitely.
    pub fn receive_sync(&self, timeout: Option<Duration>) -> Result<Command> {
        let inbound = match timeout {
            None => self.inbound.recv().map_err(|_| closed())?,
            Some(limit) => match self.inbound.recv_timeout(limit) {
                Ok(inbound) => inbound,
                Err(RecvTimeoutError::Timeout) => return Err(SessionError::Timeout(limit)),
                Err(RecvTimeoutError::Disconnected) => return Err(closed()),
            },
        };
        received(inbound)
    }

    /// Close both directions. The inbound thread observes end of stream.
    pub fn shutdown(&self) {
        if let Err(err) = self.control.shutdown() {
            warn!(error = %err, "channel shutdown failed");
        }
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TransportChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChannel")
            .field("stream", &self.control)
            .finish_non_exhaustive()
    }
}

fn pump(mut reader: FrameReader<IpcStream>, tx: Sender<Inbound>, ready: Arc<Notify>) {
    loop {
        let result = reader.read_command();
        if let Ok(command) = &result {
            trace!(tag = %command.tag, size = command.payload.len(), "inbound");
        }
        let failed = result.is_err();
        if tx.send(result).is_err() {
            break;
        }
        ready.notify_one();
        if failed {
            break;
        }
    }
    debug!("inbound thread exiting");
}

fn received(inbound: Inbound) -> Result<Command> {
    match inbound {
        Ok(command) => Ok(command),
        Err(FrameError::ConnectionClosed) => Err(closed()),
        Err(err) => Err(err.into()),
    }
}

fn closed() -> SessionError {
    SessionError::Disconnected("pipe closed by host".to_string())
}
