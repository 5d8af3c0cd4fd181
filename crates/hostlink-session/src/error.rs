use std::fmt;
use std::time::Duration;

use hostlink_frame::Tag;

/// Which side of the connection has to be upgraded after a version mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSide {
    /// The local embedding application.
    GameMode,
    /// The remote host plugin.
    Server,
}

impl fmt::Display for UpdateSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateSide::GameMode => f.write_str("game mode"),
            UpdateSide::Server => f.write_str("server"),
        }
    }
}

/// Errors that can occur during a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hostlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hostlink_frame::FrameError),

    /// The host went away.
    #[error("host disconnected: {0}")]
    Disconnected(String),

    /// The host speaks a different protocol version.
    #[error(
        "protocol version mismatch: server runs protocol {remote}, game mode runs {local}; please update your {update}"
    )]
    ProtocolVersionMismatch {
        local: u32,
        remote: u32,
        update: UpdateSide,
    },

    /// A callback could not be registered.
    #[error("callback registration failed: {0}")]
    Registration(String),

    /// The arguments of a public call do not match the callback's parameters.
    #[error("invalid arguments for callback {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    /// A response payload did not have the expected length.
    #[error("invalid response shape (expected {expected} bytes, got {actual})")]
    ResponseShape { expected: usize, actual: usize },

    /// Another session is alive in this process.
    #[error("a session is already active in this process")]
    AlreadyActive,

    /// The operation is not valid in the current connection state.
    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    /// A response arrived while nothing was waiting for one.
    #[error("unexpected {0} with no pending request")]
    UnexpectedResponse(Tag),

    /// A wait exceeded its configured bound.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The cooperative scheduler could not be built.
    #[error("scheduler error: {0}")]
    Scheduler(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
