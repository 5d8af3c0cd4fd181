//! Session layer of the hostlink protocol.
//!
//! A [`Session`] owns the pipe to the host. It waits for the host's
//! announcement, lets the [`Application`] register callbacks, and then runs a
//! receive loop that routes ticks, pongs and public calls. Native lookups and
//! invocations block the logical thread until the host responds.
//!
//! Everything runs on a single logical thread driven by the [`Scheduler`].
//! The protocol has no request ids, so the ordering of frames on that thread
//! is what correlates requests with responses.

pub mod callbacks;
pub mod channel;
mod dispatch;
pub mod error;
pub mod handshake;
mod natives;
pub mod ping;
pub mod scheduler;
pub mod session;

pub use callbacks::{
    encode_result, Argument, CallbackArgs, CallbackDescriptor, CallbackRegistry, Handler,
    ParameterShape, ReturnType, Signature, Value,
};
pub use channel::TransportChannel;
pub use dispatch::UnhandledQueue;
pub use error::{Result, SessionError, UpdateSide};
pub use handshake::{Announcement, PROTOCOL_VERSION};
pub use natives::HandleCache;
pub use ping::PongTracker;
pub use scheduler::Scheduler;
pub use session::{Application, ConnectionState, Session, SessionConfig, DEFAULT_PIPE_NAME};
