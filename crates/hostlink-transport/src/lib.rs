//! Named pipe client transport.
//!
//! The host process owns the pipe; hostlink only ever connects to it.
//! - Unix domain sockets (Linux/macOS), addressed by path
//! - Named pipes (Windows), addressed as `\\.\pipe\<name>`
//!
//! This is the lowest layer of hostlink. Everything else builds on top of
//! the [`IpcStream`] type provided here.

pub mod error;
pub mod pipe;
pub mod traits;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod windows;

pub use error::{Result, TransportError};
pub use pipe::{connect, resolve_pipe_path};
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;

#[cfg(windows)]
pub use windows::NamedPipe;
