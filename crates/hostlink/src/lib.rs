//! Client side of the hostlink pipe protocol.
//!
//! An embedding application (the "game mode") connects to a host process
//! over a named pipe, exchanges a fixed binary command protocol with it, and
//! answers the host's calls from a single cooperative logical thread.
//!
//! # Crate Structure
//!
//! - [`transport`]: Pipe name resolution and the connected stream
//! - [`frame`]: Command tags, framing and payload value codec
//! - [`session`]: Handshake, receive loop, callbacks, natives and scheduling
//!
//! ```no_run
//! use hostlink::{Application, Session, SessionConfig};
//!
//! struct Mode;
//!
//! impl Application for Mode {
//!     fn initialize(&mut self, session: &Session) -> hostlink::Result<()> {
//!         session.print("hello from the game mode")?;
//!         session.start()
//!     }
//! }
//!
//! let session = Session::connect(SessionConfig::new("hostlink"))?;
//! session.run(Mode)?;
//! # Ok::<(), hostlink::SessionError>(())
//! ```

/// Re-export transport types.
pub mod transport {
    pub use hostlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hostlink_frame::*;
}

/// Re-export session types.
pub mod session {
    pub use hostlink_session::*;
}

pub use hostlink_session::{
    Application, CallbackArgs, CallbackDescriptor, ConnectionState, ReturnType, Result, Session,
    SessionConfig, SessionError, Signature, Value,
};
