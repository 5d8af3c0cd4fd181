//! Tagged command framing for the hostlink pipe protocol.
//!
//! Every command on the wire is framed with:
//! - A 4-byte little-endian payload length
//! - A 1-byte command tag
//!
//! Payload fields use fixed widths: 32-bit values are 4 bytes little-endian,
//! strings are UTF-8 with a single NUL terminator, versions are 4 packed bytes.
//! Both protocol endpoints must agree on this layout byte for byte.

pub mod codec;
pub mod error;
pub mod reader;
pub mod tag;
pub mod value;
pub mod writer;

pub use codec::{decode_frame, encode_frame, Command, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE};
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use tag::Tag;
pub use value::{put_string, put_version, PayloadReader, PluginVersion};
pub use writer::FrameWriter;
