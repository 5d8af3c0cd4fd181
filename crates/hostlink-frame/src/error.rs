/// Errors that can occur during frame and payload encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A payload field extends past the end of the payload.
    #[error("payload truncated at offset {offset} (needed {needed} bytes, {available} available)")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    /// A string field has no NUL terminator.
    #[error("unterminated string at offset {0}")]
    MissingTerminator(usize),

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    /// A string to encode contains an interior NUL byte.
    #[error("string contains an interior NUL byte")]
    InteriorNul,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, FrameError>;
