//! Command tags.
//!
//! The byte values are shared with the host plugin and must never change.

use std::fmt;

/// The kind of a command, carried as the single tag byte of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Host → client: one server tick.
    Tick,
    /// Either direction: latency probe.
    Ping,
    /// Either direction: answer to a [`Tag::Ping`].
    Pong,
    /// Client → host: print text to the host console.
    Print,
    /// Client → host: announce a callback and its parameter shape.
    RegisterCall,
    /// Client → host: look up a native handle by name.
    FindNative,
    /// Client → host: invoke a native with an argument buffer.
    InvokeNative,
    /// Client → host: connection notice.
    Connect,
    /// Client → host: begin delivering ticks and public calls.
    Start,
    /// Host → client: protocol and plugin version, sent first.
    Announce,
    /// Either direction: result of a blocking request.
    Response,
    /// Reserved by the protocol; carries no defined semantics.
    Reply,
    /// Host → client: invoke a registered callback.
    PublicCall,
    /// A tag byte outside the known set.
    Unknown(u8),
}

impl Tag {
    /// All tags with a defined byte value.
    pub const KNOWN: [Tag; 13] = [
        Tag::Tick,
        Tag::Ping,
        Tag::Pong,
        Tag::Print,
        Tag::RegisterCall,
        Tag::FindNative,
        Tag::InvokeNative,
        Tag::Connect,
        Tag::Start,
        Tag::Announce,
        Tag::Response,
        Tag::Reply,
        Tag::PublicCall,
    ];

    /// The wire byte for this tag.
    pub fn as_u8(self) -> u8 {
        match self {
            Tag::Tick => 0x01,
            Tag::Ping => 0x02,
            Tag::Pong => 0x03,
            Tag::Print => 0x04,
            Tag::RegisterCall => 0x05,
            Tag::FindNative => 0x06,
            Tag::InvokeNative => 0x07,
            Tag::Connect => 0x08,
            Tag::Start => 0x0A,
            Tag::Announce => 0x0B,
            Tag::Response => 0x10,
            Tag::Reply => 0x11,
            Tag::PublicCall => 0x12,
            Tag::Unknown(byte) => byte,
        }
    }

    /// Returns a human-readable name for the tag.
    pub fn name(self) -> &'static str {
        match self {
            Tag::Tick => "tick",
            Tag::Ping => "ping",
            Tag::Pong => "pong",
            Tag::Print => "print",
            Tag::RegisterCall => "register-call",
            Tag::FindNative => "find-native",
            Tag::InvokeNative => "invoke-native",
            Tag::Connect => "connect",
            Tag::Start => "start",
            Tag::Announce => "announce",
            Tag::Response => "response",
            Tag::Reply => "reply",
            Tag::PublicCall => "public-call",
            Tag::Unknown(_) => "unknown",
        }
    }
}

impl From<u8> for Tag {
    fn from(byte: u8) -> Self {
        Tag::KNOWN
            .iter()
            .copied()
            .find(|tag| tag.as_u8() == byte)
            .unwrap_or(Tag::Unknown(byte))
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        tag.as_u8()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Unknown(byte) => write!(f, "unknown(0x{byte:02x})"),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_map_to_distinct_bytes() {
        for tag in Tag::KNOWN {
            assert_eq!(Tag::from(tag.as_u8()), tag);
        }
        let mut bytes: Vec<u8> = Tag::KNOWN.iter().map(|t| t.as_u8()).collect();
        bytes.sort_unstable();
        bytes.dedup();
        assert_eq!(bytes.len(), Tag::KNOWN.len());
    }

    #[test]
    fn unassigned_byte_is_unknown() {
        assert_eq!(Tag::from(0x7f), Tag::Unknown(0x7f));
        assert_eq!(Tag::Unknown(0x7f).as_u8(), 0x7f);
        assert_eq!(Tag::Unknown(0x7f).to_string(), "unknown(0x7f)");
    }
}
