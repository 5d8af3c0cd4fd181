//! Announcement handshake.
//!
//! The host speaks first: its Announce carries the protocol version and the
//! plugin version. Anything received before it is logged and skipped.

use std::time::Duration;

use bytes::{BufMut, BytesMut};
use hostlink_frame::{put_version, PayloadReader, PluginVersion, Tag};
use tracing::{error, info, warn};

use crate::channel::TransportChannel;
use crate::error::{Result, SessionError, UpdateSide};

/// Protocol version spoken by this client. Must equal the host's exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// What the host announced about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement {
    pub protocol_version: u32,
    pub plugin_version: PluginVersion,
}

impl Announcement {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let mut reader = PayloadReader::new(payload);
        let protocol_version = reader.read_u32()?;
        let plugin_version = reader.read_version()?;
        Ok(Self {
            protocol_version,
            plugin_version,
        })
    }

    /// Announce payload as the host would send it.
    pub fn to_payload(&self) -> BytesMut {
        let mut payload = BytesMut::with_capacity(8);
        payload.put_u32_le(self.protocol_version);
        put_version(&mut payload, self.plugin_version);
        payload
    }

    /// Fail unless the announced protocol is exactly [`PROTOCOL_VERSION`].
    pub fn check_protocol(&self) -> Result<()> {
        check_protocol(self.protocol_version)
    }
}

fn check_protocol(remote: u32) -> Result<()> {
    if remote == PROTOCOL_VERSION {
        return Ok(());
    }
    let update = if remote > PROTOCOL_VERSION {
        UpdateSide::GameMode
    } else {
        UpdateSide::Server
    };
    error!(
        remote,
        local = PROTOCOL_VERSION,
        "protocol version mismatch; please update your {update}"
    );
    Err(SessionError::ProtocolVersionMismatch {
        local: PROTOCOL_VERSION,
        remote,
        update,
    })
}

/// Wait for the host's announcement and verify it.
pub async fn await_announcement(
    channel: &TransportChannel,
    timeout: Option<Duration>,
) -> Result<Announcement> {
    let announcement = match timeout {
        Some(limit) => tokio::time::timeout(limit, next_announcement(channel))
            .await
            .map_err(|_| SessionError::Timeout(limit))??,
        None => next_announcement(channel).await?,
    };
    announcement.check_protocol()?;

    info!(
        plugin = %announcement.plugin_version,
        protocol = announcement.protocol_version,
        "connected to host"
    );
    Ok(announcement)
}

async fn next_announcement(channel: &TransportChannel) -> Result<Announcement> {
    loop {
        let command = channel.receive_async().await?;
        if command.tag == Tag::Announce {
            return Announcement::decode(&command.payload);
        }
        warn!(tag = %command.tag, "received command instead of announce");
    }
}
