//! Blocking native exchanges.
//!
//! Both operations send one request and then block the logical thread until
//! a Response arrives. Any other command read meanwhile is diverted, in
//! order, to the unhandled queue so the receive loop still sees it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use hostlink_frame::{put_string, Command, Tag};
use tracing::{debug, trace};

use crate::channel::TransportChannel;
use crate::dispatch::UnhandledQueue;
use crate::error::{Result, SessionError};

pub(crate) struct NativeInvoker<'a> {
    channel: &'a TransportChannel,
    unhandled: &'a UnhandledQueue,
    timeout: Option<Duration>,
}

impl<'a> NativeInvoker<'a> {
    pub(crate) fn new(
        channel: &'a TransportChannel,
        unhandled: &'a UnhandledQueue,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            channel,
            unhandled,
            timeout,
        }
    }

    /// Look up the handle of a native by name.
    pub(crate) fn resolve_handle(&self, name: &str) -> Result<i32> {
        let mut payload = BytesMut::with_capacity(name.len() + 1);
        put_string(&mut payload, name)?;
        self.channel.send(Tag::FindNative, &payload)?;

        let response = self.wait_for(Tag::Response)?;
        let bytes = <[u8; 4]>::try_from(response.payload.as_ref()).map_err(|_| {
            SessionError::ResponseShape {
                expected: 4,
                actual: response.payload.len(),
            }
        })?;
        let handle = i32::from_le_bytes(bytes);
        debug!(name, handle, "native resolved");
        Ok(handle)
    }

    /// Invoke a native with a prepared argument buffer; returns the raw response.
    pub(crate) fn invoke(&self, args: &[u8]) -> Result<Bytes> {
        self.channel.send(Tag::InvokeNative, args)?;
        Ok(self.wait_for(Tag::Response)?.payload)
    }

    /// Block until a command with `tag` arrives, diverting everything else.
    pub(crate) fn wait_for(&self, tag: Tag) -> Result<Command> {
        let mut diverted = 0usize;
        let result = loop {
            match self.channel.receive_sync(self.timeout) {
                Ok(command) if command.tag == tag => break Ok(command),
                Ok(command) => {
                    trace!(tag = %command.tag, waiting_for = %tag, "diverting command");
                    self.unhandled.push(command);
                    diverted += 1;
                }
                Err(err) => break Err(err),
            }
        };
        if diverted > 0 {
            // The receive loop may be parked on the transport; let it see the queue.
            self.channel.wake();
        }
        result
    }
}

/// Per-session cache of resolved native handles.
#[derive(Debug, Default)]
pub struct HandleCache {
    handles: RefCell<HashMap<String, i32>>,
}

impl HandleCache {
    pub fn get(&self, name: &str) -> Option<i32> {
        self.handles.borrow().get(name).copied()
    }

    pub fn insert(&self, name: &str, handle: i32) {
        self.handles.borrow_mut().insert(name.to_string(), handle);
    }

    pub fn len(&self) -> usize {
        self.handles.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.borrow().is_empty()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;

    use hostlink_frame::{FrameConfig, FrameReader, FrameWriter};

    use super::*;

    struct Fixture {
        channel: TransportChannel,
        unhandled: UnhandledQueue,
        host_reader: FrameReader<UnixStream>,
        host_writer: FrameWriter<UnixStream>,
    }

    impl Fixture {
        fn new() -> Self {
            let (left, right) = UnixStream::pair().unwrap();
            Self {
                channel: TransportChannel::from_stream(left.into(), FrameConfig::default())
                    .unwrap(),
                unhandled: UnhandledQueue::default(),
                host_reader: FrameReader::new(right.try_clone().unwrap()),
                host_writer: FrameWriter::new(right),
            }
        }

        fn invoker(&self) -> NativeInvoker<'_> {
            NativeInvoker::new(&self.channel, &self.unhandled, Some(Duration::from_secs(5)))
        }
    }

    #[test]
    fn resolve_handle_decodes_four_bytes() {
        let mut fx = Fixture::new();
        fx.host_writer.send(Tag::Response, &42i32.to_le_bytes()).unwrap();

        assert_eq!(fx.invoker().resolve_handle("GetPlayerName").unwrap(), 42);
        let request = fx.host_reader.read_command().unwrap();
        assert_eq!(request.tag, Tag::FindNative);
        assert_eq!(request.payload.as_ref(), b"GetPlayerName\0");
    }

    #[test]
    fn wrong_response_length_is_shape_error() {
        let mut fx = Fixture::new();
        fx.host_writer.send(Tag::Response, &[1, 2, 3]).unwrap();
        fx.host_writer.send(Tag::Response, &[9, 0, 0, 0]).unwrap();

        let err = fx.invoker().resolve_handle("X").unwrap_err();
        assert!(matches!(
            err,
            SessionError::ResponseShape {
                expected: 4,
                actual: 3
            }
        ));
        // The channel is still usable for the next call.
        assert_eq!(fx.invoker().resolve_handle("Y").unwrap(), 9);
    }

    #[test]
    fn wait_diverts_other_commands_in_order() {
        let mut fx = Fixture::new();
        fx.host_writer.send(Tag::PublicCall, b"A\0").unwrap();
        fx.host_writer.send(Tag::Tick, b"").unwrap();
        fx.host_writer.send(Tag::Response, b"raw").unwrap();
        fx.host_writer.send(Tag::PublicCall, b"B\0").unwrap();

        let payload = fx.invoker().invoke(&[1, 0, 0, 0]).unwrap();
        assert_eq!(payload.as_ref(), b"raw");

        assert_eq!(fx.unhandled.len(), 2);
        assert_eq!(fx.unhandled.pop().unwrap().payload.as_ref(), b"A\0");
        assert_eq!(fx.unhandled.pop().unwrap().tag, Tag::Tick);
        assert!(fx.unhandled.pop().is_none());
        assert_eq!(fx.channel.receive_sync(None).unwrap().payload.as_ref(), b"B\0");

        let request = fx.host_reader.read_command().unwrap();
        assert_eq!(request.tag, Tag::InvokeNative);
        assert_eq!(request.payload.as_ref(), &[1, 0, 0, 0]);
    }

    #[test]
    fn wait_times_out() {
        let fx = Fixture::new();
        let invoker = NativeInvoker::new(
            &fx.channel,
            &fx.unhandled,
            Some(Duration::from_millis(20)),
        );
        assert!(matches!(
            invoker.invoke(&[]),
            Err(SessionError::Timeout(_))
        ));
    }

    #[test]
    fn handle_cache() {
        let cache = HandleCache::default();
        assert!(cache.get("X").is_none());
        cache.insert("X", 3);
        assert_eq!(cache.get("X"), Some(3));
        assert_eq!(cache.len(), 1);
    }
}
