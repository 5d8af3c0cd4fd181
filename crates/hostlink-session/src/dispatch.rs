//! The receive loop.
//!
//! Runs once the session is started. Each iteration takes the oldest diverted
//! command if there is one, otherwise the next command from the transport,
//! and routes it by tag.

use std::cell::RefCell;
use std::collections::VecDeque;

use hostlink_frame::{Command, PayloadReader, Tag};
use tracing::{debug, warn};

use crate::callbacks::encode_result;
use crate::channel::TransportChannel;
use crate::error::{Result, SessionError};
use crate::session::Session;

/// Commands a blocking wait read on behalf of the receive loop.
#[derive(Debug, Default)]
pub struct UnhandledQueue {
    commands: RefCell<VecDeque<Command>>,
}

impl UnhandledQueue {
    pub fn push(&self, command: Command) {
        self.commands.borrow_mut().push_back(command);
    }

    pub fn pop(&self) -> Option<Command> {
        self.commands.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.borrow().is_empty()
    }
}

/// Next command for the loop: diverted commands first, then the transport.
///
/// The queue is re-checked after every wake-up, since a blocking wait may
/// have filled it while this task was suspended.
pub(crate) async fn next_command(
    channel: &TransportChannel,
    unhandled: &UnhandledQueue,
) -> Result<Command> {
    loop {
        if let Some(command) = unhandled.pop() {
            return Ok(command);
        }
        if let Some(command) = channel.try_receive()? {
            return Ok(command);
        }
        channel.readable().await;
    }
}

pub(crate) async fn receive_loop(session: Session) {
    debug!("receive loop started");
    let outcome = loop {
        let command = match next_command(session.channel(), session.unhandled()).await {
            Ok(command) => command,
            Err(err) => break Err(err),
        };
        if let Err(err) = route(&session, command) {
            break Err(err);
        }
        if session.is_finished() {
            break Ok(());
        }
    };
    session.finish(outcome);
}

/// Handle one inbound command. An error ends the session.
pub(crate) fn route(session: &Session, command: Command) -> Result<()> {
    match command.tag {
        Tag::Tick => session.tick(),
        Tag::Pong => {
            session.pongs().on_pong();
        }
        Tag::PublicCall => public_call(session, &command.payload)?,
        Tag::Response | Tag::Reply => {
            return Err(SessionError::UnexpectedResponse(command.tag));
        }
        Tag::Announce => warn!("received a server announcement after the handshake"),
        tag => warn!(%tag, size = command.payload.len(), "unexpected command"),
    }
    Ok(())
}

fn public_call(session: &Session, payload: &[u8]) -> Result<()> {
    let mut reader = PayloadReader::new(payload);
    let name = match reader.read_string() {
        Ok(name) => name,
        Err(err) => {
            warn!(error = %err, "public call without a readable name");
            return Ok(());
        }
    };

    let Some(descriptor) = session.callback(&name) else {
        warn!(name, "received unknown callback");
        return Ok(());
    };

    let result = match descriptor.invoke(payload, reader.position()) {
        Ok(result) => result,
        Err(err) => {
            warn!(name, error = %err, "malformed public call");
            None
        }
    };
    debug!(name, ?result, "public call handled");
    session.send(Tag::Response, &encode_result(result))
}
