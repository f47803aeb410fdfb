//! Test doubles shared by the link tests

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use relay_core::{Cmd, Link, Message, MsgStatus, Result, SendError};

/// What a [`StubLink`] does with a message it receives
pub(crate) enum StubBehavior {
    /// Ack with the given status immediately
    Ack(MsgStatus),
    /// Ack with the given status after a delay
    AckAfter(MsgStatus, Duration),
    /// Keep the message alive but never ack it
    Mute,
    /// Refuse the message at `recv`
    Reject,
}

/// A terminal stub with scripted behavior
pub(crate) struct StubLink {
    name: String,
    behavior: StubBehavior,
    held: Mutex<Vec<Message>>,
    payloads: Mutex<Vec<Vec<u8>>>,
}

impl StubLink {
    pub(crate) fn new(name: &str, behavior: StubBehavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            held: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
        })
    }

    /// Payloads seen so far, in arrival order
    pub(crate) fn payloads(&self) -> Vec<Vec<u8>> {
        self.payloads.lock().clone()
    }

    pub(crate) fn received_count(&self) -> usize {
        self.payloads.lock().len()
    }
}

impl Link for StubLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
        if matches!(self.behavior, StubBehavior::Reject) {
            return Err(SendError::Rejected(msg, self.name.clone(), "scripted"));
        }

        self.payloads.lock().push(msg.payload().to_vec());
        match &self.behavior {
            StubBehavior::Ack(status) => {
                msg.ack().emit(*status);
            }
            StubBehavior::AckAfter(status, delay) => {
                let status = *status;
                let delay = *delay;
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    msg.ack().emit(status);
                });
            }
            StubBehavior::Mute => {
                // Hold the message so its ack channel stays open.
                self.held.lock().push(msg);
            }
            StubBehavior::Reject => unreachable!(),
        }
        Ok(())
    }

    fn connect_to(&self, _next: Arc<dyn Link>) -> Result<()> {
        Err(relay_core::CoreError::IllegalWiring("stub is terminal"))
    }

    fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> Result<()> {
        Err(relay_core::CoreError::IllegalWiring("stub is terminal"))
    }

    fn exec_cmd(&self, _cmd: &Cmd) -> Result<()> {
        Ok(())
    }
}
