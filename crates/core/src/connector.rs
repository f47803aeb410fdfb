//! Connector - the substrate embedded in every component
//!
//! Owns the bounded inbound channel, the downstream pointer and the stop
//! token. The inbound channel capacity is the only backpressure knob in
//! the dataplane: a full channel fails the enqueue immediately, there is
//! no internal queueing of retries.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::link::Link;
use crate::message::Message;

/// Default inbound channel capacity
pub const DEFAULT_MSG_CHANNEL_CAPACITY: usize = 64;

/// Inbound channel + downstream pointer + stop token
pub struct Connector {
    name: String,
    tx: mpsc::Sender<Message>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
    downstream: RwLock<Option<Arc<dyn Link>>>,
    cancel: CancellationToken,
}

impl Connector {
    /// Create a connector with the default inbound capacity
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_MSG_CHANNEL_CAPACITY)
    }

    /// Create a connector with an explicit inbound capacity
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            tx,
            rx: Mutex::new(Some(rx)),
            downstream: RwLock::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Owning component name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Put a message on the inbound channel without blocking
    ///
    /// Fails fast when the channel is full (backpressure) or the component
    /// was stopped. The message is handed back inside the error.
    pub fn enqueue(&self, msg: Message) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed(msg, self.name.clone()));
        }
        self.tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(msg) => SendError::Full(msg, self.name.clone()),
            TrySendError::Closed(msg) => SendError::Closed(msg, self.name.clone()),
        })
    }

    /// Forward a message to the wired downstream's `recv`
    pub fn send(&self, msg: Message) -> Result<(), SendError> {
        let downstream = self.downstream.read().clone();
        match downstream {
            Some(link) => link.recv(msg),
            None => Err(SendError::NoDownstream(msg, self.name.clone())),
        }
    }

    /// Replace the downstream pointer
    pub fn set_downstream(&self, next: Arc<dyn Link>) {
        *self.downstream.write() = Some(next);
    }

    /// Current downstream, if wired
    pub fn downstream(&self) -> Option<Arc<dyn Link>> {
        self.downstream.read().clone()
    }

    /// Claim the inbound receiver; a worker does this exactly once at spawn
    pub fn take_msg_rx(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().take()
    }

    /// Token cancelled by [`Connector::stop`]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the component: new enqueues fail, the worker drains and exits
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether `stop` has been called
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("name", &self.name)
            .field("wired", &self.downstream.read().is_some())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CoreError, Result as CoreResult};
    use crate::link::Cmd;
    use crate::message::MsgStatus;

    /// Accepts everything into its own connector, never drains
    struct SlowLink {
        connector: Connector,
    }

    impl SlowLink {
        fn new(capacity: usize) -> Self {
            Self {
                connector: Connector::with_capacity("slow", capacity),
            }
        }
    }

    impl Link for SlowLink {
        fn name(&self) -> &str {
            self.connector.name()
        }

        fn recv(&self, msg: Message) -> Result<(), SendError> {
            self.connector.enqueue(msg)
        }

        fn connect_to(&self, _next: Arc<dyn Link>) -> CoreResult<()> {
            Err(CoreError::IllegalWiring("test link takes no downstream"))
        }

        fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> CoreResult<()> {
            Err(CoreError::IllegalWiring("test link takes no downstream"))
        }

        fn exec_cmd(&self, _cmd: &Cmd) -> CoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_without_downstream_fails() {
        let connector = Connector::new("lonely");
        let (msg, _ack) = Message::new("x");

        let err = connector.send(msg).unwrap_err();
        assert!(matches!(err, SendError::NoDownstream(_, _)));
    }

    #[tokio::test]
    async fn full_channel_fails_fast() {
        let connector = Connector::new("up");
        let slow = Arc::new(SlowLink::new(1));
        connector.set_downstream(slow);

        let (first, _ack1) = Message::new("a");
        connector.send(first).unwrap();

        let (second, _ack2) = Message::new("b");
        let err = connector.send(second).unwrap_err();
        assert!(matches!(err, SendError::Full(_, _)));

        // The message comes back; the caller decides what to ack.
        let msg = err.into_message();
        assert!(msg.ack_failed());
    }

    #[tokio::test]
    async fn stopped_connector_rejects_enqueue() {
        let connector = Connector::new("stopping");
        connector.stop();

        let (msg, ack) = Message::new("x");
        let err = connector.enqueue(msg).unwrap_err();
        assert!(matches!(err, SendError::Closed(_, _)));

        err.into_message().ack_failed();
        assert_eq!(ack.recv().await, Some(MsgStatus::Failed));
    }

    #[tokio::test]
    async fn worker_claims_receiver_once() {
        let connector = Connector::new("worker");
        assert!(connector.take_msg_rx().is_some());
        assert!(connector.take_msg_rx().is_none());
    }
}
