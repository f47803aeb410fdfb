//! Link contract and lifecycle commands
//!
//! Every pipeline component - receiver, link or sink - satisfies [`Link`].
//! Wiring is explicit: point-to-point components take `connect_to`, fan-out
//! components take `link_to`, and using the wrong one is a loud usage
//! error, never a silent no-op.

use std::sync::Arc;

use crate::error::{Result, SendError};
use crate::message::Message;

/// Lifecycle command codes
///
/// The enum is closed: there is no representable "unknown" command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdCode {
    /// Begin accepting traffic
    Start,
    /// Stop the worker; buffered messages are drained first
    Stop,
    /// Bind sockets, claim the inbound channel, spawn the worker
    SetUp,
    /// Close listeners and release resources
    TearDown,
}

/// A lifecycle command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cmd {
    pub code: CmdCode,
}

impl Cmd {
    pub fn new(code: CmdCode) -> Self {
        Self { code }
    }
}

/// The contract all pipeline components satisfy
///
/// `recv` is non-blocking best-effort: it enqueues and returns, it does not
/// wait for delivery. A failed `recv` hands the message back inside the
/// error and emits nothing on the ack channel; the caller surfaces
/// `Failed`.
pub trait Link: Send + Sync {
    /// Component name, unique within a pipeline
    fn name(&self) -> &str;

    /// Accept an inbound message
    fn recv(&self, msg: Message) -> std::result::Result<(), SendError>;

    /// Wire the single downstream of a point-to-point component
    fn connect_to(&self, next: Arc<dyn Link>) -> Result<()>;

    /// Wire the downstream set of a fan-out component
    fn link_to(&self, next: Vec<Arc<dyn Link>>) -> Result<()>;

    /// Apply a lifecycle command
    fn exec_cmd(&self, cmd: &Cmd) -> Result<()>;
}

impl std::fmt::Debug for dyn Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link").field("name", &self.name()).finish()
    }
}
