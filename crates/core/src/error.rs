//! Core error types
//!
//! Two families: [`CoreError`] for configuration, wiring and lifecycle
//! problems, and [`SendError`] for delivery problems. Delivery errors hand
//! the message back to the caller, which is responsible for surfacing a
//! `Failed` ack; they never propagate further up the call stack.

use thiserror::Error;

use crate::message::Message;

/// Configuration, wiring and lifecycle errors
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required builder parameter is absent
    #[error("missing required parameter: {0}")]
    MissingParam(&'static str),

    /// A builder parameter has the wrong shape
    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    /// The builder was asked for a module it does not know
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// `connect_to` on a fan-out link, `link_to` on a point-to-point link,
    /// or wiring a component that takes no downstreams
    #[error("illegal wiring: {0}")]
    IllegalWiring(&'static str),

    /// Socket-level failure during set-up or tear-down
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Stopping a component that never started, double set-up, etc.
    /// Reported, non-fatal.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Delivery error: the downstream could not take the message
///
/// Every variant carries the message back so the caller can emit `Failed`
/// on its ack channel. Enqueue failure is distinct from message-level
/// failure: nothing is emitted on the ack channel by the failing `recv`.
#[derive(Debug, Error)]
pub enum SendError {
    /// The downstream inbound channel is at capacity (backpressure)
    #[error("inbound channel full for {1}")]
    Full(Message, String),

    /// The downstream inbound channel is closed (stopped component)
    #[error("inbound channel closed for {1}")]
    Closed(Message, String),

    /// No downstream is wired
    #[error("{1} has no downstream wired")]
    NoDownstream(Message, String),

    /// The component does not accept inbound messages
    #[error("{1} rejected the message: {2}")]
    Rejected(Message, String, &'static str),
}

impl SendError {
    /// Recover the undelivered message
    pub fn into_message(self) -> Message {
        match self {
            SendError::Full(msg, _)
            | SendError::Closed(msg, _)
            | SendError::NoDownstream(msg, _)
            | SendError::Rejected(msg, _, _) => msg,
        }
    }
}
