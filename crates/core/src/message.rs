//! Message and acknowledgement protocol
//!
//! A [`Message`] is a payload + meta + ack triple. The payload is an
//! immutable byte sequence, meta is a small read-only key/value map shared
//! by reference count, and the ack side is split in two: the [`AckHandle`]
//! travels forward with the message, the [`AckStream`] stays with whoever
//! needs the terminal verdict.
//!
//! The ack channel is a capacity-1 channel behind an atomic first-emit
//! guard: the first status wins, every later emit is dropped without error.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Meta key requesting a synchronous ack reply (`"true"` / `"1"`)
pub const META_SYNC: &str = "sync";

/// Meta key carrying the routing discriminator
pub const META_TYPE: &str = "type";

/// Terminal delivery status of a message
///
/// Exactly one status is observable per ack channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsgStatus {
    /// Every downstream accepted the message
    Done,
    /// Some, but not all, downstreams accepted the message
    PartialSend,
    /// The message could not be parsed or was malformed
    Invalid,
    /// Delivery failed everywhere
    Failed,
    /// No verdict arrived within the delivery window
    TimedOut,
    /// No route matched the message
    Unroutable,
    /// A rate limit dropped the message
    Throttled,
}

/// A single meta value: short strings, small numbers, booleans
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl MetaValue {
    /// Borrow the string form, if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(n: i64) -> Self {
        MetaValue::Int(n)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// Message meta map
pub type Meta = HashMap<String, MetaValue>;

/// A message flowing through the pipeline
///
/// Meta is read-only once the message is handed to `send`: there is no
/// mutation API, and fan-out copies share the same map by reference count.
/// A stage that wants different meta builds a new message.
pub struct Message {
    payload: Bytes,
    meta: Arc<Meta>,
    ack: AckHandle,
}

impl Message {
    /// Create a message with empty meta
    ///
    /// Returns the message and the stream its terminal status will arrive
    /// on.
    pub fn new(payload: impl Into<Bytes>) -> (Self, AckStream) {
        Self::with_meta(Meta::new(), payload)
    }

    /// Create a message with the given meta
    pub fn with_meta(meta: Meta, payload: impl Into<Bytes>) -> (Self, AckStream) {
        Self::from_parts(Arc::new(meta), payload.into())
    }

    fn from_parts(meta: Arc<Meta>, payload: Bytes) -> (Self, AckStream) {
        let (ack, stream) = AckHandle::new();
        (
            Self {
                payload,
                meta,
                ack,
            },
            stream,
        )
    }

    /// Logical copy for fan-out: shares payload bytes and meta, allocates a
    /// fresh ack channel
    ///
    /// Emitting on the copy never emits on the original.
    pub fn fork(&self) -> (Self, AckStream) {
        Self::from_parts(Arc::clone(&self.meta), self.payload.clone())
    }

    /// The message payload
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Look up a single meta value
    #[inline]
    pub fn meta(&self, key: &str) -> Option<&MetaValue> {
        self.meta.get(key)
    }

    /// The whole meta map
    #[inline]
    pub fn meta_all(&self) -> &Meta {
        &self.meta
    }

    /// Whether the originator asked for a synchronous ack reply
    pub fn is_sync(&self) -> bool {
        match self.meta.get(META_SYNC) {
            Some(MetaValue::Str(s)) => s == "true" || s == "1",
            Some(MetaValue::Bool(b)) => *b,
            Some(MetaValue::Int(n)) => *n == 1,
            None => false,
        }
    }

    /// The emit side of the ack channel
    #[inline]
    pub fn ack(&self) -> &AckHandle {
        &self.ack
    }

    /// Emit `Done`; returns whether this call settled the message
    pub fn ack_done(&self) -> bool {
        self.ack.emit(MsgStatus::Done)
    }

    /// Emit `PartialSend`
    pub fn ack_partial_send(&self) -> bool {
        self.ack.emit(MsgStatus::PartialSend)
    }

    /// Emit `Invalid`
    pub fn ack_invalid(&self) -> bool {
        self.ack.emit(MsgStatus::Invalid)
    }

    /// Emit `Failed`
    pub fn ack_failed(&self) -> bool {
        self.ack.emit(MsgStatus::Failed)
    }

    /// Emit `TimedOut`
    pub fn ack_timed_out(&self) -> bool {
        self.ack.emit(MsgStatus::TimedOut)
    }

    /// Emit `Unroutable`
    pub fn ack_unroutable(&self) -> bool {
        self.ack.emit(MsgStatus::Unroutable)
    }

    /// Emit `Throttled`
    pub fn ack_throttled(&self) -> bool {
        self.ack.emit(MsgStatus::Throttled)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("payload_len", &self.payload.len())
            .field("meta", &self.meta)
            .finish()
    }
}

/// Emit side of the ack channel; travels forward with the message
#[derive(Clone)]
pub struct AckHandle {
    shared: Arc<AckShared>,
}

struct AckShared {
    emitted: AtomicBool,
    tx: mpsc::Sender<MsgStatus>,
}

impl AckHandle {
    fn new() -> (Self, AckStream) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                shared: Arc::new(AckShared {
                    emitted: AtomicBool::new(false),
                    tx,
                }),
            },
            AckStream { rx },
        )
    }

    /// Emit a terminal status
    ///
    /// The first emit wins and is delivered if the consumer still listens;
    /// every later emit returns `false` and is dropped.
    pub fn emit(&self, status: MsgStatus) -> bool {
        if self.shared.emitted.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Capacity 1 and the guard above make this send infallible unless
        // the consumer went away, which is not an error for the emitter.
        let _ = self.shared.tx.try_send(status);
        true
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("emitted", &self.shared.emitted.load(Ordering::Acquire))
            .finish()
    }
}

/// Consume side of the ack channel; stays with the originator
pub struct AckStream {
    rx: mpsc::Receiver<MsgStatus>,
}

impl AckStream {
    /// Wait for the terminal status
    ///
    /// Returns `None` if the message was dropped without ever being acked.
    pub async fn recv(mut self) -> Option<MsgStatus> {
        self.rx.recv().await
    }
}

impl fmt::Debug for AckStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckStream").finish()
    }
}
