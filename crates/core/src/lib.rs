//! Relay - Core
//!
//! The message protocol and component substrate shared by every node in the
//! dataplane.
//!
//! # Architecture
//!
//! ```text
//! [Receivers]              [Links]                 [Sinks]
//!    TCP ────┐                                  ┌──→ Dumper
//!    UDP ────┼──→ Connector ──→ Mpx/Router ────►┼──→ TCP
//!            │       │              │           └──→ UDP
//!            │       └── inbound mpsc, downstream slot
//!            │
//!            └──◄── ack channel (one terminal MsgStatus, flows backwards)
//! ```
//!
//! # Key Design
//!
//! - **Message**: immutable payload (`bytes::Bytes`) + shared meta + an ack
//!   handle that travels forward while the matching [`AckStream`] stays with
//!   the originator.
//! - **Ack channel**: capacity-1 channel behind an atomic first-emit guard,
//!   so a message settles to exactly one terminal [`MsgStatus`].
//! - **Connector**: the inbound channel + downstream pointer embedded in
//!   every component. `try_send` semantics make the channel capacity the
//!   only backpressure knob.
//! - **Link**: the contract all components satisfy: `recv`, `connect_to`,
//!   `link_to`, `exec_cmd`.
//! - **Context**: the per-process component registry and metrics registry,
//!   threaded through the builder instead of living in a global.

mod connector;
mod context;
mod error;
mod link;
mod message;

pub use connector::{Connector, DEFAULT_MSG_CHANNEL_CAPACITY};
pub use context::Context;
pub use error::{CoreError, Result, SendError};
pub use link::{Cmd, CmdCode, Link};
pub use message::{
    AckHandle, AckStream, Message, Meta, MetaValue, MsgStatus, META_SYNC, META_TYPE,
};
