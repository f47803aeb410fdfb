//! Relay - Links
//!
//! The transforming/forwarding stages of the dataplane:
//!
//! - [`Mpx`] - fan a message out to every wired downstream and fold the
//!   copies' acks into one verdict on the original.
//! - [`multiplex`] - the same fan-out semantics as a free function, for
//!   stages that need an ad-hoc fan-out without owning an `Mpx`.
//! - [`Router`] - pick one downstream by a meta key.
//! - [`Throttler`] - token-bucket rate limiting with `Throttled` acks.
//! - [`Demux`] - stateless fan-out built on [`multiplex`].
//!
//! Every link runs a single worker that reads its inbound channel and
//! applies the link's policy. Workers drain buffered messages on `Stop`
//! before exiting.

mod demux;
mod mpx;
mod router;
mod throttler;

#[cfg(test)]
pub(crate) mod testutil;

pub use demux::{Demux, DemuxMetricsHandle};
pub use mpx::{multiplex, Mpx, MpxMetricsHandle, MPX_MSG_SEND_TIMEOUT};
pub use router::{Router, RouterMetricsHandle, DEFAULT_ROUTING_KEY};
pub use throttler::{Throttler, ThrottlerMetricsHandle};
