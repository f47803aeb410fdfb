//! Relay - Receivers
//!
//! Ingress endpoints: every accepted frame becomes one [`relay_core::Message`]
//! pushed into the pipeline through the receiver's connector.
//!
//! - [`TcpReceiver`] - line-delimited TCP with per-message reply tokens and
//!   optional synchronous ack reporting.
//! - [`UdpReceiver`] - one datagram, one message, fire-and-forget.
//!
//! Receivers are message sources: their `recv` rejects inbound pipeline
//! traffic instead of feeding a channel nothing drains.

mod tcp;
mod udp;

pub use tcp::{
    status_reply, ReplyMode, TcpReceiver, TcpReceiverConfig, TcpReceiverMetricsHandle,
    CONN_READ_TIMEOUT, CONN_WRITE_TIMEOUT, REPLY_ACCEPTED, REPLY_FAILED, REPLY_INVALID,
    REPLY_PART_SENT, REPLY_SENT, REPLY_THROTTLED, REPLY_TIMEOUT, REPLY_UNROUTABLE,
    TCP_MSG_SEND_TIMEOUT,
};
pub use udp::{UdpReceiver, UdpReceiverConfig, UdpReceiverMetricsHandle};
