//! Relay - Sinks
//!
//! Egress endpoints: each sink consumes messages from its connector,
//! performs the I/O, and settles every message with `Done` or `Failed`.
//!
//! - [`DumperSink`] - append payloads line-by-line to a file or stdout.
//! - [`TcpSink`] - one outbound connection, newline-framed writes,
//!   reconnect on failure.
//! - [`UdpSink`] - one datagram per message.
//!
//! Sinks are terminal: both `connect_to` and `link_to` are usage errors.

mod dumper;
mod tcp;
mod udp;

pub use dumper::{DumperSink, DumperSinkConfig, DumperSinkMetricsHandle};
pub use tcp::{TcpSink, TcpSinkConfig, TcpSinkMetricsHandle};
pub use udp::{UdpSink, UdpSinkConfig, UdpSinkMetricsHandle};
