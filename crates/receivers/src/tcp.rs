//! TCP receiver - line-delimited ingress with reply tokens
//!
//! Accepts `\n`-terminated lines, builds one message per line and pushes it
//! into the pipeline. In talkative mode (the default) every accepted line
//! gets exactly one ASCII reply token on the same connection; silent mode
//! suppresses the writes but consumes acks the same way.
//!
//! # Session
//!
//! ```text
//!    ACCEPTED → READING ──(line)──► DISPATCHED ──(sync?)──►
//!                   ▲                      │ yes          │ no
//!                   │                      ▼              ▼
//!                   │               AWAIT_ACK          REPLY_ACCEPTED
//!                   │                      │              │
//!                   └─────────(next)───────┴──────────────┘
//!    read error / empty payload / EOF ─► CLOSING
//! ```
//!
//! Reads and writes each carry a 1 s deadline; a sync message waits at most
//! [`TCP_MSG_SEND_TIMEOUT`] for its verdict before replying `TIMEOUT`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::RwLock;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use relay_core::{
    Cmd, CmdCode, Connector, CoreError, Link, Message, Meta, MsgStatus, Result, SendError,
};
use relay_metrics::{MetricsProvider, Snapshot};

/// Per-read socket deadline
pub const CONN_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-write socket deadline
pub const CONN_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// How long a sync message waits for its verdict
pub const TCP_MSG_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Keepalive idle time applied to accepted sockets
const KEEPALIVE_TIME: Duration = Duration::from_secs(60);

/// Upper bound on a single line, defends the session buffer
const MAX_LINE_BYTES: usize = 1024 * 1024;

pub const REPLY_ACCEPTED: &[u8] = b"ACCEPTED";
pub const REPLY_SENT: &[u8] = b"SENT";
pub const REPLY_PART_SENT: &[u8] = b"PART_SENT";
pub const REPLY_FAILED: &[u8] = b"FAILED";
pub const REPLY_INVALID: &[u8] = b"INVALID";
pub const REPLY_TIMEOUT: &[u8] = b"TIMEOUT";
pub const REPLY_UNROUTABLE: &[u8] = b"UNROUTABLE";
pub const REPLY_THROTTLED: &[u8] = b"THROTTLED";

/// Map a terminal status to its wire token
pub fn status_reply(status: MsgStatus) -> &'static [u8] {
    match status {
        MsgStatus::Done => REPLY_SENT,
        MsgStatus::PartialSend => REPLY_PART_SENT,
        MsgStatus::Invalid => REPLY_INVALID,
        MsgStatus::Failed => REPLY_FAILED,
        MsgStatus::TimedOut => REPLY_TIMEOUT,
        MsgStatus::Unroutable => REPLY_UNROUTABLE,
        MsgStatus::Throttled => REPLY_THROTTLED,
    }
}

/// Reply policy per connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyMode {
    /// No replies written; acks are still consumed
    Silent,
    /// One token per accepted line
    #[default]
    Talkative,
}

/// TCP receiver configuration
#[derive(Debug, Clone)]
pub struct TcpReceiverConfig {
    /// Listen address, e.g. `127.0.0.1:3101`
    pub bind_addr: String,

    /// Reply policy
    pub mode: ReplyMode,

    /// Meta stamped onto every message this receiver constructs
    pub meta: Meta,
}

impl TcpReceiverConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            mode: ReplyMode::default(),
            meta: Meta::new(),
        }
    }
}

/// TCP receiver counters
#[derive(Debug, Default)]
pub struct TcpReceiverMetrics {
    pub conns_opened: AtomicU64,
    pub conns_closed: AtomicU64,
    pub conns_failed: AtomicU64,
    pub msgs_received: AtomicU64,
    pub msgs_accepted: AtomicU64,
    pub msgs_sent: AtomicU64,
    pub msgs_failed: AtomicU64,
    pub msgs_timed_out: AtomicU64,
}

impl TcpReceiverMetrics {
    pub const fn new() -> Self {
        Self {
            conns_opened: AtomicU64::new(0),
            conns_closed: AtomicU64::new(0),
            conns_failed: AtomicU64::new(0),
            msgs_received: AtomicU64::new(0),
            msgs_accepted: AtomicU64::new(0),
            msgs_sent: AtomicU64::new(0),
            msgs_failed: AtomicU64::new(0),
            msgs_timed_out: AtomicU64::new(0),
        }
    }
}

/// Handle for reading TCP receiver counters
#[derive(Clone)]
pub struct TcpReceiverMetricsHandle {
    id: String,
    metrics: Arc<TcpReceiverMetrics>,
}

impl MetricsProvider for TcpReceiverMetricsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "receiver"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from([
            ("conns_opened", self.metrics.conns_opened.load(Ordering::Relaxed)),
            ("conns_closed", self.metrics.conns_closed.load(Ordering::Relaxed)),
            ("conns_failed", self.metrics.conns_failed.load(Ordering::Relaxed)),
            ("msgs_received", self.metrics.msgs_received.load(Ordering::Relaxed)),
            ("msgs_accepted", self.metrics.msgs_accepted.load(Ordering::Relaxed)),
            ("msgs_sent", self.metrics.msgs_sent.load(Ordering::Relaxed)),
            ("msgs_failed", self.metrics.msgs_failed.load(Ordering::Relaxed)),
            ("msgs_timed_out", self.metrics.msgs_timed_out.load(Ordering::Relaxed)),
        ])
    }
}

/// Line-delimited TCP receiver
pub struct TcpReceiver {
    name: String,
    bind_addr: String,
    shared: Arc<SessionShared>,
    local_addr: RwLock<Option<SocketAddr>>,
}

/// Everything a connection task needs, cloneable by Arc
struct SessionShared {
    name: String,
    mode: ReplyMode,
    meta: Meta,
    connector: Connector,
    metrics: Arc<TcpReceiverMetrics>,
}

impl TcpReceiver {
    pub fn new(name: impl Into<String>, config: TcpReceiverConfig) -> Self {
        let name = name.into();
        Self {
            bind_addr: config.bind_addr,
            shared: Arc::new(SessionShared {
                name: name.clone(),
                mode: config.mode,
                meta: config.meta,
                connector: Connector::new(name.clone()),
                metrics: Arc::new(TcpReceiverMetrics::new()),
            }),
            name,
            local_addr: RwLock::new(None),
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> TcpReceiverMetricsHandle {
        TcpReceiverMetricsHandle {
            id: self.name.clone(),
            metrics: Arc::clone(&self.shared.metrics),
        }
    }

    /// The bound address, available after `SetUp`
    ///
    /// Useful with a `:0` bind where the OS picks the port.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    fn set_up(&self) -> Result<()> {
        if self.local_addr.read().is_some() {
            return Err(CoreError::Lifecycle(format!(
                "{} listener is already bound",
                self.name
            )));
        }

        let std_listener = std::net::TcpListener::bind(&self.bind_addr)?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.write() = Some(local_addr);

        tracing::info!(
            receiver = %self.name,
            addr = %local_addr,
            mode = ?self.shared.mode,
            "TCP receiver listening"
        );

        let shared = Arc::clone(&self.shared);
        let cancel = shared.connector.cancel_token();
        tokio::spawn(accept_loop(listener, shared, cancel));

        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<SessionShared>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    shared.metrics.conns_opened.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(receiver = %shared.name, peer = %peer_addr, "connection accepted");

                    configure_socket(&stream);

                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        shared.handle_session(stream).await;
                        shared.metrics.conns_closed.fetch_add(1, Ordering::Relaxed);
                    });
                }
                Err(e) => {
                    // Transient accept errors: log and keep accepting.
                    tracing::warn!(receiver = %shared.name, error = %e, "accept error");
                    shared.metrics.conns_failed.fetch_add(1, Ordering::Relaxed);
                }
            },
        }
    }
    tracing::info!(receiver = %shared.name, "TCP receiver stopped");
}

fn configure_socket(stream: &TcpStream) {
    let sock = SockRef::from(stream);
    if let Err(e) = sock.set_tcp_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let keepalive = TcpKeepalive::new().with_time(KEEPALIVE_TIME);
    if let Err(e) = sock.set_tcp_keepalive(&keepalive) {
        tracing::debug!(error = %e, "failed to set TCP keepalive");
    }
}

impl SessionShared {
    /// Drive one connection until it closes
    async fn handle_session<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);
        let mut buf: Vec<u8> = Vec::new();

        loop {
            buf.clear();
            let n = match timeout(CONN_READ_TIMEOUT, read_line(&mut reader, &mut buf)).await {
                // Read deadline expired. An idle connection closes quietly;
                // a partial frame is answered with INVALID first.
                Err(_) => {
                    if !buf.is_empty() {
                        self.metrics.conns_failed.fetch_add(1, Ordering::Relaxed);
                        self.reply(&mut write_half, REPLY_INVALID).await;
                    }
                    break;
                }
                Ok(Err(e)) => {
                    tracing::debug!(receiver = %self.name, error = %e, "read error");
                    if !buf.is_empty() {
                        self.metrics.conns_failed.fetch_add(1, Ordering::Relaxed);
                        self.reply(&mut write_half, REPLY_INVALID).await;
                    }
                    break;
                }
                Ok(Ok(n)) => n,
            };

            // Empty read: the peer is gone.
            if n == 0 {
                break;
            }

            self.metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

            // A line without the terminator means the stream ended mid-way;
            // process it, then close.
            let at_eof = buf.last() != Some(&b'\n');
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }

            // An empty payload ends the session without a reply.
            if buf.is_empty() {
                break;
            }

            let (msg, ack) =
                Message::with_meta(self.meta.clone(), Bytes::copy_from_slice(&buf));
            let is_sync = msg.is_sync();

            if let Err(e) = self.connector.send(msg) {
                self.metrics.msgs_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(receiver = %self.name, error = %e, "failed to dispatch message");
                self.reply(&mut write_half, REPLY_FAILED).await;
                if at_eof {
                    break;
                }
                continue;
            }

            if !is_sync {
                self.metrics.msgs_accepted.fetch_add(1, Ordering::Relaxed);
                self.reply(&mut write_half, REPLY_ACCEPTED).await;
            } else {
                match timeout(TCP_MSG_SEND_TIMEOUT, ack.recv()).await {
                    Ok(Some(status)) => {
                        self.metrics.msgs_sent.fetch_add(1, Ordering::Relaxed);
                        self.reply(&mut write_half, status_reply(status)).await;
                    }
                    // No verdict within the window, or the message was
                    // dropped unacked further down: both read as a timeout.
                    Ok(None) | Err(_) => {
                        self.metrics.msgs_timed_out.fetch_add(1, Ordering::Relaxed);
                        self.reply(&mut write_half, REPLY_TIMEOUT).await;
                    }
                }
            }

            if at_eof {
                break;
            }
        }
    }

    async fn reply<W>(&self, writer: &mut W, token: &[u8])
    where
        W: AsyncWrite + Unpin,
    {
        if self.mode == ReplyMode::Silent {
            return;
        }
        match timeout(CONN_WRITE_TIMEOUT, writer.write_all(token)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(receiver = %self.name, error = %e, "reply write failed");
            }
            Err(_) => {
                tracing::debug!(receiver = %self.name, "reply write deadline expired");
            }
        }
    }
}

/// `read_until` with a line-length cap
async fn read_line<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    use tokio::io::AsyncBufReadExt;

    let n = reader.read_until(b'\n', buf).await?;
    if buf.len() > MAX_LINE_BYTES {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "line exceeds maximum length",
        ));
    }
    Ok(n)
}

impl Link for TcpReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
        Err(SendError::Rejected(
            msg,
            self.name.clone(),
            "receivers do not accept pipeline messages",
        ))
    }

    fn connect_to(&self, next: Arc<dyn Link>) -> Result<()> {
        self.shared.connector.set_downstream(next);
        Ok(())
    }

    fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> Result<()> {
        Err(CoreError::IllegalWiring(
            "receivers are point-to-point, wire them with connect_to",
        ))
    }

    fn exec_cmd(&self, cmd: &Cmd) -> Result<()> {
        match cmd.code {
            CmdCode::SetUp => self.set_up(),
            CmdCode::Start => Ok(()),
            CmdCode::Stop | CmdCode::TearDown => {
                self.shared.connector.stop();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
#[path = "tcp_test.rs"]
mod tcp_test;
