//! UDP sink - one datagram per message
//!
//! Sends each payload as a single datagram to the target. Delivery is
//! unacknowledged on the wire, so `Done` here means the datagram left the
//! socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UdpSocket;

use relay_core::{Cmd, CmdCode, Connector, CoreError, Link, Message, Result, SendError};
use relay_metrics::{MetricsProvider, Snapshot};

/// UDP sink configuration
#[derive(Debug, Clone)]
pub struct UdpSinkConfig {
    /// Target address, e.g. `upstream.example:3102`
    pub bind_addr: String,
}

impl UdpSinkConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }
}

/// UDP sink counters
#[derive(Debug, Default)]
pub struct UdpSinkMetrics {
    pub msgs_received: AtomicU64,
    pub msgs_written: AtomicU64,
    pub write_errors: AtomicU64,
}

impl UdpSinkMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            msgs_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }
}

/// Handle for reading UDP sink counters
#[derive(Clone)]
pub struct UdpSinkMetricsHandle {
    id: String,
    metrics: Arc<UdpSinkMetrics>,
}

impl MetricsProvider for UdpSinkMetricsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "sink"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from([
            ("msgs_received", self.metrics.msgs_received.load(Ordering::Relaxed)),
            ("msgs_written", self.metrics.msgs_written.load(Ordering::Relaxed)),
            ("write_errors", self.metrics.write_errors.load(Ordering::Relaxed)),
        ])
    }
}

/// Datagram-per-message sink
pub struct UdpSink {
    name: String,
    target: String,
    connector: Connector,
    metrics: Arc<UdpSinkMetrics>,
}

impl UdpSink {
    pub fn new(name: impl Into<String>, config: UdpSinkConfig) -> Self {
        let name = name.into();
        Self {
            connector: Connector::new(name.clone()),
            target: config.bind_addr,
            metrics: Arc::new(UdpSinkMetrics::new()),
            name,
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> UdpSinkMetricsHandle {
        UdpSinkMetricsHandle {
            id: self.name.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn set_up(&self) -> Result<()> {
        let Some(mut rx) = self.connector.take_msg_rx() else {
            return Err(CoreError::Lifecycle(format!(
                "{} worker is already running",
                self.name
            )));
        };

        let std_socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;

        let cancel = self.connector.cancel_token();
        let metrics = Arc::clone(&self.metrics);
        let target = self.target.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            tracing::info!(sink = %name, target = %target, "UDP sink starting");
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        while let Ok(msg) = rx.try_recv() {
                            send_one(&socket, &target, msg, &metrics).await;
                        }
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(msg) => send_one(&socket, &target, msg, &metrics).await,
                        None => break,
                    },
                }
            }
            tracing::info!(sink = %name, "UDP sink stopping");
        });

        Ok(())
    }
}

async fn send_one(socket: &UdpSocket, target: &str, msg: Message, metrics: &UdpSinkMetrics) {
    metrics.msgs_received.fetch_add(1, Ordering::Relaxed);
    match socket.send_to(msg.payload(), target).await {
        Ok(_) => {
            metrics.msgs_written.fetch_add(1, Ordering::Relaxed);
            msg.ack_done();
        }
        Err(e) => {
            metrics.write_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(target = %target, error = %e, "datagram send failed");
            msg.ack_failed();
        }
    }
}

impl Link for UdpSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
        self.connector.enqueue(msg)
    }

    fn connect_to(&self, _next: Arc<dyn Link>) -> Result<()> {
        Err(CoreError::IllegalWiring("sinks are terminal"))
    }

    fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> Result<()> {
        Err(CoreError::IllegalWiring("sinks are terminal"))
    }

    fn exec_cmd(&self, cmd: &Cmd) -> Result<()> {
        match cmd.code {
            CmdCode::SetUp => self.set_up(),
            CmdCode::Start => Ok(()),
            CmdCode::Stop | CmdCode::TearDown => {
                self.connector.stop();
                Ok(())
            }
        }
    }
}
