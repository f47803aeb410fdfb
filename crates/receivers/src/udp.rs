//! UDP receiver - one datagram, one message
//!
//! Fire-and-forget ingress: datagrams become messages with no reply
//! channel, so sync meta has no effect and ack streams are dropped
//! unconsumed (the capacity-1 ack channel never blocks an emitter).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::net::UdpSocket;

use relay_core::{
    Cmd, CmdCode, Connector, CoreError, Link, Message, Meta, Result, SendError,
};
use relay_metrics::{MetricsProvider, Snapshot};

/// Largest datagram the receiver will accept
const MAX_DATAGRAM_BYTES: usize = 64 * 1024;

/// UDP receiver configuration
#[derive(Debug, Clone)]
pub struct UdpReceiverConfig {
    /// Listen address, e.g. `127.0.0.1:3102`
    pub bind_addr: String,

    /// Meta stamped onto every message this receiver constructs
    pub meta: Meta,
}

impl UdpReceiverConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            meta: Meta::new(),
        }
    }
}

/// UDP receiver counters
#[derive(Debug, Default)]
pub struct UdpReceiverMetrics {
    pub msgs_received: AtomicU64,
    pub msgs_accepted: AtomicU64,
    pub msgs_failed: AtomicU64,
    pub recv_errors: AtomicU64,
}

impl UdpReceiverMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            msgs_accepted: AtomicU64::new(0),
            msgs_failed: AtomicU64::new(0),
            recv_errors: AtomicU64::new(0),
        }
    }
}

/// Handle for reading UDP receiver counters
#[derive(Clone)]
pub struct UdpReceiverMetricsHandle {
    id: String,
    metrics: Arc<UdpReceiverMetrics>,
}

impl MetricsProvider for UdpReceiverMetricsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "receiver"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from([
            ("msgs_received", self.metrics.msgs_received.load(Ordering::Relaxed)),
            ("msgs_accepted", self.metrics.msgs_accepted.load(Ordering::Relaxed)),
            ("msgs_failed", self.metrics.msgs_failed.load(Ordering::Relaxed)),
            ("recv_errors", self.metrics.recv_errors.load(Ordering::Relaxed)),
        ])
    }
}

/// Datagram receiver
pub struct UdpReceiver {
    name: String,
    config: UdpReceiverConfig,
    connector: Arc<Connector>,
    metrics: Arc<UdpReceiverMetrics>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl UdpReceiver {
    pub fn new(name: impl Into<String>, config: UdpReceiverConfig) -> Self {
        let name = name.into();
        Self {
            connector: Arc::new(Connector::new(name.clone())),
            config,
            metrics: Arc::new(UdpReceiverMetrics::new()),
            local_addr: RwLock::new(None),
            name,
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> UdpReceiverMetricsHandle {
        UdpReceiverMetricsHandle {
            id: self.name.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// The bound address, available after `SetUp`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    fn set_up(&self) -> Result<()> {
        if self.local_addr.read().is_some() {
            return Err(CoreError::Lifecycle(format!(
                "{} socket is already bound",
                self.name
            )));
        }

        let std_socket = std::net::UdpSocket::bind(&self.config.bind_addr)?;
        std_socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_socket)?;
        let local_addr = socket.local_addr()?;
        *self.local_addr.write() = Some(local_addr);

        tracing::info!(receiver = %self.name, addr = %local_addr, "UDP receiver listening");

        let connector = Arc::clone(&self.connector);
        let metrics = Arc::clone(&self.metrics);
        let meta = self.config.meta.clone();
        let cancel = self.connector.cancel_token();
        let name = self.name.clone();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    result = socket.recv_from(&mut buf) => match result {
                        Ok((n, peer)) => {
                            metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

                            let mut end = n;
                            while end > 0 && matches!(buf[end - 1], b'\n' | b'\r') {
                                end -= 1;
                            }
                            if end == 0 {
                                continue;
                            }

                            let (msg, _ack) = Message::with_meta(
                                meta.clone(),
                                Bytes::copy_from_slice(&buf[..end]),
                            );
                            match connector.send(msg) {
                                Ok(()) => {
                                    metrics.msgs_accepted.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(e) => {
                                    metrics.msgs_failed.fetch_add(1, Ordering::Relaxed);
                                    tracing::debug!(
                                        receiver = %name,
                                        peer = %peer,
                                        error = %e,
                                        "failed to dispatch datagram"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            metrics.recv_errors.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(receiver = %name, error = %e, "recv error");
                        }
                    },
                }
            }
            tracing::info!(receiver = %name, "UDP receiver stopped");
        });

        Ok(())
    }
}

impl Link for UdpReceiver {
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
        self.connector.set_downstream(next);
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
                self.connector.stop();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::sync::Notify;

    /// Records payloads and pings a notifier on arrival
    struct RecordingSink {
        name: String,
        payloads: Mutex<Vec<Vec<u8>>>,
        arrived: Arc<Notify>,
    }

    impl RecordingSink {
        fn new() -> (Arc<Self>, Arc<Notify>) {
            let arrived = Arc::new(Notify::new());
            (
                Arc::new(Self {
                    name: "recording".to_string(),
                    payloads: Mutex::new(Vec::new()),
                    arrived: Arc::clone(&arrived),
                }),
                arrived,
            )
        }
    }

    impl Link for RecordingSink {
        fn name(&self) -> &str {
            &self.name
        }

        fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
            self.payloads.lock().push(msg.payload().to_vec());
            msg.ack_done();
            self.arrived.notify_one();
            Ok(())
        }

        fn connect_to(&self, _next: Arc<dyn Link>) -> Result<()> {
            Err(CoreError::IllegalWiring("sink is terminal"))
        }

        fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> Result<()> {
            Err(CoreError::IllegalWiring("sink is terminal"))
        }

        fn exec_cmd(&self, _cmd: &Cmd) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn datagram_becomes_message() {
        let receiver = UdpReceiver::new("udp-in", UdpReceiverConfig::new("127.0.0.1:0"));
        let (sink, arrived) = RecordingSink::new();
        receiver.connect_to(sink.clone()).unwrap();
        receiver.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();
        let addr = receiver.local_addr().expect("socket bound");

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"ping\n", addr).unwrap();

        tokio::time::timeout(Duration::from_secs(2), arrived.notified())
            .await
            .expect("datagram never arrived");
        assert_eq!(sink.payloads.lock().clone(), vec![b"ping".to_vec()]);

        receiver.exec_cmd(&Cmd::new(CmdCode::TearDown)).unwrap();
    }

    #[tokio::test]
    async fn empty_datagram_is_ignored() {
        let receiver = UdpReceiver::new("udp-in", UdpReceiverConfig::new("127.0.0.1:0"));
        let (sink, arrived) = RecordingSink::new();
        receiver.connect_to(sink.clone()).unwrap();
        receiver.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();
        let addr = receiver.local_addr().expect("socket bound");

        let client = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        client.send_to(b"\r\n", addr).unwrap();
        client.send_to(b"real\n", addr).unwrap();

        tokio::time::timeout(Duration::from_secs(2), arrived.notified())
            .await
            .expect("datagram never arrived");
        assert_eq!(sink.payloads.lock().clone(), vec![b"real".to_vec()]);

        receiver.exec_cmd(&Cmd::new(CmdCode::TearDown)).unwrap();
    }
}
