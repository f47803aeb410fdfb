//! TCP sink - newline-framed forwarding over one outbound connection
//!
//! Maintains a single connection to the target, writing payload + `\n`
//! per message. A failed write drops the connection and retries once on a
//! fresh one before the message is acked `Failed`. Connects lazily, so a
//! target that is down at start-up only fails the messages that reach it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use relay_core::{Cmd, CmdCode, Connector, CoreError, Link, Message, Result, SendError};
use relay_metrics::{MetricsProvider, Snapshot};

/// Deadline for establishing the outbound connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline for writing one message
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// TCP sink configuration
#[derive(Debug, Clone)]
pub struct TcpSinkConfig {
    /// Target address, e.g. `upstream.example:3100`
    pub bind_addr: String,
}

impl TcpSinkConfig {
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
        }
    }
}

/// TCP sink counters
#[derive(Debug, Default)]
pub struct TcpSinkMetrics {
    pub msgs_received: AtomicU64,
    pub msgs_written: AtomicU64,
    pub write_errors: AtomicU64,
    pub reconnects: AtomicU64,
}

impl TcpSinkMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            msgs_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }
}

/// Handle for reading TCP sink counters
#[derive(Clone)]
pub struct TcpSinkMetricsHandle {
    id: String,
    metrics: Arc<TcpSinkMetrics>,
}

impl MetricsProvider for TcpSinkMetricsHandle {
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
            ("reconnects", self.metrics.reconnects.load(Ordering::Relaxed)),
        ])
    }
}

/// Single-connection forwarding sink
pub struct TcpSink {
    name: String,
    target: String,
    connector: Connector,
    metrics: Arc<TcpSinkMetrics>,
}

impl TcpSink {
    pub fn new(name: impl Into<String>, config: TcpSinkConfig) -> Self {
        let name = name.into();
        Self {
            connector: Connector::new(name.clone()),
            target: config.bind_addr,
            metrics: Arc::new(TcpSinkMetrics::new()),
            name,
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> TcpSinkMetricsHandle {
        TcpSinkMetricsHandle {
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
        let cancel = self.connector.cancel_token();
        let metrics = Arc::clone(&self.metrics);
        let target = self.target.clone();
        let name = self.name.clone();

        tokio::spawn(async move {
            tracing::info!(sink = %name, target = %target, "TCP sink starting");
            let mut worker = Worker {
                target,
                conn: None,
                metrics,
            };
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        while let Ok(msg) = rx.try_recv() {
                            worker.forward(msg).await;
                        }
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(msg) => worker.forward(msg).await,
                        None => break,
                    },
                }
            }
            if let Some(mut conn) = worker.conn.take() {
                let _ = conn.shutdown().await;
            }
            tracing::info!(sink = %name, "TCP sink stopping");
        });

        Ok(())
    }
}

struct Worker {
    target: String,
    conn: Option<TcpStream>,
    metrics: Arc<TcpSinkMetrics>,
}

impl Worker {
    async fn forward(&mut self, msg: Message) {
        self.metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

        if self.write_once(msg.payload()).await.is_ok() {
            self.metrics.msgs_written.fetch_add(1, Ordering::Relaxed);
            msg.ack_done();
            return;
        }

        // One retry on a fresh connection; a broken pipe usually only
        // surfaces on the write after the peer went away.
        self.conn = None;
        self.metrics.reconnects.fetch_add(1, Ordering::Relaxed);
        match self.write_once(msg.payload()).await {
            Ok(()) => {
                self.metrics.msgs_written.fetch_add(1, Ordering::Relaxed);
                msg.ack_done();
            }
            Err(e) => {
                self.conn = None;
                self.metrics.write_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target = %self.target, error = %e, "forward failed");
                msg.ack_failed();
            }
        }
    }

    async fn write_once(&mut self, payload: &[u8]) -> std::io::Result<()> {
        let conn = match &mut self.conn {
            Some(conn) => conn,
            None => {
                let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.target))
                    .await
                    .map_err(|_| {
                        std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")
                    })??;
                self.conn.insert(stream)
            }
        };
        let write = async {
            conn.write_all(payload).await?;
            conn.write_all(b"\n").await
        };
        timeout(WRITE_TIMEOUT, write)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))?
    }
}

impl Link for TcpSink {
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    use relay_core::MsgStatus;

    #[tokio::test]
    async fn forwards_newline_framed_payloads() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let sink = TcpSink::new("tcp-out", TcpSinkConfig::new(addr.to_string()));
        sink.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();

        let (msg, ack) = Message::new("hello");
        sink.recv(msg).unwrap();

        let (mut conn, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 6];
        timeout(Duration::from_secs(2), conn.read_exact(&mut buf))
            .await
            .expect("no data")
            .unwrap();
        assert_eq!(buf, b"hello\n");

        let status = timeout(Duration::from_secs(1), ack.recv())
            .await
            .expect("sink did not ack");
        assert_eq!(status, Some(MsgStatus::Done));

        sink.exec_cmd(&Cmd::new(CmdCode::Stop)).unwrap();
    }

    #[tokio::test]
    async fn unreachable_target_fails_the_message() {
        // A port with no listener; connect is refused immediately.
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let sink = TcpSink::new("tcp-out", TcpSinkConfig::new(addr.to_string()));
        sink.exec_cmd(&Cmd::new(CmdCode::SetUp)).unwrap();

        let (msg, ack) = Message::new("lost");
        sink.recv(msg).unwrap();

        let status = timeout(Duration::from_secs(5), ack.recv())
            .await
            .expect("sink did not ack");
        assert_eq!(status, Some(MsgStatus::Failed));

        sink.exec_cmd(&Cmd::new(CmdCode::Stop)).unwrap();
    }
}
