//! Dumper sink - newline-framed payload dump
//!
//! Appends each payload plus `\n` to a file, or to stdout when the target
//! is `-`. Every write is flushed before the message is acked, so the
//! dumper doubles as a plain-text debugging tap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use relay_core::{Cmd, CmdCode, Connector, CoreError, Link, Message, Result, SendError};
use relay_metrics::{MetricsProvider, Snapshot};

/// Dumper sink configuration
#[derive(Debug, Clone)]
pub struct DumperSinkConfig {
    /// Output target: a file path, or `-` for stdout
    pub out: String,
}

impl DumperSinkConfig {
    pub fn new(out: impl Into<String>) -> Self {
        Self { out: out.into() }
    }
}

/// Dumper sink counters
#[derive(Debug, Default)]
pub struct DumperSinkMetrics {
    pub msgs_received: AtomicU64,
    pub msgs_written: AtomicU64,
    pub write_errors: AtomicU64,
}

impl DumperSinkMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            msgs_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
        }
    }
}

/// Handle for reading dumper counters
#[derive(Clone)]
pub struct DumperSinkMetricsHandle {
    id: String,
    metrics: Arc<DumperSinkMetrics>,
}

impl MetricsProvider for DumperSinkMetricsHandle {
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

enum DumpTarget {
    Stdout,
    File(std::fs::File),
}

/// Newline-framed payload dump sink
pub struct DumperSink {
    name: String,
    connector: Connector,
    metrics: Arc<DumperSinkMetrics>,
    out: String,
}

impl DumperSink {
    pub fn new(name: impl Into<String>, config: DumperSinkConfig) -> Self {
        let name = name.into();
        Self {
            connector: Connector::new(name.clone()),
            metrics: Arc::new(DumperSinkMetrics::new()),
            out: config.out,
            name,
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> DumperSinkMetricsHandle {
        DumperSinkMetricsHandle {
            id: self.name.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn set_up(&self) -> Result<()> {
        let target = if self.out == "-" {
            DumpTarget::Stdout
        } else {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.out)?;
            DumpTarget::File(file)
        };

        let Some(mut rx) = self.connector.take_msg_rx() else {
            return Err(CoreError::Lifecycle(format!(
                "{} worker is already running",
                self.name
            )));
        };
        let cancel = self.connector.cancel_token();
        let metrics = Arc::clone(&self.metrics);
        let name = self.name.clone();

        tokio::spawn(async move {
            tracing::info!(sink = %name, "dumper sink starting");
            match target {
                DumpTarget::Stdout => {
                    let mut writer = BufWriter::new(tokio::io::stdout());
                    drain(&mut rx, cancel, &mut writer, &metrics).await;
                }
                DumpTarget::File(file) => {
                    let mut writer = BufWriter::new(File::from_std(file));
                    drain(&mut rx, cancel, &mut writer, &metrics).await;
                }
            }
            tracing::info!(sink = %name, "dumper sink stopping");
        });

        Ok(())
    }
}

async fn drain<W>(
    rx: &mut tokio::sync::mpsc::Receiver<Message>,
    cancel: CancellationToken,
    writer: &mut BufWriter<W>,
    metrics: &DumperSinkMetrics,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                while let Ok(msg) = rx.try_recv() {
                    dump_one(msg, writer, metrics).await;
                }
                break;
            }

            maybe = rx.recv() => match maybe {
                Some(msg) => dump_one(msg, writer, metrics).await,
                None => break,
            },
        }
    }
    let _ = writer.flush().await;
}

async fn dump_one<W>(msg: Message, writer: &mut BufWriter<W>, metrics: &DumperSinkMetrics)
where
    W: AsyncWrite + Unpin,
{
    metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

    let write = async {
        writer.write_all(msg.payload()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };

    match write.await {
        Ok(()) => {
            metrics.msgs_written.fetch_add(1, Ordering::Relaxed);
            msg.ack_done();
        }
        Err(e) => {
            metrics.write_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "dump write failed");
            msg.ack_failed();
        }
    }
}

impl Link for DumperSink {
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
