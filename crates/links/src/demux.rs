//! Demux - stateless fan-out link
//!
//! Replicates each inbound message to every wired downstream through the
//! free [`multiplex`](crate::multiplex) helper: same copy semantics and
//! aggregation rules as `Mpx`, but with one overall delivery window per
//! message and no aggregation state owned by the link.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use relay_core::{Cmd, CmdCode, Connector, CoreError, Link, Message, MsgStatus, Result, SendError};
use relay_metrics::{MetricsProvider, Snapshot};

use crate::mpx::{multiplex, MPX_MSG_SEND_TIMEOUT};

/// Stateless fan-out link
pub struct Demux {
    connector: Connector,
    downstreams: Arc<Mutex<Vec<Arc<dyn Link>>>>,
    metrics: Arc<DemuxMetrics>,
}

/// Demux counters
#[derive(Debug, Default)]
pub struct DemuxMetrics {
    pub msgs_received: AtomicU64,
    pub fanout_done: AtomicU64,
    pub fanout_partial: AtomicU64,
    pub fanout_failed: AtomicU64,
}

impl DemuxMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            fanout_done: AtomicU64::new(0),
            fanout_partial: AtomicU64::new(0),
            fanout_failed: AtomicU64::new(0),
        }
    }
}

/// Handle for reading demux counters
#[derive(Clone)]
pub struct DemuxMetricsHandle {
    id: String,
    metrics: Arc<DemuxMetrics>,
}

impl MetricsProvider for DemuxMetricsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "link"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from([
            ("msgs_received", self.metrics.msgs_received.load(Ordering::Relaxed)),
            ("fanout_done", self.metrics.fanout_done.load(Ordering::Relaxed)),
            ("fanout_partial", self.metrics.fanout_partial.load(Ordering::Relaxed)),
            ("fanout_failed", self.metrics.fanout_failed.load(Ordering::Relaxed)),
        ])
    }
}

impl Demux {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            connector: Connector::new(name),
            downstreams: Arc::new(Mutex::new(Vec::new())),
            metrics: Arc::new(DemuxMetrics::new()),
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> DemuxMetricsHandle {
        DemuxMetricsHandle {
            id: self.connector.name().to_string(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    fn spawn_worker(&self) -> Result<()> {
        let Some(mut rx) = self.connector.take_msg_rx() else {
            return Err(CoreError::Lifecycle(format!(
                "{} worker is already running",
                self.connector.name()
            )));
        };
        let cancel = self.connector.cancel_token();
        let downstreams = Arc::clone(&self.downstreams);
        let metrics = Arc::clone(&self.metrics);
        let name = self.connector.name().to_string();

        tokio::spawn(async move {
            tracing::debug!(link = %name, "demux worker starting");
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        while let Ok(msg) = rx.try_recv() {
                            let snapshot = downstreams.lock().clone();
                            replicate(msg, &snapshot, &metrics).await;
                        }
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(msg) => {
                            let snapshot = downstreams.lock().clone();
                            replicate(msg, &snapshot, &metrics).await;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(link = %name, "demux worker stopping");
        });

        Ok(())
    }
}

async fn replicate(msg: Message, links: &[Arc<dyn Link>], metrics: &DemuxMetrics) {
    metrics.msgs_received.fetch_add(1, Ordering::Relaxed);
    let status = multiplex(&msg, links, MPX_MSG_SEND_TIMEOUT).await;
    let counter = match status {
        MsgStatus::Done => &metrics.fanout_done,
        MsgStatus::PartialSend => &metrics.fanout_partial,
        _ => &metrics.fanout_failed,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}

impl Link for Demux {
    fn name(&self) -> &str {
        self.connector.name()
    }

    fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
        self.connector.enqueue(msg)
    }

    fn connect_to(&self, _next: Arc<dyn Link>) -> Result<()> {
        Err(CoreError::IllegalWiring(
            "demux is a fan-out link, wire it with link_to",
        ))
    }

    fn link_to(&self, next: Vec<Arc<dyn Link>>) -> Result<()> {
        self.downstreams.lock().extend(next);
        Ok(())
    }

    fn exec_cmd(&self, cmd: &Cmd) -> Result<()> {
        match cmd.code {
            CmdCode::SetUp => self.spawn_worker(),
            CmdCode::Start => Ok(()),
            CmdCode::Stop | CmdCode::TearDown => {
                self.connector.stop();
                Ok(())
            }
        }
    }
}
