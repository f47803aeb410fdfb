//! Mpx - fan-out multiplexer link
//!
//! Delivers one inbound message to every wired downstream and aggregates
//! their acks into a single status on the original:
//!
//! - zero failures → `Done`
//! - all downstreams failed → `Failed`
//! - anything in between → `PartialSend`
//!
//! Each downstream gets a logical copy with a fresh ack channel; a slot
//! that produces no verdict within [`MPX_MSG_SEND_TIMEOUT`] is counted as
//! failed, and a verdict arriving after its slot timed out is discarded.
//! Longer tails are deliberately demoted to `PartialSend` so the
//! originating receiver stays live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use relay_core::{Cmd, CmdCode, Connector, CoreError, Link, Message, MsgStatus, Result, SendError};
use relay_metrics::{MetricsProvider, Snapshot};

/// Per-slot delivery window for ack aggregation
pub const MPX_MSG_SEND_TIMEOUT: Duration = Duration::from_millis(50);

/// Fan-out multiplexer link
pub struct Mpx {
    connector: Connector,
    downstreams: Arc<Mutex<Vec<Arc<dyn Link>>>>,
    metrics: Arc<MpxMetrics>,
}

/// Mpx counters
#[derive(Debug, Default)]
pub struct MpxMetrics {
    pub msgs_received: AtomicU64,
    pub fanout_done: AtomicU64,
    pub fanout_partial: AtomicU64,
    pub fanout_failed: AtomicU64,
}

impl MpxMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            fanout_done: AtomicU64::new(0),
            fanout_partial: AtomicU64::new(0),
            fanout_failed: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_decision(&self, status: MsgStatus) {
        let counter = match status {
            MsgStatus::Done => &self.fanout_done,
            MsgStatus::PartialSend => &self.fanout_partial,
            _ => &self.fanout_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle for reading Mpx counters after the worker owns them
#[derive(Clone)]
pub struct MpxMetricsHandle {
    id: String,
    metrics: Arc<MpxMetrics>,
}

impl MetricsProvider for MpxMetricsHandle {
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

impl Mpx {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            connector: Connector::new(name),
            downstreams: Arc::new(Mutex::new(Vec::new())),
            metrics: Arc::new(MpxMetrics::new()),
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> MpxMetricsHandle {
        MpxMetricsHandle {
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
            tracing::debug!(link = %name, "mux worker starting");
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        // Drain what the channel already holds: every
                        // buffered message still gets a verdict.
                        while let Ok(msg) = rx.try_recv() {
                            let snapshot = downstreams.lock().clone();
                            fan_out(msg, snapshot, &metrics).await;
                        }
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(msg) => {
                            let snapshot = downstreams.lock().clone();
                            fan_out(msg, snapshot, &metrics).await;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!(link = %name, "mux worker stopping");
        });

        Ok(())
    }
}

/// Deliver one message to every downstream and settle the original
async fn fan_out(msg: Message, links: Vec<Arc<dyn Link>>, metrics: &MpxMetrics) {
    metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

    let n = links.len();
    if n == 0 {
        // Vacuous success
        msg.ack_done();
        metrics.record_decision(MsgStatus::Done);
        return;
    }

    let (agg_tx, mut agg_rx) = mpsc::channel::<MsgStatus>(n);
    for link in links {
        let (copy, copy_ack) = msg.fork();
        let agg_tx = agg_tx.clone();
        tokio::spawn(async move {
            if link.recv(copy).is_err() {
                let _ = agg_tx.try_send(MsgStatus::Failed);
                return;
            }
            // A copy dropped without a verdict reads as a failure.
            let status = copy_ack.recv().await.unwrap_or(MsgStatus::Failed);
            let _ = agg_tx.try_send(status);
        });
    }
    drop(agg_tx);

    let mut acked = 0usize;
    let mut failed = 0usize;
    while acked < n {
        match timeout(MPX_MSG_SEND_TIMEOUT, agg_rx.recv()).await {
            Ok(Some(status)) => {
                acked += 1;
                if status != MsgStatus::Done {
                    failed += 1;
                }
            }
            Ok(None) => {
                // Every dispatch task is gone; nothing else can arrive.
                failed += n - acked;
                acked = n;
            }
            Err(_) => {
                // Timeout tick: one pending slot is charged as failed.
                acked += 1;
                failed += 1;
            }
        }
    }

    let status = if failed == 0 {
        MsgStatus::Done
    } else if failed == n {
        MsgStatus::Failed
    } else {
        MsgStatus::PartialSend
    };
    msg.ack().emit(status);
    metrics.record_decision(status);

    // Dropping agg_rx discards any straggler verdicts.
}

impl Link for Mpx {
    fn name(&self) -> &str {
        self.connector.name()
    }

    fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
        self.connector.enqueue(msg)
    }

    fn connect_to(&self, _next: Arc<dyn Link>) -> Result<()> {
        Err(CoreError::IllegalWiring(
            "mux is a fan-out link, wire it with link_to",
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

/// Fan a message out to `links` and settle the original with the aggregate
///
/// The lower-level cousin of [`Mpx`]: no long-lived worker, one overall
/// `window` for the whole collection. At the deadline the collection is
/// abandoned and every slot still pending counts as failed. Returns the
/// status emitted on the original message.
pub async fn multiplex(msg: &Message, links: &[Arc<dyn Link>], window: Duration) -> MsgStatus {
    let n = links.len();
    if n == 0 {
        msg.ack_done();
        return MsgStatus::Done;
    }

    let (agg_tx, mut agg_rx) = mpsc::channel::<MsgStatus>(n);
    for link in links {
        let link = Arc::clone(link);
        let (copy, copy_ack) = msg.fork();
        let agg_tx = agg_tx.clone();
        tokio::spawn(async move {
            if link.recv(copy).is_err() {
                let _ = agg_tx.try_send(MsgStatus::Failed);
                return;
            }
            let status = copy_ack.recv().await.unwrap_or(MsgStatus::Failed);
            let _ = agg_tx.try_send(status);
        });
    }
    drop(agg_tx);

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    let mut collected = 0usize;
    let mut succeeded = 0usize;
    let mut failed = 0usize;
    while collected < n {
        tokio::select! {
            _ = &mut deadline => {
                failed += n - collected;
                collected = n;
            }
            maybe = agg_rx.recv() => match maybe {
                Some(MsgStatus::Done) => {
                    collected += 1;
                    succeeded += 1;
                }
                Some(_) => {
                    collected += 1;
                    failed += 1;
                }
                None => {
                    failed += n - collected;
                    collected = n;
                }
            },
        }
    }

    let status = if failed == 0 {
        MsgStatus::Done
    } else if succeeded == 0 {
        MsgStatus::Failed
    } else {
        MsgStatus::PartialSend
    };
    msg.ack().emit(status);
    status
}

#[cfg(test)]
#[path = "mpx_test.rs"]
mod mpx_test;
