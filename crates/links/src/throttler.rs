//! Throttler - token-bucket rate limiting link
//!
//! Forwards at most `rps` messages per second to its single downstream,
//! with a burst allowance of one second's worth of tokens. A message that
//! finds no token is acked `Throttled` and dropped; there is no queueing
//! of rejected messages. `rps = 0` disables the limit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use relay_core::{Cmd, CmdCode, Connector, CoreError, Link, Message, Result, SendError};
use relay_metrics::{MetricsProvider, Snapshot};

/// Token-bucket rate limiting link
pub struct Throttler {
    connector: Arc<Connector>,
    rps: u64,
    metrics: Arc<ThrottlerMetrics>,
}

/// Throttler counters
#[derive(Debug, Default)]
pub struct ThrottlerMetrics {
    pub msgs_received: AtomicU64,
    pub msgs_passed: AtomicU64,
    pub msgs_throttled: AtomicU64,
    pub msgs_failed: AtomicU64,
}

impl ThrottlerMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            msgs_passed: AtomicU64::new(0),
            msgs_throttled: AtomicU64::new(0),
            msgs_failed: AtomicU64::new(0),
        }
    }
}

/// Handle for reading throttler counters
#[derive(Clone)]
pub struct ThrottlerMetricsHandle {
    id: String,
    metrics: Arc<ThrottlerMetrics>,
}

impl MetricsProvider for ThrottlerMetricsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "link"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from([
            ("msgs_received", self.metrics.msgs_received.load(Ordering::Relaxed)),
            ("msgs_passed", self.metrics.msgs_passed.load(Ordering::Relaxed)),
            ("msgs_throttled", self.metrics.msgs_throttled.load(Ordering::Relaxed)),
            ("msgs_failed", self.metrics.msgs_failed.load(Ordering::Relaxed)),
        ])
    }
}

/// Worker-local token bucket; single owner, no locking
struct Bucket {
    tokens: f64,
    burst: f64,
    rate: f64,
    refilled: Instant,
}

impl Bucket {
    fn new(rps: u64) -> Self {
        let rate = rps as f64;
        Self {
            tokens: rate,
            burst: rate,
            rate,
            refilled: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.refilled).as_secs_f64();
        self.refilled = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

impl Throttler {
    pub fn new(name: impl Into<String>, rps: u64) -> Self {
        Self {
            connector: Arc::new(Connector::new(name)),
            rps,
            metrics: Arc::new(ThrottlerMetrics::new()),
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> ThrottlerMetricsHandle {
        ThrottlerMetricsHandle {
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
        let connector = Arc::clone(&self.connector);
        let metrics = Arc::clone(&self.metrics);
        let rps = self.rps;
        let name = self.connector.name().to_string();

        tokio::spawn(async move {
            tracing::debug!(link = %name, rps, "throttler worker starting");
            let mut bucket = Bucket::new(rps);
            let unlimited = rps == 0;
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        while let Ok(msg) = rx.try_recv() {
                            pass_one(msg, unlimited, &mut bucket, &connector, &metrics);
                        }
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(msg) => pass_one(msg, unlimited, &mut bucket, &connector, &metrics),
                        None => break,
                    },
                }
            }
            tracing::debug!(link = %name, "throttler worker stopping");
        });

        Ok(())
    }
}

fn pass_one(
    msg: Message,
    unlimited: bool,
    bucket: &mut Bucket,
    connector: &Connector,
    metrics: &ThrottlerMetrics,
) {
    metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

    if !unlimited && !bucket.try_take() {
        metrics.msgs_throttled.fetch_add(1, Ordering::Relaxed);
        msg.ack_throttled();
        return;
    }

    match connector.send(msg) {
        Ok(()) => {
            metrics.msgs_passed.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            metrics.msgs_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "throttler delivery failed");
            err.into_message().ack_failed();
        }
    }
}

impl Link for Throttler {
    fn name(&self) -> &str {
        self.connector.name()
    }

    fn recv(&self, msg: Message) -> std::result::Result<(), SendError> {
        self.connector.enqueue(msg)
    }

    fn connect_to(&self, next: Arc<dyn Link>) -> Result<()> {
        self.connector.set_downstream(next);
        Ok(())
    }

    fn link_to(&self, _next: Vec<Arc<dyn Link>>) -> Result<()> {
        Err(CoreError::IllegalWiring(
            "throttler is point-to-point, wire it with connect_to",
        ))
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
