//! Router - meta-keyed dispatch link
//!
//! Picks one downstream per message by looking up a meta value in the
//! route table. The original message is forwarded as-is, so the terminal
//! ack of the chosen downstream settles it directly. A message whose key
//! is missing or matches no route is acked `Unroutable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use relay_core::{
    Cmd, CmdCode, Connector, CoreError, Link, Message, MetaValue, Result, SendError, META_TYPE,
};
use relay_metrics::{MetricsProvider, Snapshot};

/// Meta key consulted when none is configured
pub const DEFAULT_ROUTING_KEY: &str = META_TYPE;

/// Meta-keyed dispatch link
pub struct Router {
    connector: Arc<Connector>,
    routing_key: String,
    routes: Arc<RwLock<HashMap<String, Arc<dyn Link>>>>,
    metrics: Arc<RouterMetrics>,
}

/// Router counters
#[derive(Debug, Default)]
pub struct RouterMetrics {
    pub msgs_received: AtomicU64,
    pub msgs_routed: AtomicU64,
    pub msgs_unroutable: AtomicU64,
    pub msgs_failed: AtomicU64,
}

impl RouterMetrics {
    pub const fn new() -> Self {
        Self {
            msgs_received: AtomicU64::new(0),
            msgs_routed: AtomicU64::new(0),
            msgs_unroutable: AtomicU64::new(0),
            msgs_failed: AtomicU64::new(0),
        }
    }
}

/// Handle for reading router counters
#[derive(Clone)]
pub struct RouterMetricsHandle {
    id: String,
    metrics: Arc<RouterMetrics>,
}

impl MetricsProvider for RouterMetricsHandle {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "link"
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot::from([
            ("msgs_received", self.metrics.msgs_received.load(Ordering::Relaxed)),
            ("msgs_routed", self.metrics.msgs_routed.load(Ordering::Relaxed)),
            ("msgs_unroutable", self.metrics.msgs_unroutable.load(Ordering::Relaxed)),
            ("msgs_failed", self.metrics.msgs_failed.load(Ordering::Relaxed)),
        ])
    }
}

impl Router {
    pub fn new(name: impl Into<String>, routing_key: impl Into<String>) -> Self {
        Self {
            connector: Arc::new(Connector::new(name)),
            routing_key: routing_key.into(),
            routes: Arc::new(RwLock::new(HashMap::new())),
            metrics: Arc::new(RouterMetrics::new()),
        }
    }

    /// Counter handle for the metrics registry
    pub fn metrics_handle(&self) -> RouterMetricsHandle {
        RouterMetricsHandle {
            id: self.connector.name().to_string(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Register a downstream for one routing-key value
    ///
    /// Later registrations for the same value replace earlier ones.
    pub fn set_route(&self, value: impl Into<String>, target: Arc<dyn Link>) {
        self.routes.write().insert(value.into(), target);
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
        let routes = Arc::clone(&self.routes);
        let metrics = Arc::clone(&self.metrics);
        let routing_key = self.routing_key.clone();
        let name = self.connector.name().to_string();

        tokio::spawn(async move {
            tracing::debug!(link = %name, routing_key = %routing_key, "router worker starting");
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        while let Ok(msg) = rx.try_recv() {
                            route_one(msg, &routing_key, &routes, &connector, &metrics);
                        }
                        break;
                    }

                    maybe = rx.recv() => match maybe {
                        Some(msg) => route_one(msg, &routing_key, &routes, &connector, &metrics),
                        None => break,
                    },
                }
            }
            tracing::debug!(link = %name, "router worker stopping");
        });

        Ok(())
    }
}

fn route_one(
    msg: Message,
    routing_key: &str,
    routes: &RwLock<HashMap<String, Arc<dyn Link>>>,
    connector: &Connector,
    metrics: &RouterMetrics,
) {
    metrics.msgs_received.fetch_add(1, Ordering::Relaxed);

    let target = match route_value(&msg, routing_key) {
        Some(value) => routes.read().get(&value).cloned(),
        None => None,
    };

    // An unmatched value falls back to the connect_to downstream, if any.
    let result = match target {
        Some(link) => link.recv(msg),
        None => connector.send(msg),
    };

    match result {
        Ok(()) => {
            metrics.msgs_routed.fetch_add(1, Ordering::Relaxed);
        }
        Err(SendError::NoDownstream(msg, _)) => {
            metrics.msgs_unroutable.fetch_add(1, Ordering::Relaxed);
            msg.ack_unroutable();
        }
        Err(err) => {
            metrics.msgs_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %err, "router delivery failed");
            err.into_message().ack_failed();
        }
    }
}

/// Stringify the routing meta value, if present
fn route_value(msg: &Message, routing_key: &str) -> Option<String> {
    match msg.meta(routing_key)? {
        MetaValue::Str(s) => Some(s.clone()),
        MetaValue::Int(n) => Some(n.to_string()),
        MetaValue::Bool(b) => Some(b.to_string()),
    }
}

impl Link for Router {
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
            "router picks one downstream per message, wire routes or connect_to",
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

#[cfg(test)]
#[path = "router_test.rs"]
mod router_test;
