//! Relay - Admin
//!
//! The operator-facing HTTP surface. Agents contribute `(path, handler)`
//! pairs; the mux assembles them into one Axum router and serves until
//! cancelled. The surface is read-only: it reports, it does not steer the
//! pipeline.
//!
//! Built-in agents:
//!
//! - `/health` - liveness probe
//! - `/metrics` - JSON dump of every registered metrics provider
//! - `/components` - names of the registered pipeline components

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, MethodRouter};
use axum::{Json, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use relay_core::Context;

/// Admin surface errors
#[derive(Debug, Error)]
pub enum AdminError {
    /// Could not bind the admin listener
    #[error("failed to bind admin listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Serving failed
    #[error("admin server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// A contributor to the admin surface
pub trait Agent: Send + Sync {
    /// Path the agent claims, e.g. `/metrics`
    fn path(&self) -> &str;

    /// Handler mounted at that path
    fn handler(&self) -> MethodRouter;
}

/// Liveness probe
pub struct HealthAgent;

impl Agent for HealthAgent {
    fn path(&self) -> &str {
        "/health"
    }

    fn handler(&self) -> MethodRouter {
        get(|| async { "OK" })
    }
}

/// Metrics registry dump
pub struct MetricsAgent {
    context: Arc<Context>,
}

impl MetricsAgent {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl Agent for MetricsAgent {
    fn path(&self) -> &str {
        "/metrics"
    }

    fn handler(&self) -> MethodRouter {
        let context = Arc::clone(&self.context);
        get(move || {
            let context = Arc::clone(&context);
            async move { Json(context.metrics().collect()) }
        })
    }
}

/// Component registry listing
pub struct ComponentsAgent {
    context: Arc<Context>,
}

impl ComponentsAgent {
    pub fn new(context: Arc<Context>) -> Self {
        Self { context }
    }
}

impl Agent for ComponentsAgent {
    fn path(&self) -> &str {
        "/components"
    }

    fn handler(&self) -> MethodRouter {
        let context = Arc::clone(&self.context);
        get(move || {
            let context = Arc::clone(&context);
            async move { Json(context.component_names()) }
        })
    }
}

/// The built-in agent set for a pipeline context
pub fn default_agents(context: Arc<Context>) -> Vec<Box<dyn Agent>> {
    vec![
        Box::new(HealthAgent),
        Box::new(MetricsAgent::new(Arc::clone(&context))),
        Box::new(ComponentsAgent::new(context)),
    ]
}

/// Bound admin server, ready to serve
pub struct HttpMux {
    listener: TcpListener,
    router: Router,
}

impl HttpMux {
    /// Bind the listener and assemble the router from `agents`
    pub async fn bind(bind_addr: &str, agents: Vec<Box<dyn Agent>>) -> Result<Self, AdminError> {
        let mut router = Router::new();
        for agent in &agents {
            tracing::debug!(path = %agent.path(), "admin agent mounted");
            router = router.route(agent.path(), agent.handler());
        }

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| AdminError::Bind {
                addr: bind_addr.to_string(),
                source: e,
            })?;

        Ok(Self { listener, router })
    }

    /// The bound address
    pub fn local_addr(&self) -> Result<SocketAddr, AdminError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `cancel` fires
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), AdminError> {
        let addr = self.listener.local_addr()?;
        tracing::info!(addr = %addr, "admin server listening");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("admin server closed");
        Ok(())
    }
}
