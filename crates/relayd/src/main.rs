//! relayd - the relay dataplane daemon
//!
//! ```bash
//! relayd --config /etc/relay/relay.toml
//! relayd --config relay.toml --log-level debug
//! ```
//!
//! Loads the TOML config, builds and starts the pipeline, serves the
//! admin surface and runs until ctrl-c.

use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use relay_admin::{default_agents, HttpMux};
use relay_config::{CacheFile, Config};
use relay_core::Context;
use relay_pipeline::Pipeline;

/// Default TTL for the config cache artifact
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Pluggable message-routing dataplane
#[derive(Parser, Debug)]
#[command(name = "relayd")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: std::path::PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides config file.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log.level.clone());
    init_tracing(&level)?;

    consolidate_cache(&cli, &config);

    let context = Context::new();
    let pipeline = Pipeline::build(&config, context.clone()).context("building pipeline")?;
    pipeline.start().context("starting pipeline")?;
    tracing::info!(components = ?pipeline.component_names(), "pipeline running");

    let cancel = CancellationToken::new();
    let mut admin_task = None;
    if let Some(bind_addr) = &config.system.admin_bind_addr {
        let mux = HttpMux::bind(bind_addr, default_agents(context.clone()))
            .await
            .context("binding admin listener")?;
        admin_task = Some(tokio::spawn(mux.serve(cancel.clone())));
    }

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("shutting down");

    cancel.cancel();
    if let Some(task) = admin_task {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "admin server task failed");
        }
    }
    pipeline.stop();

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("parsing log level")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
    Ok(())
}

/// Persist the raw config into the cache artifact, best effort
fn consolidate_cache(cli: &Cli, config: &Config) {
    let Some(cache_path) = &config.system.cache_path else {
        return;
    };
    let ttl = config
        .system
        .cache_ttl_sec
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_CACHE_TTL);
    let cache = CacheFile::new(cache_path, ttl);

    match std::fs::read(&cli.config) {
        Ok(bytes) => {
            if let Err(e) = cache.consolidate(&bytes) {
                tracing::warn!(error = %e, "failed to consolidate config cache");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to re-read config for caching"),
    }
}
