//! Relay Configuration
//!
//! TOML-based configuration loading with sensible defaults.
//! Minimal config should just work - only specify what you need to change.
//!
//! # Parsing
//!
//! Use the `FromStr` trait to parse configuration:
//!
//! ```
//! use relay_config::Config;
//! use std::str::FromStr;
//!
//! let config = Config::from_str(
//!     "[components.out]\nmodule = \"sink.dumper\"\nparams = { out = \"-\" }",
//! )
//! .unwrap();
//! assert_eq!(config.components["out"].module, "sink.dumper");
//! ```
//!
//! # Example Config
//!
//! ```toml
//! [system]
//! admin_bind_addr = "127.0.0.1:7101"
//!
//! [components.tcp_in]
//! module = "receiver.tcp"
//! params = { bind_addr = "0.0.0.0:3101" }
//!
//! [components.fanout]
//! module = "link.mux"
//!
//! [components.dump]
//! module = "sink.dumper"
//! params = { out = "/var/log/relay/dump.log" }
//!
//! [topology.tcp_in]
//! connect_to = "fanout"
//!
//! [topology.fanout]
//! link_to = ["dump"]
//! ```

mod cache;
mod error;

pub use cache::CacheFile;
pub use error::{CacheError, ConfigError, Result};

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// Free-form component parameters, interpreted by the builder
pub type Params = toml::Table;

/// Main configuration structure
///
/// All sections are optional with sensible defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Process-level settings (admin surface, cache)
    pub system: SystemConfig,

    /// Logging configuration
    pub log: LogConfig,

    /// Pipeline components by name
    pub components: BTreeMap<String, ComponentConfig>,

    /// Wiring between components
    pub topology: BTreeMap<String, TopologyConfig>,
}

/// Process-level settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Admin HTTP bind address; absent disables the admin surface
    pub admin_bind_addr: Option<String>,

    /// Path of the config cache artifact; absent disables caching
    pub cache_path: Option<String>,

    /// Cache TTL in seconds
    pub cache_ttl_sec: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One pipeline component: a module name plus its parameters
#[derive(Debug, Clone, Deserialize)]
pub struct ComponentConfig {
    /// Module selector, e.g. `receiver.tcp` or `link.mux`
    pub module: String,

    /// Module-specific parameters
    #[serde(default)]
    pub params: Params,
}

/// Wiring for one component
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Single downstream for point-to-point components
    pub connect_to: Option<String>,

    /// Downstream set for fan-out components
    pub link_to: Vec<String>,

    /// Routing-value → component map for routers
    pub routes: BTreeMap<String, String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = contents.parse::<Self>()?;
        tracing::debug!(path = %path.display(), components = config.components.len(), "config loaded");
        Ok(config)
    }

    /// Every topology target must name a declared component
    pub fn validate(&self) -> Result<()> {
        for (name, wiring) in &self.topology {
            if !self.components.contains_key(name) {
                return Err(ConfigError::unknown_component(name));
            }
            let targets = wiring
                .connect_to
                .iter()
                .chain(wiring.link_to.iter())
                .chain(wiring.routes.values());
            for target in targets {
                if !self.components.contains_key(target) {
                    return Err(ConfigError::unknown_component(target));
                }
            }
        }
        Ok(())
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}
