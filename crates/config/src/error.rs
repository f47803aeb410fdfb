//! Configuration error types

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// A topology entry names a component that is not declared
    #[error("topology references unknown component '{component}'")]
    UnknownComponent {
        /// Name of the missing component
        component: String,
    },
}

impl ConfigError {
    /// Create an UnknownComponent error
    pub fn unknown_component(component: impl Into<String>) -> Self {
        Self::UnknownComponent {
            component: component.into(),
        }
    }
}

/// Errors from the on-disk config cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// The cache file does not exist
    #[error("cache file '{path}' does not exist")]
    Missing {
        /// Path to the cache file
        path: String,
    },

    /// The cache file is older than its TTL
    #[error("cache file '{path}' has expired (ttl {ttl:?}, modified {age:?} ago)")]
    Expired {
        /// Path to the cache file
        path: String,
        /// Configured time-to-live
        ttl: Duration,
        /// Observed age
        age: Duration,
    },

    /// Filesystem failure while reading or writing the cache
    #[error("cache io error on '{path}': {source}")]
    Io {
        /// Path to the cache file
        path: String,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_component_error_names_the_component() {
        let err = ConfigError::unknown_component("mux0");
        assert!(err.to_string().contains("mux0"));
        assert!(err.to_string().contains("unknown component"));
    }

    #[test]
    fn expired_error_reports_ttl_and_age() {
        let err = CacheError::Expired {
            path: "/tmp/relay.cache".into(),
            ttl: Duration::from_millis(50),
            age: Duration::from_millis(120),
        };
        let text = err.to_string();
        assert!(text.contains("/tmp/relay.cache"));
        assert!(text.contains("expired"));
    }
}
