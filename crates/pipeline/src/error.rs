//! Pipeline error types
//!
//! Everything here is fatal at build time: a pipeline either constructs
//! completely or not at all.

use thiserror::Error;

use relay_core::CoreError;

/// Pipeline construction and lifecycle errors
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The builder does not know this module name
    #[error("unknown module: {0}")]
    UnknownModule(String),

    /// A module is missing a required parameter
    #[error("module {module} is missing required parameter '{param}'")]
    MissingParam {
        module: String,
        param: &'static str,
    },

    /// A parameter has the wrong shape or an unsupported value
    #[error("module {module} has invalid parameter '{param}': {reason}")]
    InvalidParam {
        module: String,
        param: &'static str,
        reason: String,
    },

    /// A topology entry cannot be applied
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Wiring or lifecycle failure from a component
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Configuration loading failure
    #[error(transparent)]
    Config(#[from] relay_config::ConfigError),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;
