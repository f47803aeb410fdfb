//! Relay - Pipeline
//!
//! Turns configuration into a running dataplane:
//!
//! ```text
//! Config ──► build(module, params, context) ──► components
//!                        │
//!                        ▼
//!             topology wiring (connect_to / link_to / routes)
//!                        │
//!                        ▼
//!             SetUp + Start, leaves first ──► running pipeline
//! ```
//!
//! The [`build`] function is the module registry: it recognizes the
//! `receiver.*`, `link.*` and `sink.*` selectors and rejects everything
//! else at construction time. [`Pipeline`] owns ordering: sinks start
//! first and stop last, receivers the other way around.

mod builder;
mod error;
mod pipeline;

pub use builder::build;
pub use error::{PipelineError, Result};
pub use pipeline::Pipeline;
