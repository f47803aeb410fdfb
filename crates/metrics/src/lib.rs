//! Relay - Metrics
//!
//! Internal metrics collection for observability.
//!
//! # Design Principles
//!
//! - **Lock-free**: components count with `AtomicU64` and relaxed ordering;
//!   counters impose no ordering on message flow.
//! - **Low overhead**: no allocations during metric updates.
//! - **Trait-based**: components expose a lightweight handle implementing
//!   [`MetricsProvider`]; the handle stays valid after the component's
//!   worker consumes it.
//!
//! # Handle Pattern
//!
//! ```text
//! Component (owns Arc<XMetrics>)
//!     │
//!     ├──► metrics_handle() → Handle (clones Arc, implements MetricsProvider)
//!     │
//!     └──► worker task [Arc keeps the counters alive]
//! ```
//!
//! The builder registers every handle with the [`MetricsRegistry`] carried
//! by the pipeline context; the admin surface serializes the registry to
//! JSON.

mod registry;

pub use registry::{MetricsProvider, MetricsRegistry, Snapshot};
