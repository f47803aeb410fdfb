//! Provider trait and registry

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Point-in-time counter snapshot, keyed by counter name
///
/// A `BTreeMap` keeps serialized output stable across collections.
pub type Snapshot = BTreeMap<&'static str, u64>;

/// Implemented by component metrics handles
pub trait MetricsProvider: Send + Sync {
    /// Component name the counters belong to
    fn id(&self) -> &str;

    /// Component family: `"receiver"`, `"link"` or `"sink"`
    fn kind(&self) -> &'static str;

    /// Read every counter
    fn snapshot(&self) -> Snapshot;
}

/// Registry of provider handles, collected by the admin surface
#[derive(Default)]
pub struct MetricsRegistry {
    providers: RwLock<Vec<Arc<dyn MetricsProvider>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider handle
    pub fn register(&self, provider: Arc<dyn MetricsProvider>) {
        self.providers.write().push(provider);
    }

    /// Number of registered providers
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    /// Snapshot every provider into a `kind → id → counters` JSON tree
    pub fn collect(&self) -> serde_json::Value {
        let mut tree: BTreeMap<&'static str, BTreeMap<String, Snapshot>> = BTreeMap::new();
        for provider in self.providers.read().iter() {
            tree.entry(provider.kind())
                .or_default()
                .insert(provider.id().to_string(), provider.snapshot());
        }
        serde_json::to_value(tree).unwrap_or(serde_json::Value::Null)
    }
}
