//! Pipeline context
//!
//! The component registry and metrics registry threaded through the
//! builder. Keeping these on a context object instead of process globals
//! lets tests build isolated pipelines side by side.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use relay_metrics::MetricsRegistry;

use crate::error::{CoreError, Result};
use crate::link::Link;

/// Shared state for one pipeline instance
///
/// Holds strong references to every built component by name. Readers never
/// hold the lock across I/O: lookups clone the `Arc` and release.
pub struct Context {
    components: RwLock<HashMap<String, Arc<dyn Link>>>,
    metrics: MetricsRegistry,
}

impl Context {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            components: RwLock::new(HashMap::new()),
            metrics: MetricsRegistry::new(),
        })
    }

    /// Register a component under its name
    ///
    /// Duplicate names are a configuration error: silently replacing a
    /// component would orphan live wiring.
    pub fn register(&self, name: impl Into<String>, link: Arc<dyn Link>) -> Result<()> {
        let name = name.into();
        let mut components = self.components.write();
        if components.contains_key(&name) {
            return Err(CoreError::InvalidParam {
                name: "name",
                reason: format!("component {name:?} is already registered"),
            });
        }
        components.insert(name, link);
        Ok(())
    }

    /// Look up a component by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Link>> {
        self.components.read().get(name).cloned()
    }

    /// Names of all registered components, sorted
    pub fn component_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered components
    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }

    /// The metrics registry for this pipeline
    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("components", &self.component_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::Connector;
    use crate::error::SendError;
    use crate::link::Cmd;
    use crate::message::Message;

    struct NamedLink {
        connector: Connector,
    }

    impl NamedLink {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                connector: Connector::new(name),
            })
        }
    }

    impl Link for NamedLink {
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
            Err(CoreError::IllegalWiring("point-to-point link"))
        }

        fn exec_cmd(&self, _cmd: &Cmd) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let ctx = Context::new();
        ctx.register("a", NamedLink::new("a")).unwrap();
        ctx.register("b", NamedLink::new("b")).unwrap();

        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.get("a").unwrap().name(), "a");
        assert!(ctx.get("missing").is_none());
        assert_eq!(ctx.component_names(), vec!["a", "b"]);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let ctx = Context::new();
        ctx.register("dup", NamedLink::new("dup")).unwrap();
        assert!(ctx.register("dup", NamedLink::new("dup")).is_err());
    }

    #[test]
    fn contexts_are_isolated() {
        let ctx_a = Context::new();
        let ctx_b = Context::new();
        ctx_a.register("only-in-a", NamedLink::new("only-in-a")).unwrap();

        assert!(ctx_b.get("only-in-a").is_none());
        assert!(ctx_b.is_empty());
    }
}
