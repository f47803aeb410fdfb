//! Pipeline assembly and lifecycle
//!
//! Builds every configured component, wires the topology and drives
//! lifecycle commands in dependency order: sinks come up first and go
//! down last, so no component ever feeds a downstream that does not
//! exist yet.

use std::collections::HashMap;
use std::sync::Arc;

use relay_config::Config;
use relay_core::{Cmd, CmdCode, Context, Link};
use relay_links::Router;

use crate::builder::{build_component, module_rank};
use crate::error::{PipelineError, Result};

/// A fully wired pipeline
pub struct Pipeline {
    context: Arc<Context>,
    /// Components in set-up order (leaves first)
    ordered: Vec<(String, Arc<dyn Link>)>,
}

impl Pipeline {
    /// Construct and wire every component in `config`
    ///
    /// Components are registered with the context by name; any failure
    /// aborts construction.
    pub fn build(config: &Config, context: Arc<Context>) -> Result<Self> {
        config.validate()?;

        let mut routers: HashMap<String, Arc<Router>> = HashMap::new();
        let mut ranked: Vec<(u8, String, Arc<dyn Link>)> = Vec::new();

        for (name, comp) in &config.components {
            let built = build_component(name, &comp.module, &comp.params, &context)?;
            context.register(name.clone(), Arc::clone(&built.link))?;
            if let Some(router) = built.router {
                routers.insert(name.clone(), router);
            }
            ranked.push((module_rank(&comp.module), name.clone(), built.link));
            tracing::debug!(component = %name, module = %comp.module, "component built");
        }

        // Wire the topology against the populated registry.
        for (name, wiring) in &config.topology {
            let link = context
                .get(name)
                .expect("topology validated against components");

            if let Some(target_name) = &wiring.connect_to {
                let target = Self::resolve(&context, name, target_name)?;
                link.connect_to(target)?;
            }

            if !wiring.link_to.is_empty() {
                let mut targets = Vec::with_capacity(wiring.link_to.len());
                for target_name in &wiring.link_to {
                    targets.push(Self::resolve(&context, name, target_name)?);
                }
                link.link_to(targets)?;
            }

            if !wiring.routes.is_empty() {
                let Some(router) = routers.get(name) else {
                    return Err(PipelineError::InvalidTopology(format!(
                        "component {name} is not a router but declares routes"
                    )));
                };
                for (value, target_name) in &wiring.routes {
                    let target = Self::resolve(&context, name, target_name)?;
                    router.set_route(value.clone(), target);
                }
            }
        }

        ranked.sort_by(|a, b| (a.0, a.1.as_str()).cmp(&(b.0, b.1.as_str())));
        let ordered = ranked.into_iter().map(|(_, name, link)| (name, link)).collect();

        Ok(Self { context, ordered })
    }

    fn resolve(context: &Context, from: &str, target_name: &str) -> Result<Arc<dyn Link>> {
        if from == target_name {
            return Err(PipelineError::InvalidTopology(format!(
                "component {from} cannot be wired to itself"
            )));
        }
        context.get(target_name).ok_or_else(|| {
            PipelineError::InvalidTopology(format!(
                "component {from} is wired to unknown component {target_name}"
            ))
        })
    }

    /// The context this pipeline registered its components with
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Component names in set-up order
    pub fn component_names(&self) -> Vec<&str> {
        self.ordered.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Set up and start every component, leaves first
    ///
    /// A set-up failure (a socket that will not bind, say) is fatal and
    /// aborts the start.
    pub fn start(&self) -> Result<()> {
        for (name, link) in &self.ordered {
            link.exec_cmd(&Cmd::new(CmdCode::SetUp)).map_err(|e| {
                tracing::error!(component = %name, error = %e, "set-up failed");
                PipelineError::from(e)
            })?;
            link.exec_cmd(&Cmd::new(CmdCode::Start))?;
            tracing::info!(component = %name, "component started");
        }
        Ok(())
    }

    /// Stop and tear down every component in reverse start order
    ///
    /// Lifecycle errors here are reported and swallowed; shutdown always
    /// runs to completion.
    pub fn stop(&self) {
        for (name, link) in self.ordered.iter().rev() {
            if let Err(e) = link.exec_cmd(&Cmd::new(CmdCode::Stop)) {
                tracing::warn!(component = %name, error = %e, "stop failed");
            }
            if let Err(e) = link.exec_cmd(&Cmd::new(CmdCode::TearDown)) {
                tracing::warn!(component = %name, error = %e, "tear-down failed");
            }
            tracing::info!(component = %name, "component stopped");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("components", &self.component_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml_str: &str) -> Config {
        toml_str.parse().unwrap()
    }

    #[tokio::test]
    async fn builds_wires_and_stops_a_linear_pipeline() {
        let config = config(
            r#"
            [components.tcp_in]
            module = "receiver.tcp"
            params = { bind_addr = "127.0.0.1:0" }

            [components.fanout]
            module = "link.mux"

            [components.dump]
            module = "sink.dumper"
            params = { out = "-" }

            [topology.tcp_in]
            connect_to = "fanout"

            [topology.fanout]
            link_to = ["dump"]
            "#,
        );

        let context = Context::new();
        let pipeline = Pipeline::build(&config, Arc::clone(&context)).unwrap();

        // Leaves first: the sink precedes the link precedes the receiver.
        assert_eq!(pipeline.component_names(), vec!["dump", "fanout", "tcp_in"]);
        assert_eq!(context.len(), 3);

        pipeline.start().unwrap();
        pipeline.stop();
    }

    #[tokio::test]
    async fn router_routes_are_wired_from_topology() {
        let config = config(
            r#"
            [components.router]
            module = "link.router"

            [components.audit]
            module = "sink.dumper"
            params = { out = "-" }

            [topology.router]
            routes = { audit = "audit" }
            "#,
        );

        let context = Context::new();
        let pipeline = Pipeline::build(&config, context).unwrap();
        pipeline.start().unwrap();
        pipeline.stop();
    }

    #[tokio::test]
    async fn routes_on_a_non_router_are_rejected() {
        let config = config(
            r#"
            [components.fanout]
            module = "link.mux"

            [components.dump]
            module = "sink.dumper"
            params = { out = "-" }

            [topology.fanout]
            routes = { x = "dump" }
            "#,
        );

        let err = Pipeline::build(&config, Context::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTopology(_)));
    }

    #[tokio::test]
    async fn self_wiring_is_rejected() {
        let config = config(
            r#"
            [components.loopy]
            module = "link.router"

            [topology.loopy]
            connect_to = "loopy"
            "#,
        );

        let err = Pipeline::build(&config, Context::new()).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTopology(_)));
    }

    #[tokio::test]
    async fn illegal_wiring_shape_aborts_construction() {
        // link_to on a point-to-point receiver.
        let config = config(
            r#"
            [components.tcp_in]
            module = "receiver.tcp"
            params = { bind_addr = "127.0.0.1:0" }

            [components.a]
            module = "sink.dumper"
            params = { out = "-" }

            [components.b]
            module = "sink.dumper"
            params = { out = "-" }

            [topology.tcp_in]
            link_to = ["a", "b"]
            "#,
        );

        let err = Pipeline::build(&config, Context::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Core(_)));
    }

    #[tokio::test]
    async fn duplicate_component_names_cannot_collide_across_builds() {
        let cfg = config(
            r#"
            [components.only]
            module = "link.mux"
            "#,
        );

        let context = Context::new();
        let _first = Pipeline::build(&cfg, Arc::clone(&context)).unwrap();
        // Same context, same names: the second build must fail loudly.
        assert!(Pipeline::build(&cfg, context).is_err());
    }
}
