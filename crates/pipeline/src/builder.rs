//! Component builder
//!
//! Maps `(module, params)` pairs from configuration onto concrete
//! components. Every recognized module registers its metrics handle with
//! the context; unknown modules and malformed parameters abort pipeline
//! construction.

use std::sync::Arc;

use relay_config::Params;
use relay_core::{Context, Link, Meta, MetaValue};
use relay_links::{Demux, Mpx, Router, Throttler, DEFAULT_ROUTING_KEY};
use relay_receivers::{
    ReplyMode, TcpReceiver, TcpReceiverConfig, UdpReceiver, UdpReceiverConfig,
};
use relay_sinks::{
    DumperSink, DumperSinkConfig, TcpSink, TcpSinkConfig, UdpSink, UdpSinkConfig,
};

use crate::error::{PipelineError, Result};

/// A constructed component, with the router kept typed for route wiring
pub(crate) struct Built {
    pub(crate) link: Arc<dyn Link>,
    pub(crate) router: Option<Arc<Router>>,
}

/// Build one component from its module selector
///
/// Recognized modules: `receiver.tcp`, `receiver.udp`, `link.mux`,
/// `link.demux`, `link.router`, `link.throttler`, `sink.dumper`,
/// `sink.tcp`, `sink.udp`.
pub fn build(
    name: &str,
    module: &str,
    params: &Params,
    context: &Context,
) -> Result<Arc<dyn Link>> {
    build_component(name, module, params, context).map(|built| built.link)
}

pub(crate) fn build_component(
    name: &str,
    module: &str,
    params: &Params,
    context: &Context,
) -> Result<Built> {
    let built = match module {
        "receiver.tcp" => {
            let mut config = TcpReceiverConfig::new(required_str(module, params, "bind_addr")?);
            if let Some(mode) = optional_str(module, params, "mode")? {
                config.mode = match mode {
                    "silent" => ReplyMode::Silent,
                    "talkative" => ReplyMode::Talkative,
                    other => {
                        return Err(invalid(module, "mode", format!("unknown mode: {other}")));
                    }
                };
            }
            if let Some(backend) = optional_str(module, params, "backend")? {
                if backend != "std" {
                    return Err(invalid(
                        module,
                        "backend",
                        format!("unsupported backend: {backend}"),
                    ));
                }
            }
            config.meta = meta_param(module, params)?;

            let receiver = TcpReceiver::new(name, config);
            context.metrics().register(Arc::new(receiver.metrics_handle()));
            Built {
                link: Arc::new(receiver),
                router: None,
            }
        }

        "receiver.udp" => {
            let mut config = UdpReceiverConfig::new(required_str(module, params, "bind_addr")?);
            config.meta = meta_param(module, params)?;

            let receiver = UdpReceiver::new(name, config);
            context.metrics().register(Arc::new(receiver.metrics_handle()));
            Built {
                link: Arc::new(receiver),
                router: None,
            }
        }

        "link.mux" => {
            let mpx = Mpx::new(name);
            context.metrics().register(Arc::new(mpx.metrics_handle()));
            Built {
                link: Arc::new(mpx),
                router: None,
            }
        }

        "link.demux" => {
            let demux = Demux::new(name);
            context.metrics().register(Arc::new(demux.metrics_handle()));
            Built {
                link: Arc::new(demux),
                router: None,
            }
        }

        "link.router" => {
            let routing_key = optional_str(module, params, "routing_key")?
                .unwrap_or(DEFAULT_ROUTING_KEY)
                .to_string();
            let router = Arc::new(Router::new(name, routing_key));
            context.metrics().register(Arc::new(router.metrics_handle()));
            Built {
                link: Arc::clone(&router) as Arc<dyn Link>,
                router: Some(router),
            }
        }

        "link.throttler" => {
            let rps = match params.get("rps") {
                Some(value) => value.as_integer().ok_or_else(|| {
                    invalid(module, "rps", format!("expected an integer, got {value}"))
                })?,
                None => return Err(missing(module, "rps")),
            };
            if rps < 0 {
                return Err(invalid(module, "rps", "must not be negative".to_string()));
            }

            let throttler = Throttler::new(name, rps as u64);
            context
                .metrics()
                .register(Arc::new(throttler.metrics_handle()));
            Built {
                link: Arc::new(throttler),
                router: None,
            }
        }

        "sink.dumper" => {
            let config = DumperSinkConfig::new(required_str(module, params, "out")?);
            let sink = DumperSink::new(name, config);
            context.metrics().register(Arc::new(sink.metrics_handle()));
            Built {
                link: Arc::new(sink),
                router: None,
            }
        }

        "sink.tcp" => {
            let config = TcpSinkConfig::new(required_str(module, params, "bind_addr")?);
            let sink = TcpSink::new(name, config);
            context.metrics().register(Arc::new(sink.metrics_handle()));
            Built {
                link: Arc::new(sink),
                router: None,
            }
        }

        "sink.udp" => {
            let config = UdpSinkConfig::new(required_str(module, params, "bind_addr")?);
            let sink = UdpSink::new(name, config);
            context.metrics().register(Arc::new(sink.metrics_handle()));
            Built {
                link: Arc::new(sink),
                router: None,
            }
        }

        other => return Err(PipelineError::UnknownModule(other.to_string())),
    };

    Ok(built)
}

/// Start-up rank: components set up before anything that feeds them
pub(crate) fn module_rank(module: &str) -> u8 {
    if module.starts_with("sink.") {
        0
    } else if module.starts_with("link.") {
        1
    } else {
        2
    }
}

fn required_str<'p>(module: &str, params: &'p Params, key: &'static str) -> Result<&'p str> {
    match params.get(key) {
        Some(value) => value
            .as_str()
            .ok_or_else(|| invalid(module, key, format!("expected a string, got {value}"))),
        None => Err(missing(module, key)),
    }
}

fn optional_str<'p>(module: &str, params: &'p Params, key: &'static str) -> Result<Option<&'p str>> {
    match params.get(key) {
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| invalid(module, key, format!("expected a string, got {value}"))),
        None => Ok(None),
    }
}

/// Decode the optional `meta` table into message meta
fn meta_param(module: &str, params: &Params) -> Result<Meta> {
    let Some(value) = params.get("meta") else {
        return Ok(Meta::new());
    };
    let table = value
        .as_table()
        .ok_or_else(|| invalid(module, "meta", format!("expected a table, got {value}")))?;

    let mut meta = Meta::new();
    for (key, value) in table {
        let meta_value = match value {
            toml::Value::String(s) => MetaValue::Str(s.clone()),
            toml::Value::Integer(n) => MetaValue::Int(*n),
            toml::Value::Boolean(b) => MetaValue::Bool(*b),
            other => {
                return Err(invalid(
                    module,
                    "meta",
                    format!("unsupported value for key {key:?}: {other}"),
                ));
            }
        };
        meta.insert(key.clone(), meta_value);
    }
    Ok(meta)
}

fn missing(module: &str, param: &'static str) -> PipelineError {
    PipelineError::MissingParam {
        module: module.to_string(),
        param,
    }
}

fn invalid(module: &str, param: &'static str, reason: String) -> PipelineError {
    PipelineError::InvalidParam {
        module: module.to_string(),
        param,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use relay_core::{Cmd, CmdCode};

    fn params(toml_snippet: &str) -> Params {
        toml_snippet.parse::<toml::Table>().unwrap()
    }

    #[tokio::test]
    async fn builds_every_known_module() {
        let cases = [
            ("receiver.tcp", r#"bind_addr = "127.0.0.1:0""#),
            ("receiver.udp", r#"bind_addr = "127.0.0.1:0""#),
            ("link.mux", ""),
            ("link.demux", ""),
            ("link.router", r#"routing_key = "type""#),
            ("link.throttler", "rps = 42"),
            ("sink.dumper", r#"out = "-""#),
            ("sink.tcp", r#"bind_addr = "127.0.0.1:3101""#),
            ("sink.udp", r#"bind_addr = "127.0.0.1:3102""#),
        ];

        let context = Context::new();
        for (i, (module, snippet)) in cases.iter().enumerate() {
            let comp = build(&format!("comp{i}"), module, &params(snippet), &context)
                .unwrap_or_else(|e| panic!("failed to build {module}: {e}"));
            comp.exec_cmd(&Cmd::new(CmdCode::SetUp))
                .unwrap_or_else(|e| panic!("failed to set up {module}: {e}"));
            comp.exec_cmd(&Cmd::new(CmdCode::Stop)).unwrap();
        }

        // One metrics handle per component.
        assert_eq!(context.metrics().len(), cases.len());
    }

    #[tokio::test]
    async fn unknown_module_is_rejected() {
        let context = Context::new();
        let err = build("x", "link.teleport", &Params::new(), &context).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownModule(_)));
    }

    #[tokio::test]
    async fn missing_bind_addr_is_rejected() {
        let context = Context::new();
        let err = build("x", "receiver.tcp", &Params::new(), &context).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingParam { param: "bind_addr", .. }
        ));
    }

    #[tokio::test]
    async fn unsupported_backend_is_rejected() {
        let context = Context::new();
        let err = build(
            "x",
            "receiver.tcp",
            &params(r#"bind_addr = "127.0.0.1:0"
backend = "evio""#),
            &context,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidParam { param: "backend", .. }
        ));
    }

    #[tokio::test]
    async fn bad_mode_is_rejected() {
        let context = Context::new();
        let err = build(
            "x",
            "receiver.tcp",
            &params(r#"bind_addr = "127.0.0.1:0"
mode = "chatty""#),
            &context,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParam { param: "mode", .. }));
    }

    #[tokio::test]
    async fn throttler_requires_integer_rps() {
        let context = Context::new();
        let err = build("x", "link.throttler", &params(r#"rps = "fast""#), &context).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParam { param: "rps", .. }));

        let err = build("x", "link.throttler", &Params::new(), &context).unwrap_err();
        assert!(matches!(err, PipelineError::MissingParam { param: "rps", .. }));
    }

    #[tokio::test]
    async fn meta_param_supports_scalar_values() {
        let context = Context::new();
        let built = build(
            "x",
            "receiver.tcp",
            &params(r#"bind_addr = "127.0.0.1:0"
meta = { sync = "true", shard = 7, canary = false }"#),
            &context,
        );
        assert!(built.is_ok());

        let err = build(
            "y",
            "receiver.tcp",
            &params(r#"bind_addr = "127.0.0.1:0"
meta = { weights = [1, 2] }"#),
            &context,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParam { param: "meta", .. }));
    }

    #[test]
    fn ranks_order_sinks_before_links_before_receivers() {
        assert!(module_rank("sink.dumper") < module_rank("link.mux"));
        assert!(module_rank("link.mux") < module_rank("receiver.tcp"));
    }
}
