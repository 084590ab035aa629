//! Fluentd configuration: `<section arg> … </section>` blocks
//!
//! Records enter through a forward source and a `label_router` match sends
//! them to one label per flow. Each flow label runs its filters and copies
//! records to one label per sink, so a sink shared by several flows is
//! written once.

use std::fmt::Write;

use tracing::trace;

use logroute_common::crd::{BackendFamily, FluentdSpec, MatchRule};
use logroute_plugin::{NestedInstance, Param, ParamValue, PluginInstance, PluginKind};

use super::{scalar_text, shared_checks, unresolved_secrets, Rendered, Renderer};
use crate::error::Problem;
use crate::model::{DirectiveTree, FlowScope, RouteDirective, SinkDirective};

const SECRET_DIR: &str = "/fluentd/etc/secret";
const DEFAULT_TIMEKEY: &str = "10m";
const DEFAULT_TIMEKEY_WAIT: &str = "1m";

/// Renderer for the fluentd family
#[derive(Clone, Debug)]
pub struct FluentdRenderer {
    spec: FluentdSpec,
}

impl FluentdRenderer {
    /// Create a renderer for the given settings
    pub fn new(spec: FluentdSpec) -> Self {
        Self { spec }
    }
}

/// Quote a value when fluentd would otherwise misread it
pub(crate) fn quote(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value.chars().any(|c| {
            c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | '#' | '<' | '>' | '\\')
        });
    if !needs_quotes {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '#' => out.push_str("\\#"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Indented section writer
#[derive(Default)]
struct Config {
    out: String,
    depth: usize,
}

impl Config {
    fn indent(&mut self) {
        for _ in 0..self.depth {
            self.out.push_str("  ");
        }
    }

    fn open(&mut self, section: &str, arg: Option<&str>) {
        self.indent();
        match arg {
            Some(arg) => {
                let _ = writeln!(self.out, "<{section} {arg}>");
            }
            None => {
                let _ = writeln!(self.out, "<{section}>");
            }
        }
        self.depth += 1;
    }

    fn close(&mut self, section: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.indent();
        let _ = writeln!(self.out, "</{section}>");
    }

    fn line(&mut self, key: &str, value: &str) {
        self.indent();
        let _ = writeln!(self.out, "{key} {}", quote(value));
    }

    fn blank(&mut self) {
        self.out.push('\n');
    }
}

fn value_text(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::List(items) => Some(items.join(",")),
        ParamValue::Map(map) => serde_json::to_string(map).ok(),
        other => scalar_text(other),
    }
}

fn write_params<'a>(cfg: &mut Config, params: impl IntoIterator<Item = &'a Param>) {
    for param in params {
        if let Some(text) = value_text(&param.value) {
            cfg.line(param.name, &text);
        }
    }
}

fn text_param(params: &[Param], name: &str) -> Option<String> {
    params
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| value_text(&p.value))
}

fn params_except<'a>(params: &'a [Param], skip: &'a [&str]) -> impl Iterator<Item = &'a Param> {
    params.iter().filter(move |p| !skip.contains(&p.name))
}

fn chunk_keys(buffer: &NestedInstance) -> Vec<String> {
    match buffer.param("chunk_keys") {
        Some(ParamValue::List(keys)) => keys.clone(),
        _ => Vec::new(),
    }
}

fn valid_chunk_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'))
}

impl FluentdRenderer {
    fn write_source(&self, cfg: &mut Config, tree: &DirectiveTree) {
        cfg.open("system", None);
        cfg.line("log_level", &self.spec.log_level);
        cfg.close("system");
        cfg.blank();

        cfg.open("source", None);
        cfg.line("@type", "forward");
        cfg.line("@id", "main_forward");
        cfg.line("bind", "0.0.0.0");
        cfg.line("port", &tree.source.port.to_string());
        cfg.close("source");
        cfg.blank();
    }

    fn write_router(&self, cfg: &mut Config, routes: &[RouteDirective]) {
        cfg.open("match", Some("**"));
        cfg.line("@type", "label_router");
        cfg.line("@id", "main_router");
        for route in routes {
            cfg.open("route", None);
            cfg.line("@label", &format!("@{}", route.id));
            for rule in &route.rules {
                write_rule(cfg, &route.scope, rule);
            }
            cfg.close("route");
        }
        cfg.close("match");
        cfg.blank();
    }

    fn write_flows(&self, cfg: &mut Config, tree: &DirectiveTree) {
        for flow in &tree.flows {
            cfg.open("label", Some(&format!("@{}", flow.id)));
            for filter in &flow.filters {
                write_filter(cfg, filter);
            }
            cfg.open("match", Some("**"));
            cfg.line("@type", "copy");
            for sink in &flow.sinks {
                cfg.open("store", None);
                cfg.line("@type", "relabel");
                cfg.line("@label", &format!("@{sink}"));
                cfg.close("store");
            }
            cfg.close("match");
            cfg.close("label");
            cfg.blank();
        }
    }

    fn write_sinks(&self, cfg: &mut Config, sinks: &[SinkDirective]) {
        for sink in sinks {
            cfg.open("label", Some(&format!("@{}", sink.id)));
            cfg.open("match", Some("**"));
            write_output(cfg, &sink.plugin);
            cfg.close("match");
            cfg.close("label");
            cfg.blank();
        }
    }
}

fn write_rule(cfg: &mut Config, scope: &FlowScope, rule: &MatchRule) {
    let selector = rule.selector();
    cfg.open("match", None);
    match scope {
        FlowScope::Namespace(namespace) => cfg.line("namespaces", namespace),
        FlowScope::Cluster if !selector.namespaces.is_empty() => {
            cfg.line("namespaces", &selector.namespaces.join(","))
        }
        FlowScope::Cluster => {}
    }
    if !selector.labels.is_empty() {
        let labels: Vec<String> = selector
            .labels
            .iter()
            .map(|(k, v)| format!("{k}:{v}"))
            .collect();
        cfg.line("labels", &labels.join(","));
    }
    if !selector.hosts.is_empty() {
        cfg.line("hosts", &selector.hosts.join(","));
    }
    if !selector.container_names.is_empty() {
        cfg.line("container_names", &selector.container_names.join(","));
    }
    if rule.is_exclude() {
        cfg.line("negate", "true");
    }
    cfg.close("match");
}

fn write_filter(cfg: &mut Config, filter: &PluginInstance) {
    cfg.open("filter", Some("**"));
    cfg.line("@type", filter.kind.type_tag());
    cfg.line("@id", &filter.id);
    match filter.kind {
        PluginKind::Grep => {
            let section = match filter.param("exclude") {
                Some(ParamValue::Bool(true)) => "exclude",
                _ => "regexp",
            };
            cfg.open(section, None);
            if let Some(key) = text_param(&filter.params, "key") {
                cfg.line("key", &key);
            }
            if let Some(pattern) = text_param(&filter.params, "pattern") {
                cfg.line("pattern", &format!("/{pattern}/"));
            }
            cfg.close(section);
        }
        PluginKind::RecordTransformer => {
            write_params(cfg, params_except(&filter.params, &["records"]));
            if let Some(ParamValue::Map(records)) = filter.param("records") {
                cfg.open("record", None);
                for (key, value) in records {
                    cfg.line(key, value);
                }
                cfg.close("record");
            }
        }
        PluginKind::Parser => {
            write_params(
                cfg,
                params_except(&filter.params, &["format", "expression"]),
            );
            cfg.open("parse", None);
            if let Some(format) = text_param(&filter.params, "format") {
                cfg.line("@type", &format);
            }
            if let Some(expression) = text_param(&filter.params, "expression") {
                cfg.line("expression", &format!("/{expression}/"));
            }
            cfg.close("parse");
        }
        _ => write_params(cfg, &filter.params),
    }
    cfg.close("filter");
}

fn output_type(kind: PluginKind) -> &'static str {
    match kind {
        PluginKind::Syslog => "syslog_rfc5424",
        other => other.type_tag(),
    }
}

fn write_output(cfg: &mut Config, plugin: &PluginInstance) {
    cfg.line("@type", output_type(plugin.kind));
    cfg.line("@id", &plugin.id);

    match plugin.kind {
        PluginKind::Http => {
            write_params(
                cfg,
                params_except(&plugin.params, &["username", "password"]),
            );
            if let Some(username) = text_param(&plugin.params, "username") {
                cfg.open("auth", None);
                cfg.line("method", "basic");
                cfg.line("username", &username);
                if let Some(password) = text_param(&plugin.params, "password") {
                    cfg.line("password", &password);
                }
                cfg.close("auth");
            }
        }
        PluginKind::Forward => {
            write_params(
                cfg,
                params_except(&plugin.params, &["host", "port", "shared_key"]),
            );
            cfg.open("server", None);
            if let Some(host) = text_param(&plugin.params, "host") {
                cfg.line("host", &host);
            }
            if let Some(port) = text_param(&plugin.params, "port") {
                cfg.line("port", &port);
            }
            cfg.close("server");
            if let Some(shared_key) = text_param(&plugin.params, "shared_key") {
                cfg.open("security", None);
                cfg.line("self_hostname", "logroute");
                cfg.line("shared_key", &shared_key);
                cfg.close("security");
            }
        }
        _ => write_params(cfg, &plugin.params),
    }

    if let Some(tls) = plugin.nested(PluginKind::Tls) {
        write_tls(cfg, tls);
    }
    if let Some(buffer) = plugin.nested(PluginKind::Buffer) {
        write_buffer(cfg, buffer, plugin.nested(PluginKind::Retry));
    }
}

fn write_tls(cfg: &mut Config, tls: &NestedInstance) {
    for (param, key) in [
        ("ca_cert", "tls_ca_cert_path"),
        ("cert", "tls_client_cert_path"),
        ("key", "tls_private_key_path"),
    ] {
        if let Some(path) = text_param(&tls.params, param) {
            cfg.line(key, &path);
        }
    }
    let verify = !matches!(tls.param("verify"), Some(ParamValue::Bool(false)));
    cfg.line("tls_verify_mode", if verify { "peer" } else { "none" });
}

fn write_buffer(cfg: &mut Config, buffer: &NestedInstance, retry: Option<&NestedInstance>) {
    let keys = chunk_keys(buffer);
    let arg = keys.join(",");
    cfg.open("buffer", (!arg.is_empty()).then_some(arg.as_str()));
    if let Some(buffer_type) = text_param(&buffer.params, "type") {
        cfg.line("@type", &buffer_type);
    }
    let memory = matches!(buffer.param("type"), Some(ParamValue::String(t)) if t == "memory");
    for param in params_except(&buffer.params, &["type", "chunk_keys"]) {
        if memory && param.name == "path" {
            continue;
        }
        if let Some(text) = value_text(&param.value) {
            cfg.line(param.name, &text);
        }
    }
    if keys.iter().any(|k| k == "time") {
        if buffer.param("timekey").is_none() {
            cfg.line("timekey", DEFAULT_TIMEKEY);
        }
        if buffer.param("timekey_wait").is_none() {
            cfg.line("timekey_wait", DEFAULT_TIMEKEY_WAIT);
        }
    }
    if let Some(retry) = retry {
        for param in &retry.params {
            if let Some(text) = value_text(&param.value) {
                cfg.line(&format!("retry_{}", param.name), &text);
            }
        }
    }
    cfg.close("buffer");
}

impl Renderer for FluentdRenderer {
    fn family(&self) -> BackendFamily {
        BackendFamily::Fluentd
    }

    fn secret_dir(&self) -> &'static str {
        SECRET_DIR
    }

    fn supports(&self, _kind: PluginKind) -> bool {
        true
    }

    fn check(&self, instance: &PluginInstance) -> Vec<Problem> {
        let mut problems = shared_checks(instance);
        if let Some(buffer) = instance.nested(PluginKind::Buffer) {
            for key in chunk_keys(buffer).iter().filter(|k| !valid_chunk_key(k)) {
                problems.push(Problem::render(format!("buffer: invalid chunk key {key:?}")));
            }
        }
        problems
    }

    fn render(&self, tree: &DirectiveTree) -> Rendered {
        let problems = unresolved_secrets(tree);
        if !problems.is_empty() {
            return Rendered {
                text: String::new(),
                problems,
            };
        }

        let mut cfg = Config::default();
        self.write_source(&mut cfg, tree);
        self.write_router(&mut cfg, &tree.routes);
        self.write_flows(&mut cfg, tree);
        self.write_sinks(&mut cfg, &tree.sinks);

        trace!(bytes = cfg.out.len(), "rendered fluentd configuration");
        Rendered {
            text: cfg.out,
            problems: Vec::new(),
        }
    }
}
