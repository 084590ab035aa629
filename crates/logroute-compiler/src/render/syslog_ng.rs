//! syslog-ng configuration: `keyword "name" { … };` statements
//!
//! One network source parses forwarded JSON records under the `json.` prefix.
//! Every flow becomes a match filter, its own filter chain and a `log` path
//! listing the destinations it fans out to. Statements follow the tree's
//! tiers (match filters, filter chains, destinations) and the `log` paths
//! tying them together come last.

use std::fmt::Write;

use tracing::trace;

use logroute_common::crd::{BackendFamily, MatchRule, Selector, SyslogNgSpec};
use logroute_plugin::{NestedInstance, Param, ParamValue, PluginInstance, PluginKind};

use super::{scalar_text, shared_checks, unresolved_secrets, Rendered, Renderer};
use crate::error::Problem;
use crate::model::{DirectiveTree, FlowDirective, FlowScope, RouteDirective, SinkDirective};

const SECRET_DIR: &str = "/etc/syslog-ng/secret";
const SOURCE_NAME: &str = "main_input";
const JSON_PREFIX: &str = "json.";
const DEFAULT_DISK_BUFFER_SIZE: u64 = 1 << 30;

/// Renderer for the syslog-ng family
#[derive(Clone, Debug)]
pub struct SyslogNgRenderer {
    spec: SyslogNgSpec,
    node_count: usize,
}

impl SyslogNgRenderer {
    /// Create a renderer; the node count sizes the connection limit
    pub fn new(spec: SyslogNgSpec, node_count: usize) -> Self {
        Self { spec, node_count }
    }
}

/// Double-quote a string for the syslog-ng configuration grammar
pub(crate) fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '`' => out.push_str("\\x60"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(
            c,
            '\\' | '.' | '+' | '*' | '?' | '(' | ')' | '|' | '[' | ']' | '{' | '}' | '^' | '$'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Boolean filter expression
#[derive(Clone, Debug, PartialEq, Eq)]
enum Expr {
    True,
    False,
    /// Exact match of a name-value pair
    Equals { field: String, value: String },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

impl Expr {
    fn equals(field: impl Into<String>, value: &str) -> Self {
        Self::Equals {
            field: field.into(),
            value: value.to_string(),
        }
    }

    fn and(a: Expr, b: Expr) -> Self {
        match (a, b) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, e) | (e, Self::True) => e,
            (a, b) => Self::And(Box::new(a), Box::new(b)),
        }
    }

    fn or(a: Expr, b: Expr) -> Self {
        match (a, b) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, e) | (e, Self::False) => e,
            (a, b) => Self::Or(Box::new(a), Box::new(b)),
        }
    }

    fn not(e: Expr) -> Self {
        match e {
            Self::True => Self::False,
            Self::False => Self::True,
            Self::Not(inner) => *inner,
            e => Self::Not(Box::new(e)),
        }
    }

    fn any(values: &[String], field: &str) -> Self {
        values
            .iter()
            .map(|v| Self::equals(field, v))
            .reduce(Self::or)
            .unwrap_or(Self::True)
    }

    fn render(&self) -> String {
        match self {
            Self::True => "match(\"\" type(\"string\"))".to_string(),
            Self::False => "not match(\"\" type(\"string\"))".to_string(),
            Self::Equals { field, value } => format!(
                "match({} value({}) type(\"pcre\"))",
                quote(&format!("^{}$", escape_regex(value))),
                quote(field)
            ),
            Self::And(a, b) => format!("({} and {})", a.render(), b.render()),
            Self::Or(a, b) => format!("({} or {})", a.render(), b.render()),
            Self::Not(e) => format!("not {}", e.render()),
        }
    }
}

fn kubernetes_field(name: &str) -> String {
    format!("{JSON_PREFIX}kubernetes.{name}")
}

fn selector_expr(selector: &Selector) -> Expr {
    let mut expr = Expr::any(&selector.namespaces, &kubernetes_field("namespace_name"));
    for (key, value) in &selector.labels {
        expr = Expr::and(
            expr,
            Expr::equals(kubernetes_field(&format!("labels.{key}")), value),
        );
    }
    expr = Expr::and(expr, Expr::any(&selector.hosts, &kubernetes_field("host")));
    Expr::and(
        expr,
        Expr::any(&selector.container_names, &kubernetes_field("container_name")),
    )
}

/// First-match evaluation: the first rule whose selector matches decides
fn route_expr(route: &RouteDirective) -> Expr {
    let rules = route.rules.iter().rev().fold(Expr::False, |rest, rule| {
        let matched = selector_expr(rule.selector());
        match rule {
            MatchRule::Select(_) => Expr::or(matched, rest),
            MatchRule::Exclude(_) => Expr::and(Expr::not(matched), rest),
        }
    });
    match &route.scope {
        FlowScope::Namespace(namespace) => Expr::and(
            Expr::equals(kubernetes_field("namespace_name"), namespace),
            rules,
        ),
        FlowScope::Cluster => rules,
    }
}

/// Statement writer
#[derive(Default)]
struct Config {
    out: String,
}

impl Config {
    fn line(&mut self, depth: usize, text: &str) {
        for _ in 0..depth {
            self.out.push_str("    ");
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn statement(&mut self, keyword: &str, name: &str, body: &[String]) {
        self.line(0, &format!("{keyword} {} {{", quote(name)));
        for line in body {
            self.line(1, line);
        }
        self.line(0, "};");
        self.out.push('\n');
    }
}

fn driver(name: &str, options: &[String]) -> Vec<String> {
    let mut lines = vec![format!("{name}(")];
    lines.extend(options.iter().map(|o| format!("    {o}")));
    lines.push(");".to_string());
    lines
}

fn text_param(params: &[Param], name: &str) -> Option<String> {
    params
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| scalar_text(&p.value))
}

fn record_field(key: &str) -> String {
    format!("{JSON_PREFIX}{key}")
}

/// Option text of a value: numbers bare, durations in seconds, sizes in bytes
fn option_value(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::Int(i) => Some(i.to_string()),
        ParamValue::Bool(b) => Some(yes_no(*b).to_string()),
        ParamValue::Duration { seconds, .. } => Some(seconds.to_string()),
        ParamValue::Size { bytes, .. } => Some(bytes.to_string()),
        other => scalar_text(other).map(|s| quote(&s)),
    }
}

fn option(params: &[Param], name: &str, option: &str) -> Option<String> {
    params
        .iter()
        .find(|p| p.name == name)
        .and_then(|p| option_value(&p.value))
        .map(|v| format!("{option}({v})"))
}

fn tls_options(tls: &NestedInstance) -> String {
    let mut parts: Vec<String> = [("ca_cert", "ca-file"), ("cert", "cert-file"), ("key", "key-file")]
        .into_iter()
        .filter_map(|(name, opt)| option(&tls.params, name, opt))
        .collect();
    let verify = !matches!(tls.param("verify"), Some(ParamValue::Bool(false)));
    parts.push(format!("peer-verify({})", yes_no(verify)));
    format!("tls({})", parts.join(" "))
}

fn buffer_options(buffer: &NestedInstance) -> Option<String> {
    if matches!(buffer.param("type"), Some(ParamValue::String(t)) if t == "memory") {
        return None;
    }
    let dir = text_param(&buffer.params, "path")
        .map(|p| match p.rfind('/') {
            Some(0) => "/".to_string(),
            Some(i) => p[..i].to_string(),
            None => p,
        })
        .unwrap_or_default();
    let size = match buffer.param("total_limit_size") {
        Some(ParamValue::Size { bytes, .. }) => *bytes,
        _ => DEFAULT_DISK_BUFFER_SIZE,
    };
    Some(format!(
        "disk-buffer(reliable(yes) dir({}) disk-buf-size({size}))",
        quote(&dir)
    ))
}

fn delivery_options(plugin: &PluginInstance) -> Vec<String> {
    let mut options = Vec::new();
    if let Some(retry) = plugin.nested(PluginKind::Retry) {
        options.extend(option(&retry.params, "max_times", "retries"));
        options.extend(option(&retry.params, "wait", "time-reopen"));
    }
    if let Some(tls) = plugin.nested(PluginKind::Tls) {
        options.push(tls_options(tls));
    }
    if let Some(buffer) = plugin.nested(PluginKind::Buffer) {
        options.extend(buffer_options(buffer));
    }
    options
}

fn destination_body(plugin: &PluginInstance) -> Vec<String> {
    let p = &plugin.params;
    let mut options = Vec::new();
    let name = match plugin.kind {
        PluginKind::S3 => {
            options.extend(option(p, "s3_endpoint", "url"));
            options.extend(option(p, "s3_bucket", "bucket"));
            options.extend(option(p, "s3_region", "region"));
            options.extend(option(p, "aws_key_id", "access-key"));
            options.extend(option(p, "aws_sec_key", "secret-key"));
            options.extend(option(p, "path", "object-key"));
            let gzip = matches!(plugin.param("store_as"), Some(ParamValue::String(s)) if s == "gzip");
            options.push(format!("compression({})", yes_no(gzip)));
            "s3"
        }
        PluginKind::Http => {
            options.extend(option(p, "endpoint", "url"));
            if let Some(method) = text_param(p, "http_method") {
                options.push(format!("method({})", quote(&method.to_uppercase())));
            }
            if let Some(ParamValue::Map(headers)) = plugin.param("headers") {
                let headers: Vec<String> = headers
                    .iter()
                    .map(|(k, v)| quote(&format!("{k}: {v}")))
                    .collect();
                options.push(format!("headers({})", headers.join(" ")));
            }
            options.extend(option(p, "username", "user"));
            options.extend(option(p, "password", "password"));
            options.extend(option(p, "open_timeout", "timeout"));
            "http"
        }
        PluginKind::Loki => {
            options.extend(option(p, "url", "url"));
            options.extend(option(p, "tenant", "tenant-id"));
            if let Some(ParamValue::Map(labels)) = plugin.param("extra_labels") {
                let labels: Vec<String> = labels
                    .iter()
                    .map(|(k, v)| format!("{} => {}", quote(k), quote(v)))
                    .collect();
                options.push(format!("labels({})", labels.join(" ")));
            }
            "loki"
        }
        PluginKind::File => {
            if let Some(path) = text_param(p, "path") {
                options.push(quote(&path));
            }
            "file"
        }
        PluginKind::Syslog => {
            if let Some(host) = text_param(p, "host") {
                options.push(quote(&host));
            }
            options.extend(option(p, "transport", "transport"));
            options.extend(option(p, "port", "port"));
            "syslog"
        }
        other => other.type_tag(),
    };
    options.extend(delivery_options(plugin));
    driver(name, &options)
}

/// Statement for one filter, or None when the filter is a no-op
fn filter_statement(filter: &PluginInstance) -> Option<(&'static str, Vec<String>)> {
    let p = &filter.params;
    match filter.kind {
        PluginKind::Grep => {
            let key = text_param(p, "key").unwrap_or_default();
            let pattern = text_param(p, "pattern").unwrap_or_default();
            let matched = format!(
                "match({} value({}) type(\"pcre\"))",
                quote(&pattern),
                quote(&record_field(&key))
            );
            let expr = match filter.param("exclude") {
                Some(ParamValue::Bool(true)) => format!("not {matched}"),
                _ => matched,
            };
            Some(("filter", vec![format!("{expr};")]))
        }
        PluginKind::RecordTransformer => {
            let mut body = Vec::new();
            if let Some(ParamValue::Map(records)) = filter.param("records") {
                for (key, value) in records {
                    body.push(format!(
                        "set({} value({}));",
                        quote(value),
                        quote(&record_field(key))
                    ));
                }
            }
            if let Some(ParamValue::List(keys)) = filter.param("remove_keys") {
                for key in keys {
                    body.push(format!("unset(value({}));", quote(&record_field(key))));
                }
            }
            (!body.is_empty()).then_some(("rewrite", body))
        }
        PluginKind::Parser => {
            let key = text_param(p, "key_name").unwrap_or_default();
            let template = format!("template({})", quote(&format!("${{{}}}", record_field(&key))));
            let prefix = format!("prefix({})", quote(JSON_PREFIX));
            let parser = match text_param(p, "format").as_deref() {
                Some("json") => format!("json-parser({prefix} {template});"),
                Some("regexp") => format!(
                    "regexp-parser(patterns({}) {prefix} {template});",
                    quote(&text_param(p, "expression").unwrap_or_default())
                ),
                Some("apache2" | "nginx") => {
                    format!("apache-accesslog-parser({prefix} {template});")
                }
                Some("syslog") => format!("syslog-parser({template});"),
                _ => return None,
            };
            Some(("parser", vec![parser]))
        }
        _ => None,
    }
}

impl SyslogNgRenderer {
    fn write_source(&self, cfg: &mut Config, tree: &DirectiveTree) {
        cfg.line(0, &format!("@version: {}", self.spec.version));
        cfg.line(0, "@include \"scl.conf\"");
        cfg.out.push('\n');

        let network = format!(
            "network(flags(\"no-parse\") max-connections({}) port({}) transport(\"tcp\"));",
            self.spec.effective_max_connections(self.node_count),
            tree.source.port
        );
        cfg.statement(
            "source",
            SOURCE_NAME,
            &[
                "channel {".to_string(),
                "    source {".to_string(),
                format!("        {network}"),
                "    };".to_string(),
                "    parser {".to_string(),
                format!("        json-parser(prefix({}));", quote(JSON_PREFIX)),
                "    };".to_string(),
                "};".to_string(),
            ],
        );
    }

    fn write_route(&self, cfg: &mut Config, route: &RouteDirective) {
        cfg.statement(
            "filter",
            &match_name(route),
            &[format!("{};", route_expr(route).render())],
        );
    }

    fn write_filters(&self, cfg: &mut Config, flow: &FlowDirective) {
        for filter in &flow.filters {
            if let Some((keyword, body)) = filter_statement(filter) {
                cfg.statement(keyword, &filter.id, &body);
            }
        }
    }

    fn write_sinks(&self, cfg: &mut Config, sinks: &[SinkDirective]) {
        for sink in sinks {
            cfg.statement("destination", &sink.id, &destination_body(&sink.plugin));
        }
    }

    fn write_log_path(&self, cfg: &mut Config, route: &RouteDirective, flow: &FlowDirective) {
        let mut path = vec![
            format!("source({});", quote(SOURCE_NAME)),
            format!("filter({});", quote(&match_name(route))),
        ];
        for filter in &flow.filters {
            if let Some((keyword, _)) = filter_statement(filter) {
                path.push(format!("{keyword}({});", quote(&filter.id)));
            }
        }
        for sink in &flow.sinks {
            path.push(format!("destination({});", quote(sink)));
        }
        cfg.line(0, "log {");
        for line in &path {
            cfg.line(1, line);
        }
        cfg.line(0, "};");
        cfg.out.push('\n');
    }
}

fn match_name(route: &RouteDirective) -> String {
    format!("{}_match", route.id)
}

impl Renderer for SyslogNgRenderer {
    fn family(&self) -> BackendFamily {
        BackendFamily::SyslogNg
    }

    fn secret_dir(&self) -> &'static str {
        SECRET_DIR
    }

    fn supports(&self, kind: PluginKind) -> bool {
        !matches!(
            kind,
            PluginKind::Gcs | PluginKind::Forward | PluginKind::Dedot
        )
    }

    fn check(&self, instance: &PluginInstance) -> Vec<Problem> {
        let mut problems = shared_checks(instance);
        if instance.kind == PluginKind::Loki
            && (instance.param("username").is_some() || instance.param("password").is_some())
        {
            problems.push(Problem::render(
                "loki: basic authentication is not supported by syslog-ng",
            ));
        }
        if instance.kind == PluginKind::File && instance.param("compress").is_some() {
            problems.push(Problem::render(
                "file: compress is not supported by syslog-ng",
            ));
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
        for route in &tree.routes {
            self.write_route(&mut cfg, route);
        }
        for flow in &tree.flows {
            self.write_filters(&mut cfg, flow);
        }
        self.write_sinks(&mut cfg, &tree.sinks);
        for (route, flow) in tree.routes.iter().zip(&tree.flows) {
            self.write_log_path(&mut cfg, route, flow);
        }

        trace!(bytes = cfg.out.len(), "rendered syslog-ng configuration");
        Rendered {
            text: cfg.out,
            problems: Vec::new(),
        }
    }
}
