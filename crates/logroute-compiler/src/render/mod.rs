//! Renderers turning a [`DirectiveTree`] into engine configuration text

mod fluentd;
mod syslog_ng;

pub use fluentd::FluentdRenderer;
pub use syslog_ng::SyslogNgRenderer;

use logroute_common::crd::{BackendFamily, LogPipelineSpec};
use logroute_common::ResourceKey;
use logroute_plugin::{
    check_record_key, ParamKind, ParamValue, PluginInstance, PluginKind, SecretParam,
};

use crate::error::Problem;
use crate::model::DirectiveTree;
use crate::secrets::SecretDelivery;

/// Output of one render
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rendered {
    /// Configuration text
    pub text: String,
    /// Problems found while rendering, keyed by owning resource
    ///
    /// When any problem is reported the text is empty; the caller drops the
    /// offending resources and renders again.
    pub problems: Vec<(ResourceKey, Problem)>,
}

/// One backend family's configuration writer
pub trait Renderer: Send + Sync {
    /// Family this renderer writes for
    fn family(&self) -> BackendFamily;

    /// Directory secrets are mounted under
    fn secret_dir(&self) -> &'static str;

    /// How a secret parameter of the given kind is delivered
    fn secret_delivery(&self, kind: ParamKind) -> SecretDelivery {
        match kind {
            ParamKind::Secret { accepts_path: true } => SecretDelivery::Mount,
            _ => SecretDelivery::Inline,
        }
    }

    /// Whether the engine has an equivalent of the plugin kind
    fn supports(&self, kind: PluginKind) -> bool;

    /// Problems that keep a supported instance out of the text
    ///
    /// Only looks at the instance itself, never at secret values, so a
    /// dry run reports exactly what a compile excludes.
    fn check(&self, instance: &PluginInstance) -> Vec<Problem>;

    /// Render the tree
    fn render(&self, tree: &DirectiveTree) -> Rendered;
}

/// Renderer for the backend the pipeline selects
pub fn renderer_for(
    spec: &LogPipelineSpec,
    backend: BackendFamily,
    node_count: usize,
) -> Box<dyn Renderer> {
    match backend {
        BackendFamily::Fluentd => Box::new(FluentdRenderer::new(
            spec.fluentd.clone().unwrap_or_default(),
        )),
        BackendFamily::SyslogNg => Box::new(SyslogNgRenderer::new(
            spec.syslog_ng.clone().unwrap_or_default(),
            node_count,
        )),
    }
}

/// Secret value as it should appear in configuration, if resolved
fn secret_text(secret: &SecretParam) -> Option<&str> {
    match secret {
        SecretParam::Literal(v) | SecretParam::Inline(v) | SecretParam::Mount(v) => Some(v),
        SecretParam::Reference(_) => None,
    }
}

/// Checks every backend shares: record field names and complete parsers
fn shared_checks(plugin: &PluginInstance) -> Vec<Problem> {
    let mut problems = Vec::new();
    if let Some(ParamValue::Map(records)) = plugin.param("records") {
        problems.extend(
            records
                .keys()
                .filter_map(|key| check_record_key(key).err())
                .map(|e| Problem::render(format!("{}: {e}", plugin.kind))),
        );
    }

    let regexp = matches!(plugin.param("format"), Some(ParamValue::String(f)) if f == "regexp");
    if plugin.kind == PluginKind::Parser && regexp && plugin.param("expression").is_none() {
        problems.push(Problem::render("parser: format regexp requires an expression"));
    }
    problems
}

/// Secret references the injector left unresolved
fn unresolved_secrets(tree: &DirectiveTree) -> Vec<(ResourceKey, Problem)> {
    let sinks = tree.sinks.iter().map(|s| (&s.sink, &s.plugin));
    let filters = tree
        .flows
        .iter()
        .flat_map(|f| f.filters.iter().map(move |i| (&f.flow, i)));
    sinks
        .chain(filters)
        .flat_map(|(key, plugin)| {
            plugin
                .params
                .iter()
                .chain(plugin.nested.iter().flat_map(|n| n.params.iter()))
                .filter(|p| matches!(p.value, ParamValue::Secret(SecretParam::Reference(_))))
                .map(move |p| {
                    (
                        key.clone(),
                        Problem::render(format!(
                            "{}: secret parameter {} was not resolved",
                            plugin.kind, p.name
                        )),
                    )
                })
        })
        .collect()
}

/// Plain text of a scalar value
///
/// Durations and sizes keep their written form. Lists and maps are
/// rendered by the caller.
fn scalar_text(value: &ParamValue) -> Option<String> {
    match value {
        ParamValue::String(s) => Some(s.clone()),
        ParamValue::Int(i) => Some(i.to_string()),
        ParamValue::Bool(b) => Some(b.to_string()),
        ParamValue::Duration { text, .. } | ParamValue::Size { text, .. } => Some(text.clone()),
        ParamValue::Secret(secret) => secret_text(secret).map(str::to_string),
        ParamValue::List(_) | ParamValue::Map(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;

    #[test]
    fn path_secrets_are_mounted_and_others_inlined() {
        let spec = fluentd_pipeline().spec;
        let renderer = renderer_for(&spec, BackendFamily::Fluentd, 0);
        assert_eq!(renderer.family(), BackendFamily::Fluentd);
        assert_eq!(
            renderer.secret_delivery(ParamKind::Secret { accepts_path: true }),
            SecretDelivery::Mount
        );
        assert_eq!(
            renderer.secret_delivery(ParamKind::Secret {
                accepts_path: false
            }),
            SecretDelivery::Inline
        );
    }

    #[test]
    fn backends_disagree_on_support() {
        let fluentd = renderer_for(&fluentd_pipeline().spec, BackendFamily::Fluentd, 0);
        let syslog_ng = renderer_for(&syslog_ng_pipeline().spec, BackendFamily::SyslogNg, 3);
        for kind in [PluginKind::Gcs, PluginKind::Forward, PluginKind::Dedot] {
            assert!(fluentd.supports(kind));
            assert!(!syslog_ng.supports(kind));
        }
        for kind in [PluginKind::S3, PluginKind::Loki, PluginKind::Grep, PluginKind::Parser] {
            assert!(fluentd.supports(kind));
            assert!(syslog_ng.supports(kind));
        }
        assert_eq!(syslog_ng.secret_dir(), "/etc/syslog-ng/secret");
        assert_eq!(fluentd.secret_dir(), "/fluentd/etc/secret");
    }

    /// Story: a record key smuggling section syntax is refused by both
    /// backends even when it bypassed parameter coercion
    #[test]
    fn both_backends_refuse_record_keys_with_syntax() {
        let mut transformer = logroute_plugin::validate(
            &logroute_common::crd::PluginSpec::new("record_transformer"),
            logroute_plugin::PluginRole::Filter,
            "flow_team-a_web_0",
            &Default::default(),
        )
        .instance
        .unwrap();
        transformer.params.push(logroute_plugin::Param {
            name: "records",
            kind: ParamKind::RecordMap,
            value: ParamValue::Map(
                [
                    ("cluster".to_string(), "prod".to_string()),
                    ("x\n</record>\n<match **>".to_string(), "v".to_string()),
                    ("<y>".to_string(), "v".to_string()),
                ]
                .into(),
            ),
        });

        let fluentd = renderer_for(&fluentd_pipeline().spec, BackendFamily::Fluentd, 0);
        let syslog_ng = renderer_for(&syslog_ng_pipeline().spec, BackendFamily::SyslogNg, 0);
        for renderer in [fluentd, syslog_ng] {
            let problems = renderer.check(&transformer);
            assert_eq!(problems.len(), 2, "{}", renderer.family());
            assert!(problems.iter().all(|p| p.message.contains("record key")));
        }
    }

    #[test]
    fn regexp_parser_needs_an_expression() {
        let parser = logroute_plugin::validate(
            &logroute_common::crd::PluginSpec::new("parser").with_param("format", "regexp"),
            logroute_plugin::PluginRole::Filter,
            "flow_team-a_web_0",
            &Default::default(),
        )
        .instance
        .unwrap();
        let renderer = renderer_for(&fluentd_pipeline().spec, BackendFamily::Fluentd, 0);
        assert_eq!(
            renderer.check(&parser),
            vec![Problem::render("parser: format regexp requires an expression")]
        );
    }
}
