//! Plugin validation for every sink and filter of a snapshot

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use logroute_common::crd::{FlowDefinition, LogPipelineSpec, SinkDefinition};
use logroute_common::{ResourceKey, ResourceKind};
use logroute_plugin::{validate, PluginInstance, PluginRole, ValidationContext};

use crate::error::{Problem, ProblemLedger};
use crate::repository::Snapshot;

/// Validated plugin instances of one pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PluginCatalog {
    /// Sink plugins keyed by Sink or ClusterSink
    pub sinks: BTreeMap<ResourceKey, PluginInstance>,
    /// Filter chains keyed by Flow or ClusterFlow, in declaration order
    pub filters: BTreeMap<ResourceKey, Vec<PluginInstance>>,
}

impl PluginCatalog {
    /// Every instance together with the resource that owns it
    pub fn instances_mut(&mut self) -> impl Iterator<Item = (&ResourceKey, &mut PluginInstance)> {
        self.sinks.iter_mut().chain(
            self.filters
                .iter_mut()
                .flat_map(|(key, chain)| chain.iter_mut().map(move |i| (key, i))),
        )
    }

    /// Every instance together with the resource that owns it
    pub fn instances(&self) -> impl Iterator<Item = (&ResourceKey, &PluginInstance)> {
        self.sinks.iter().chain(
            self.filters
                .iter()
                .flat_map(|(key, chain)| chain.iter().map(move |i| (key, i))),
        )
    }
}

/// Pipeline-dependent validation inputs
pub fn validation_context(spec: &LogPipelineSpec) -> ValidationContext {
    let mut ctx = ValidationContext {
        log_key: spec.log_key().to_string(),
        ..ValidationContext::default()
    };
    if let Some(fluentd) = &spec.fluentd {
        ctx.buffer_root = fluentd.buffer_root.clone();
    }
    ctx
}

/// Id of the `index`th filter of a flow
pub fn filter_id(flow: &ResourceKey, index: usize) -> String {
    format!("{}_{index}", flow.id())
}

fn validate_flow<F: FlowDefinition>(
    flow: &F,
    ctx: &ValidationContext,
    catalog: &mut PluginCatalog,
    ledger: &mut ProblemLedger,
) {
    let key = flow.key();

    if key.kind == ResourceKind::Flow
        && flow
            .match_rules()
            .iter()
            .any(|r| !r.selector().namespaces.is_empty())
    {
        ledger.push(
            key.clone(),
            Problem::configuration("namespaces may only be selected by a ClusterFlow"),
        );
    }

    let mut chain = Vec::with_capacity(flow.filters().len());
    for (index, spec) in flow.filters().iter().enumerate() {
        let validated = validate(spec, PluginRole::Filter, &filter_id(&key, index), ctx);
        for problem in &validated.problems {
            ledger.push(
                key.clone(),
                Problem::configuration(format!("filter {index}: {problem}")),
            );
        }
        chain.extend(validated.instance);
    }
    catalog.filters.insert(key, chain);
}

fn validate_sink<S: SinkDefinition>(
    sink: &S,
    ctx: &ValidationContext,
    catalog: &mut PluginCatalog,
    ledger: &mut ProblemLedger,
) {
    let key = sink.key();
    let validated = validate(sink.plugin(), PluginRole::Sink, &key.id(), ctx);
    for problem in &validated.problems {
        ledger.push(key.clone(), Problem::configuration(problem.to_string()));
    }
    if let Some(instance) = validated.instance {
        catalog.sinks.insert(key, instance);
    }
}

/// Validate every plugin of the snapshot, recording problems on their owners
#[instrument(skip_all, fields(pipeline = %snapshot.pipeline_name()))]
pub fn validate_plugins(
    snapshot: &Snapshot,
    ctx: &ValidationContext,
    ledger: &mut ProblemLedger,
) -> PluginCatalog {
    let mut catalog = PluginCatalog::default();
    for flow in &snapshot.flows {
        validate_flow(flow, ctx, &mut catalog, ledger);
    }
    for flow in &snapshot.cluster_flows {
        validate_flow(flow, ctx, &mut catalog, ledger);
    }
    for sink in &snapshot.sinks {
        validate_sink(sink, ctx, &mut catalog, ledger);
    }
    for sink in &snapshot.cluster_sinks {
        validate_sink(sink, ctx, &mut catalog, ledger);
    }

    debug!(
        sinks = catalog.sinks.len(),
        filters = catalog.filters.values().map(Vec::len).sum::<usize>(),
        "validated plugins"
    );
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use logroute_common::crd::{MatchRule, PluginSpec, Selector};
    use logroute_plugin::{ParamValue, PluginKind};

    #[test]
    fn filter_defaults_follow_the_pipeline_log_key() {
        let mut pipeline = fluentd_pipeline();
        pipeline.spec.enable_docker_parser_compatibility_for_cri = true;
        let mut snap = snapshot(pipeline, &["team-a"]);
        let mut web = flow("team-a", "web", &["archive"]);
        web.spec.filters = vec![PluginSpec::new("grep").with_param("pattern", "error")];
        snap.flows = vec![web];

        let mut ledger = ProblemLedger::default();
        let ctx = validation_context(&snap.pipeline.spec);
        let catalog = validate_plugins(&snap, &ctx, &mut ledger);

        let chain = &catalog.filters[&ResourceKey::flow("team-a", "web")];
        assert_eq!(chain[0].id, "flow_team-a_web_0");
        assert_eq!(chain[0].param("key"), Some(&ParamValue::String("log".to_string())));
        assert_eq!(ledger.total(), 0);
    }

    #[test]
    fn invalid_plugins_are_recorded_on_their_owner() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        let mut web = flow("team-a", "web", &["archive"]);
        web.spec.filters = vec![PluginSpec::new("s3")];
        snap.flows = vec![web];
        snap.sinks = vec![
            sink("team-a", "archive", PluginSpec::new("gcs").with_param("project", "p")),
            sink("team-a", "good", s3("logs")),
        ];

        let mut ledger = ProblemLedger::default();
        let catalog = validate_plugins(&snap, &ValidationContext::default(), &mut ledger);

        let web = ledger.problems(&ResourceKey::flow("team-a", "web"));
        assert_eq!(web.len(), 1);
        assert!(web[0].message.contains("unknown filter plugin type: s3"));

        let archive = ledger.problems(&ResourceKey::sink("team-a", "archive"));
        assert_eq!(archive[0].to_string(), "ConfigurationError: gcs: missing required parameter bucket");
        assert_eq!(catalog.sinks[&ResourceKey::sink("team-a", "archive")].kind, PluginKind::Gcs);
        assert!(!ledger.has_problems(&ResourceKey::sink("team-a", "good")));
    }

    #[test]
    fn namespaced_flows_cannot_select_namespaces() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        let mut web = flow("team-a", "web", &["archive"]);
        web.spec.match_rules = vec![MatchRule::Select(Selector {
            namespaces: vec!["team-b".to_string()],
            ..Default::default()
        })];
        snap.flows = vec![web];

        let mut ledger = ProblemLedger::default();
        validate_plugins(&snap, &ValidationContext::default(), &mut ledger);
        assert!(ledger.has_problems(&ResourceKey::flow("team-a", "web")));
    }
}
