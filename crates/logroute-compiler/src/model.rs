//! Backend-neutral directive tree
//!
//! Three tiers: routes select records per flow, flows run their filter chain
//! and fan out to sinks, sinks deliver. Every sink is emitted once no matter
//! how many flows reference it. Within a tier, namespaced objects come before
//! cluster-scoped ones, then ordering is by name and namespace.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, instrument};

use logroute_common::crd::{FlowDefinition, MatchRule, Selector};
use logroute_common::ResourceKey;
use logroute_plugin::PluginInstance;

use crate::catalog::PluginCatalog;
use crate::error::{Problem, ProblemLedger};
use crate::repository::Snapshot;
use crate::resolver::RoutingGraph;

/// Input listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDirective {
    /// Listening port
    pub port: u16,
    /// Record key holding the log line
    pub log_key: String,
}

/// Namespaces a flow's rules are evaluated in
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowScope {
    /// Records of one namespace only
    Namespace(String),
    /// Records of every namespace, narrowed by selector namespaces
    Cluster,
}

/// Tier 1: record selection for one flow
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteDirective {
    /// Owning flow
    pub flow: ResourceKey,
    /// Identifier of the flow
    pub id: String,
    /// Scope of the rules
    pub scope: FlowScope,
    /// Ordered first-match rules, always containing a select rule
    pub rules: Vec<MatchRule>,
}

/// Tier 2: filter chain and fan-out for one flow
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowDirective {
    /// Owning flow
    pub flow: ResourceKey,
    /// Identifier of the flow
    pub id: String,
    /// Filters in declaration order
    pub filters: Vec<PluginInstance>,
    /// Ids of the sinks records are copied to, in reference order
    pub sinks: Vec<String>,
}

/// Tier 3: one destination
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkDirective {
    /// Owning Sink or ClusterSink
    pub sink: ResourceKey,
    /// Identifier of the sink
    pub id: String,
    /// Output plugin with its nested directives
    pub plugin: PluginInstance,
}

/// Everything a renderer needs
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectiveTree {
    /// Input listener
    pub source: SourceDirective,
    /// Tier 1
    pub routes: Vec<RouteDirective>,
    /// Tier 2
    pub flows: Vec<FlowDirective>,
    /// Tier 3
    pub sinks: Vec<SinkDirective>,
}

impl DirectiveTree {
    /// Resources that take part in the tree
    pub fn participants(&self) -> BTreeSet<ResourceKey> {
        self.flows
            .iter()
            .map(|f| f.flow.clone())
            .chain(self.sinks.iter().map(|s| s.sink.clone()))
            .collect()
    }
}

/// Rules with the implicit trailing select-all when no select rule exists
pub fn effective_rules(rules: &[MatchRule]) -> Vec<MatchRule> {
    let mut rules = rules.to_vec();
    if !rules.iter().any(|r| !r.is_exclude()) {
        rules.push(MatchRule::Select(Selector::all()));
    }
    rules
}

fn flow_definitions(snapshot: &Snapshot) -> BTreeMap<ResourceKey, &dyn FlowDefinition> {
    snapshot
        .flows
        .iter()
        .map(|f| (f.key(), f as &dyn FlowDefinition))
        .chain(
            snapshot
                .cluster_flows
                .iter()
                .map(|f| (f.key(), f as &dyn FlowDefinition)),
        )
        .collect()
}

fn by_emission_order(keys: &mut [ResourceKey]) {
    keys.sort_by(|a, b| a.emission_order().cmp(&b.emission_order()));
}

/// Build the directive tree from the resolved graph
///
/// Flows and sinks with problems in the ledger are left out. A flow whose
/// resolved targets are all left out gets a problem of its own.
#[instrument(skip_all, fields(pipeline = %snapshot.pipeline_name()))]
pub fn build(
    snapshot: &Snapshot,
    graph: &RoutingGraph,
    catalog: &PluginCatalog,
    ledger: &mut ProblemLedger,
) -> DirectiveTree {
    let definitions = flow_definitions(snapshot);
    let mut flow_keys: Vec<ResourceKey> = graph.flows.keys().cloned().collect();
    by_emission_order(&mut flow_keys);

    let mut routes = Vec::new();
    let mut flows = Vec::new();
    let mut used_sinks = BTreeSet::new();

    for key in flow_keys {
        if ledger.has_problems(&key) {
            continue;
        }
        let (Some(routing), Some(definition)) = (graph.flows.get(&key), definitions.get(&key)) else {
            continue;
        };

        let targets: Vec<&ResourceKey> = routing
            .targets
            .iter()
            .map(|t| &t.sink)
            .filter(|sink| catalog.sinks.contains_key(*sink) && !ledger.has_problems(sink))
            .collect();
        if targets.is_empty() {
            ledger.push(
                key.clone(),
                Problem::resolution("no valid sink left to route to"),
            );
            continue;
        }

        let id = key.id();
        let scope = if key.kind.is_cluster_scoped() {
            FlowScope::Cluster
        } else {
            FlowScope::Namespace(key.namespace.clone())
        };
        routes.push(RouteDirective {
            flow: key.clone(),
            id: id.clone(),
            scope,
            rules: effective_rules(definition.match_rules()),
        });
        flows.push(FlowDirective {
            flow: key.clone(),
            id,
            filters: catalog.filters.get(&key).cloned().unwrap_or_default(),
            sinks: targets.iter().map(|t| t.id()).collect(),
        });
        used_sinks.extend(targets.into_iter().cloned());
    }

    let mut sink_keys: Vec<ResourceKey> = used_sinks.into_iter().collect();
    by_emission_order(&mut sink_keys);
    let sinks: Vec<SinkDirective> = sink_keys
        .into_iter()
        .filter_map(|key| {
            catalog.sinks.get(&key).map(|plugin| SinkDirective {
                id: key.id(),
                plugin: plugin.clone(),
                sink: key,
            })
        })
        .collect();

    debug!(
        routes = routes.len(),
        sinks = sinks.len(),
        "built directive tree"
    );

    DirectiveTree {
        source: SourceDirective {
            port: snapshot.pipeline.spec.source_port(),
            log_key: snapshot.pipeline.spec.log_key().to_string(),
        },
        routes,
        flows,
        sinks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{validate_plugins, validation_context};
    use crate::fixtures::*;
    use crate::resolver::resolve;
    use logroute_common::crd::PluginSpec;

    fn build_tree(snap: &Snapshot) -> (DirectiveTree, ProblemLedger) {
        let mut ledger = ProblemLedger::default();
        let catalog = validate_plugins(snap, &validation_context(&snap.pipeline.spec), &mut ledger);
        let graph = resolve(snap);
        for (key, routing) in &graph.flows {
            for problem in &routing.problems {
                ledger.push(key.clone(), problem.clone());
            }
        }
        (build(snap, &graph, &catalog, &mut ledger), ledger)
    }

    /// Story: two flows in different namespaces share one ClusterSink, which
    /// is emitted once and referenced twice
    #[test]
    fn shared_cluster_sink_is_emitted_once() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a", "team-b"]);
        snap.flows = vec![
            flow("team-a", "web", &["gcs-archive"]),
            flow("team-b", "api", &["gcs-archive"]),
        ];
        snap.cluster_sinks = vec![cluster_sink("gcs-archive", gcs("archive"))];

        let (tree, _) = build_tree(&snap);
        assert_eq!(tree.sinks.len(), 1);
        assert_eq!(tree.sinks[0].id, "clustersink_gcs-archive");
        assert_eq!(tree.routes.len(), 2);
        assert!(tree
            .flows
            .iter()
            .all(|f| f.sinks == vec!["clustersink_gcs-archive".to_string()]));
        // ordered by name before namespace
        assert_eq!(tree.flows[0].flow, ResourceKey::flow("team-b", "api"));
    }

    #[test]
    fn broken_sink_is_dropped_and_orphaned_flow_reported() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![
            flow("team-a", "both", &["good", "broken"]),
            flow("team-a", "only-broken", &["broken"]),
        ];
        snap.sinks = vec![
            sink("team-a", "good", s3("logs")),
            sink("team-a", "broken", PluginSpec::new("s3")),
        ];

        let (tree, ledger) = build_tree(&snap);
        let both = &tree.flows[0];
        assert_eq!(both.flow, ResourceKey::flow("team-a", "both"));
        assert_eq!(both.sinks, vec!["sink_team-a_good".to_string()]);
        assert!(!ledger.has_problems(&both.flow));

        assert_eq!(tree.flows.len(), 1);
        assert_eq!(
            ledger.problems(&ResourceKey::flow("team-a", "only-broken")),
            &[Problem::resolution("no valid sink left to route to")]
        );
        assert!(!tree
            .participants()
            .contains(&ResourceKey::sink("team-a", "broken")));
    }

    #[test]
    fn unreferenced_sinks_do_not_participate() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["used"])];
        snap.sinks = vec![sink("team-a", "used", s3("a")), sink("team-a", "idle", s3("b"))];

        let (tree, _) = build_tree(&snap);
        let participants = tree.participants();
        assert!(participants.contains(&ResourceKey::sink("team-a", "used")));
        assert!(!participants.contains(&ResourceKey::sink("team-a", "idle")));
    }

    #[test]
    fn rules_without_select_get_trailing_select_all() {
        let exclude = MatchRule::Exclude(Selector {
            hosts: vec!["node-1".to_string()],
            ..Default::default()
        });
        let rules = effective_rules(&[exclude.clone()]);
        assert_eq!(rules, vec![exclude, MatchRule::Select(Selector::all())]);

        let select = select_labels(&[("app", "web")]);
        assert_eq!(effective_rules(&[select.clone()]), vec![select]);
        assert_eq!(effective_rules(&[]), vec![MatchRule::Select(Selector::all())]);
    }
}
