//! Routing resolver: links every flow's sink references
//!
//! The graph is never partial. A flow whose references cannot be linked stays
//! in the graph with its problems attached.

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;
use tracing::{debug, instrument};

use logroute_common::crd::{FlowDefinition, RouteEffect, RouteTargetKind, SinkDefinition};
use logroute_common::ResourceKey;

use crate::error::Problem;
use crate::repository::Snapshot;

/// Why a flow may route to a sink
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    /// Same-namespace Sink, or a ClusterSink referenced by a ClusterFlow
    Direct,
    /// ClusterSink visible to a namespaced Flow
    ClusterDefault,
    /// Sink in another namespace, allowed by the named LogRoute
    RouteException(String),
}

/// One linked sink reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// The sink
    pub sink: ResourceKey,
    /// How it was found
    pub provenance: Provenance,
}

/// Resolution result for one flow
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlowRouting {
    /// Linked sinks in reference order, without duplicates
    pub targets: Vec<ResolvedTarget>,
    /// Resolution problems
    pub problems: Vec<Problem>,
}

/// Every visible flow and its resolution
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingGraph {
    /// Flows keyed by resource key
    pub flows: BTreeMap<ResourceKey, FlowRouting>,
}

enum Lookup {
    Found(ResolvedTarget),
    Denied,
    Ambiguous(Vec<String>),
    Missing,
}

struct Index<'a> {
    snapshot: &'a Snapshot,
    sinks: BTreeSet<(String, String)>,
    cluster_sinks: BTreeSet<String>,
}

impl<'a> Index<'a> {
    fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            sinks: snapshot
                .sinks
                .iter()
                .map(|s| {
                    let key = s.key();
                    (key.namespace, key.name)
                })
                .collect(),
            cluster_sinks: snapshot.cluster_sinks.iter().map(|s| s.name_any()).collect(),
        }
    }

    fn cluster_sink_key(&self, name: &str) -> ResourceKey {
        ResourceKey::cluster_sink(self.snapshot.control_namespace(), name)
    }

    /// Whether a Deny route hides the target from flows in `namespace`
    fn denied(
        &self,
        kind: RouteTargetKind,
        target_ns: Option<&str>,
        name: &str,
        namespace: &str,
    ) -> bool {
        let labels = self.snapshot.namespace_labels(namespace);
        self.snapshot.routes.iter().any(|r| {
            r.spec.effect == RouteEffect::Deny
                && r.spec.targets(kind, target_ns, name)
                && r.spec.applies_to(namespace, labels)
        })
    }

    fn resolve_namespaced(&self, namespace: &str, name: &str) -> Lookup {
        if self.sinks.contains(&(namespace.to_string(), name.to_string())) {
            return Lookup::Found(ResolvedTarget {
                sink: ResourceKey::sink(namespace, name),
                provenance: Provenance::Direct,
            });
        }

        let mut denied = false;
        if self.cluster_sinks.contains(name) {
            if self.denied(RouteTargetKind::ClusterSink, None, name, namespace) {
                denied = true;
            } else {
                return Lookup::Found(ResolvedTarget {
                    sink: self.cluster_sink_key(name),
                    provenance: Provenance::ClusterDefault,
                });
            }
        }

        let labels = self.snapshot.namespace_labels(namespace);
        let mut allowed: BTreeMap<ResourceKey, String> = BTreeMap::new();
        for route in &self.snapshot.routes {
            let spec = &route.spec;
            if spec.effect != RouteEffect::Allow
                || spec.target.kind != RouteTargetKind::Sink
                || spec.target.name != name
                || !spec.applies_to(namespace, labels)
            {
                continue;
            }
            let Some(target_ns) = spec.target.namespace.as_deref() else {
                continue;
            };
            if !self.sinks.contains(&(target_ns.to_string(), name.to_string())) {
                continue;
            }
            if self.denied(RouteTargetKind::Sink, Some(target_ns), name, namespace) {
                denied = true;
                continue;
            }
            allowed
                .entry(ResourceKey::sink(target_ns, name))
                .or_insert_with(|| route.name_any());
        }

        if allowed.len() > 1 {
            return Lookup::Ambiguous(allowed.keys().map(|k| k.namespace.clone()).collect());
        }
        match allowed.into_iter().next() {
            Some((sink, route)) => Lookup::Found(ResolvedTarget {
                sink,
                provenance: Provenance::RouteException(route),
            }),
            None if denied => Lookup::Denied,
            None => Lookup::Missing,
        }
    }

    fn resolve_cluster(&self, name: &str) -> Lookup {
        if self.cluster_sinks.contains(name) {
            Lookup::Found(ResolvedTarget {
                sink: self.cluster_sink_key(name),
                provenance: Provenance::Direct,
            })
        } else {
            Lookup::Missing
        }
    }
}

fn resolve_flow<F: FlowDefinition>(index: &Index<'_>, flow: &F) -> FlowRouting {
    let key = flow.key();
    let mut routing = FlowRouting::default();

    if flow.sink_refs().is_empty() {
        routing
            .problems
            .push(Problem::resolution("no sinkRefs declared"));
        return routing;
    }

    for name in flow.sink_refs() {
        let lookup = if key.kind.is_cluster_scoped() {
            index.resolve_cluster(name)
        } else {
            index.resolve_namespaced(&key.namespace, name)
        };

        match lookup {
            Lookup::Found(target) => {
                if routing.targets.iter().all(|t| t.sink != target.sink) {
                    routing.targets.push(target);
                }
            }
            Lookup::Denied => routing.problems.push(Problem::resolution(format!(
                "isolation violation: sink {name} is denied to namespace {}",
                key.namespace
            ))),
            Lookup::Ambiguous(namespaces) => routing.problems.push(Problem::resolution(format!(
                "ambiguous sink reference {name}: allowed from namespaces {}",
                namespaces.join(", ")
            ))),
            Lookup::Missing if key.kind.is_cluster_scoped() => routing
                .problems
                .push(Problem::resolution(format!("ClusterSink {name} not found"))),
            Lookup::Missing => routing.problems.push(Problem::resolution(format!(
                "no Sink or ClusterSink named {name} visible from namespace {}",
                key.namespace
            ))),
        }
    }

    routing
}

/// Resolve every visible flow of the snapshot
#[instrument(skip_all, fields(pipeline = %snapshot.pipeline_name()))]
pub fn resolve(snapshot: &Snapshot) -> RoutingGraph {
    let index = Index::new(snapshot);
    let mut graph = RoutingGraph::default();

    for flow in &snapshot.flows {
        graph.flows.insert(flow.key(), resolve_flow(&index, flow));
    }
    for flow in &snapshot.cluster_flows {
        graph.flows.insert(flow.key(), resolve_flow(&index, flow));
    }

    debug!(
        flows = graph.flows.len(),
        with_problems = graph.flows.values().filter(|r| !r.problems.is_empty()).count(),
        "resolved routing graph"
    );
    graph
}
