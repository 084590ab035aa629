//! LogRoute: cross-namespace visibility exceptions for sinks

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;

/// Kind of sink a route refers to
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RouteTargetKind {
    /// A namespaced Sink
    Sink,
    /// A ClusterSink in the control namespace
    ClusterSink,
}

/// Whether a route widens or narrows visibility
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum RouteEffect {
    /// Flows in the selected namespaces may resolve a Sink from another namespace
    Allow,
    /// Flows in the selected namespaces may not resolve the ClusterSink
    Deny,
}

/// The sink a route applies to
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteTarget {
    /// Kind of the target sink
    pub kind: RouteTargetKind,

    /// Namespace of a namespaced Sink target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the target sink
    pub name: String,
}

/// Specification for a visibility exception
///
/// ```yaml
/// apiVersion: logroute.dev/v1alpha1
/// kind: LogRoute
/// metadata:
///   name: share-audit
/// spec:
///   target: { kind: Sink, namespace: security, name: audit }
///   effect: Allow
///   namespaceSelector:
///     matchLabels: { audit: "true" }
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logroute.dev",
    version = "v1alpha1",
    kind = "LogRoute",
    plural = "logroutes",
    shortname = "lr",
    printcolumn = r#"{"name":"Effect","type":"string","jsonPath":".spec.effect"}"#,
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.target.name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogRouteSpec {
    /// Pipeline this route belongs to
    #[serde(default)]
    pub pipeline_ref: String,

    /// Sink the exception applies to
    pub target: RouteTarget,

    /// Allow or Deny
    pub effect: RouteEffect,

    /// Namespaces the exception applies to, by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Namespaces the exception applies to, by label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

impl LogRouteSpec {
    /// Whether a flow namespace with the given labels falls under this route
    ///
    /// The name list and the selector are unioned. A route with neither set
    /// applies nowhere.
    pub fn applies_to(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        self.namespaces.iter().any(|n| n == namespace)
            || self
                .namespace_selector
                .as_ref()
                .is_some_and(|s| !s.is_empty() && s.matches(labels))
    }

    /// Whether this route names the given sink
    pub fn targets(&self, kind: RouteTargetKind, namespace: Option<&str>, name: &str) -> bool {
        self.target.kind == kind
            && self.target.name == name
            && match kind {
                RouteTargetKind::ClusterSink => true,
                RouteTargetKind::Sink => self.target.namespace.as_deref() == namespace,
            }
    }
}
