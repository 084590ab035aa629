//! Identity of the routing objects a pass reports on
//!
//! Problems, statuses and directive ids are all keyed by [`ResourceKey`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of a routing object that carries a status
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum ResourceKind {
    /// Namespaced flow
    Flow,
    /// Cluster-wide flow (lives in the control namespace)
    ClusterFlow,
    /// Namespaced sink
    Sink,
    /// Cluster-wide sink (lives in the control namespace)
    ClusterSink,
}

impl ResourceKind {
    /// Returns true for the cluster-wide kinds
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, Self::ClusterFlow | Self::ClusterSink)
    }

    /// Returns true for Flow and ClusterFlow
    pub fn is_flow(&self) -> bool {
        matches!(self, Self::Flow | Self::ClusterFlow)
    }

    /// Lowercase prefix used when building directive ids
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Flow => "flow",
            Self::ClusterFlow => "clusterflow",
            Self::Sink => "sink",
            Self::ClusterSink => "clustersink",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flow => write!(f, "Flow"),
            Self::ClusterFlow => write!(f, "ClusterFlow"),
            Self::Sink => write!(f, "Sink"),
            Self::ClusterSink => write!(f, "ClusterSink"),
        }
    }
}

/// Fully qualified reference to a Flow, ClusterFlow, Sink or ClusterSink
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub struct ResourceKey {
    /// Object kind
    pub kind: ResourceKind,
    /// Namespace the object lives in (the control namespace for cluster kinds)
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl ResourceKey {
    /// Create a new key
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a namespaced Flow
    pub fn flow(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Flow, namespace, name)
    }

    /// Key for a ClusterFlow
    pub fn cluster_flow(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::ClusterFlow, namespace, name)
    }

    /// Key for a namespaced Sink
    pub fn sink(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Sink, namespace, name)
    }

    /// Key for a ClusterSink
    pub fn cluster_sink(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::ClusterSink, namespace, name)
    }

    /// Sort key for emitted directives: namespaced before cluster-scoped,
    /// then by name, then by namespace.
    pub fn emission_order(&self) -> (bool, &str, &str) {
        (self.kind.is_cluster_scoped(), &self.name, &self.namespace)
    }

    /// Identifier safe to embed in generated configuration
    ///
    /// Cluster-scoped objects omit the namespace since their names are unique
    /// within the control namespace. Any character outside `[a-z0-9_-]` becomes `_`.
    pub fn id(&self) -> String {
        let raw = if self.kind.is_cluster_scoped() {
            format!("{}_{}", self.kind.id_prefix(), self.name)
        } else {
            format!("{}_{}_{}", self.kind.id_prefix(), self.namespace, self.name)
        };
        sanitize_identifier(&raw)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// Replace every character outside `[a-z0-9_-]` with `_`
pub fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
