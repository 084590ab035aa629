//! Read access to the declarative objects a pass compiles
//!
//! [`ResourceSource`] is the only async seam in the compiler. The cluster
//! implementation reads through kube-rs; the manifest implementation reads
//! YAML files and backs the offline CLI and the tests.

mod cluster;
mod manifest;

use std::collections::BTreeMap;

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use logroute_common::crd::{ClusterFlow, ClusterSink, Flow, LogPipeline, LogRoute, Sink};
use logroute_common::Error;

pub use self::cluster::KubeResourceSource;
pub use self::manifest::ManifestSource;

/// A namespace and its labels
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct NamespaceInfo {
    /// Namespace name
    pub name: String,
    /// Namespace labels
    pub labels: BTreeMap<String, String>,
}

impl NamespaceInfo {
    /// Create a namespace entry
    pub fn new(name: impl Into<String>, labels: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }
}

/// Trait abstracting reads of logroute objects
///
/// Lists return every object of the kind; filtering by watch selector and
/// `pipelineRef` happens in the repository. A failed list is an error; an
/// absent single object is `Ok(None)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Get a LogPipeline by name
    async fn get_pipeline(&self, name: &str) -> Result<Option<LogPipeline>, Error>;

    /// List all namespaces with their labels
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, Error>;

    /// List Flows across all namespaces
    async fn list_flows(&self) -> Result<Vec<Flow>, Error>;

    /// List ClusterFlows in one namespace
    async fn list_cluster_flows(&self, namespace: &str) -> Result<Vec<ClusterFlow>, Error>;

    /// List Sinks across all namespaces
    async fn list_sinks(&self) -> Result<Vec<Sink>, Error>;

    /// List ClusterSinks in one namespace
    async fn list_cluster_sinks(&self, namespace: &str) -> Result<Vec<ClusterSink>, Error>;

    /// List LogRoutes
    async fn list_routes(&self) -> Result<Vec<LogRoute>, Error>;

    /// Get a Secret's decoded data
    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;

    /// Count cluster nodes
    async fn count_nodes(&self) -> Result<usize, Error>;
}
