//! Source backed by YAML manifests
//!
//! Accepts multi-document YAML containing logroute objects plus core
//! `Namespace` and `Secret` objects. Namespaces that objects live in but that
//! are not declared are added without labels.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use logroute_common::crd::{ClusterFlow, ClusterSink, Flow, LogPipeline, LogRoute, Sink};
use logroute_common::Error;

use super::{NamespaceInfo, ResourceSource};

/// In-memory set of objects parsed from manifests
#[derive(Clone, Debug, Default)]
pub struct ManifestSource {
    pipelines: Vec<LogPipeline>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    flows: Vec<Flow>,
    cluster_flows: Vec<ClusterFlow>,
    sinks: Vec<Sink>,
    cluster_sinks: Vec<ClusterSink>,
    routes: Vec<LogRoute>,
    secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    node_count: usize,
}

fn parse_doc<T: DeserializeOwned>(kind: &str, value: serde_yaml::Value) -> Result<T, Error> {
    serde_yaml::from_value(value).map_err(|e| Error::serialization_for_kind(kind, e.to_string()))
}

impl ManifestSource {
    /// Parse one or more YAML documents
    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        let mut source = Self::default();
        source.add_yaml(text)?;
        Ok(source)
    }

    /// Read every manifest in the given files or directories
    ///
    /// Directories contribute their `.yaml` and `.yml` files in name order.
    pub async fn from_paths(paths: &[PathBuf]) -> Result<Self, Error> {
        let mut source = Self::default();
        for path in paths {
            for file in expand(path).await? {
                let text = tokio::fs::read_to_string(&file).await.map_err(|e| {
                    Error::source_with_context("manifests", format!("{}: {e}", file.display()))
                })?;
                source.add_yaml(&text)?;
                debug!(file = %file.display(), "loaded manifest");
            }
        }
        Ok(source)
    }

    /// Set the node count reported to the pass
    pub fn with_node_count(mut self, node_count: usize) -> Self {
        self.node_count = node_count;
        self
    }

    /// Add the documents in `text`
    pub fn add_yaml(&mut self, text: &str) -> Result<(), Error> {
        for document in serde_yaml::Deserializer::from_str(text) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| Error::serialization(e.to_string()))?;
            if value.is_null() {
                continue;
            }
            self.add_value(value)?;
        }
        Ok(())
    }

    fn add_value(&mut self, value: serde_yaml::Value) -> Result<(), Error> {
        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| Error::serialization("manifest document without kind"))?
            .to_string();

        match kind.as_str() {
            "LogPipeline" => self.pipelines.push(parse_doc(&kind, value)?),
            "Flow" => {
                let flow: Flow = parse_doc(&kind, value)?;
                self.note_namespace(flow.namespace());
                self.flows.push(flow);
            }
            "ClusterFlow" => {
                let flow: ClusterFlow = parse_doc(&kind, value)?;
                self.note_namespace(flow.namespace());
                self.cluster_flows.push(flow);
            }
            "Sink" => {
                let sink: Sink = parse_doc(&kind, value)?;
                self.note_namespace(sink.namespace());
                self.sinks.push(sink);
            }
            "ClusterSink" => {
                let sink: ClusterSink = parse_doc(&kind, value)?;
                self.note_namespace(sink.namespace());
                self.cluster_sinks.push(sink);
            }
            "LogRoute" => self.routes.push(parse_doc(&kind, value)?),
            "Namespace" => {
                let ns: Namespace = parse_doc(&kind, value)?;
                self.namespaces.insert(ns.name_any(), ns.labels().clone());
            }
            "Secret" => {
                let secret: Secret = parse_doc(&kind, value)?;
                let namespace = secret.namespace().unwrap_or_else(|| "default".to_string());
                let name = secret.name_any();
                let mut data: BTreeMap<String, String> = secret
                    .data
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).into_owned()))
                    .collect();
                data.extend(secret.string_data.unwrap_or_default());
                self.note_namespace(Some(namespace.clone()));
                self.secrets.insert((namespace, name), data);
            }
            other => warn!(kind = other, "ignoring manifest of unsupported kind"),
        }
        Ok(())
    }

    fn note_namespace(&mut self, namespace: Option<String>) {
        if let Some(namespace) = namespace {
            self.namespaces.entry(namespace).or_default();
        }
    }
}

async fn expand(path: &Path) -> Result<Vec<PathBuf>, Error> {
    let io_err = |e: std::io::Error| {
        Error::source_with_context("manifests", format!("{}: {e}", path.display()))
    };

    if !tokio::fs::metadata(path).await.map_err(io_err)?.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = BTreeSet::new();
    let mut entries = tokio::fs::read_dir(path).await.map_err(io_err)?;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let file = entry.path();
        if matches!(
            file.extension().and_then(|e| e.to_str()),
            Some("yaml" | "yml")
        ) {
            files.insert(file);
        }
    }
    Ok(files.into_iter().collect())
}

fn in_namespace<K: kube::Resource + Clone>(items: &[K], namespace: &str) -> Vec<K> {
    items
        .iter()
        .filter(|i| i.namespace().as_deref() == Some(namespace))
        .cloned()
        .collect()
}

#[async_trait]
impl ResourceSource for ManifestSource {
    async fn get_pipeline(&self, name: &str) -> Result<Option<LogPipeline>, Error> {
        Ok(self.pipelines.iter().find(|p| p.name_any() == name).cloned())
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, Error> {
        Ok(self
            .namespaces
            .iter()
            .map(|(name, labels)| NamespaceInfo::new(name.clone(), labels.clone()))
            .collect())
    }

    async fn list_flows(&self) -> Result<Vec<Flow>, Error> {
        Ok(self.flows.clone())
    }

    async fn list_cluster_flows(&self, namespace: &str) -> Result<Vec<ClusterFlow>, Error> {
        Ok(in_namespace(&self.cluster_flows, namespace))
    }

    async fn list_sinks(&self) -> Result<Vec<Sink>, Error> {
        Ok(self.sinks.clone())
    }

    async fn list_cluster_sinks(&self, namespace: &str) -> Result<Vec<ClusterSink>, Error> {
        Ok(in_namespace(&self.cluster_sinks, namespace))
    }

    async fn list_routes(&self) -> Result<Vec<LogRoute>, Error> {
        Ok(self.routes.clone())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn count_nodes(&self) -> Result<usize, Error> {
        Ok(self.node_count)
    }
}
