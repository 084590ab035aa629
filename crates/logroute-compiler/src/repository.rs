//! Resource repository: one consistent snapshot per pass

use std::collections::{BTreeMap, BTreeSet};

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use logroute_common::crd::{
    ClusterFlow, ClusterSink, Flow, FlowDefinition, LogPipeline, LogRoute, Sink, SinkDefinition,
};
use logroute_common::Error;

use crate::secrets::SecretStore;
use crate::source::{NamespaceInfo, ResourceSource};

/// Everything one pass reads, already filtered to the pipeline and sorted
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// The pipeline being compiled
    pub pipeline: LogPipeline,
    /// Watched namespaces
    pub namespaces: Vec<NamespaceInfo>,
    /// Visible Flows
    pub flows: Vec<Flow>,
    /// Visible ClusterFlows
    pub cluster_flows: Vec<ClusterFlow>,
    /// Visible Sinks
    pub sinks: Vec<Sink>,
    /// Visible ClusterSinks
    pub cluster_sinks: Vec<ClusterSink>,
    /// Visible LogRoutes
    pub routes: Vec<LogRoute>,
    /// Secret data referenced by visible objects, keyed by (namespace, name)
    pub secrets: BTreeMap<(String, String), BTreeMap<String, String>>,
    /// Number of cluster nodes
    pub node_count: usize,
}

impl Snapshot {
    /// Empty snapshot for a pipeline
    pub fn new(pipeline: LogPipeline) -> Self {
        Self {
            pipeline,
            namespaces: Vec::new(),
            flows: Vec::new(),
            cluster_flows: Vec::new(),
            sinks: Vec::new(),
            cluster_sinks: Vec::new(),
            routes: Vec::new(),
            secrets: BTreeMap::new(),
            node_count: 0,
        }
    }

    /// Name of the pipeline
    pub fn pipeline_name(&self) -> String {
        self.pipeline.name_any()
    }

    /// Control namespace of the pipeline
    pub fn control_namespace(&self) -> &str {
        &self.pipeline.spec.control_namespace
    }

    /// Labels of a watched namespace; empty when unknown
    pub fn namespace_labels(&self, namespace: &str) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.namespaces
            .iter()
            .find(|n| n.name == namespace)
            .map(|n| &n.labels)
            .unwrap_or(&EMPTY)
    }

    /// Sort every list by (namespace, name)
    pub fn sort(&mut self) {
        fn by_ns_name<K: kube::Resource>(a: &K, b: &K) -> std::cmp::Ordering {
            (a.namespace(), a.name_any()).cmp(&(b.namespace(), b.name_any()))
        }
        self.namespaces.sort();
        self.flows.sort_by(by_ns_name);
        self.cluster_flows.sort_by(by_ns_name);
        self.sinks.sort_by(by_ns_name);
        self.cluster_sinks.sort_by(by_ns_name);
        self.routes.sort_by(by_ns_name);
    }
}

impl SecretStore for Snapshot {
    fn secret_data(&self, namespace: &str, name: &str) -> Option<&BTreeMap<String, String>> {
        self.secrets.get(&(namespace.to_string(), name.to_string()))
    }
}

/// Reads a [`Snapshot`] through a [`ResourceSource`]
pub struct Repository<S> {
    source: S,
}

impl<S: ResourceSource> Repository<S> {
    /// Create a repository over a source
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Read everything the named pipeline can see
    ///
    /// A missing pipeline or a failed list is an error. A missing secret is
    /// simply absent from the snapshot.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, pipeline_name: &str) -> Result<Snapshot, Error> {
        let pipeline = self
            .source
            .get_pipeline(pipeline_name)
            .await?
            .ok_or_else(|| {
                Error::source_with_context(
                    "pipeline",
                    format!("LogPipeline {pipeline_name} not found"),
                )
            })?;

        let spec = &pipeline.spec;
        if spec.control_namespace.is_empty() {
            return Err(Error::validation_for_field(
                format!("LogPipeline/{pipeline_name}"),
                "spec.controlNamespace",
                "controlNamespace is required",
            ));
        }
        let control_namespace = spec.control_namespace.clone();
        let pipeline_ref = spec.pipeline_ref.clone();

        let namespaces: Vec<NamespaceInfo> = self
            .source
            .list_namespaces()
            .await?
            .into_iter()
            .filter(|ns| spec.watches(&ns.name, &ns.labels))
            .collect();
        let watched: BTreeSet<&str> = namespaces.iter().map(|n| n.name.as_str()).collect();
        let is_watched = |ns: Option<String>| ns.is_some_and(|ns| watched.contains(ns.as_str()));

        let flows: Vec<Flow> = self
            .source
            .list_flows()
            .await?
            .into_iter()
            .filter(|f| f.pipeline_ref() == pipeline_ref && is_watched(f.namespace()))
            .collect();
        let sinks: Vec<Sink> = self
            .source
            .list_sinks()
            .await?
            .into_iter()
            .filter(|s| s.pipeline_ref() == pipeline_ref && is_watched(s.namespace()))
            .collect();
        let cluster_flows: Vec<ClusterFlow> = self
            .source
            .list_cluster_flows(&control_namespace)
            .await?
            .into_iter()
            .filter(|f| f.pipeline_ref() == pipeline_ref)
            .collect();
        let cluster_sinks: Vec<ClusterSink> = self
            .source
            .list_cluster_sinks(&control_namespace)
            .await?
            .into_iter()
            .filter(|s| s.pipeline_ref() == pipeline_ref)
            .collect();
        let routes: Vec<LogRoute> = self
            .source
            .list_routes()
            .await?
            .into_iter()
            .filter(|r| r.spec.pipeline_ref == pipeline_ref)
            .collect();

        let mut wanted: BTreeSet<(String, String)> = BTreeSet::new();
        for sink in &sinks {
            let ns = sink.key().namespace;
            wanted.extend(sink.plugin().secret_refs().into_iter().map(|r| (ns.clone(), r.name)));
        }
        for sink in &cluster_sinks {
            wanted.extend(
                sink.plugin()
                    .secret_refs()
                    .into_iter()
                    .map(|r| (control_namespace.clone(), r.name)),
            );
        }
        for flow in &flows {
            let ns = flow.key().namespace;
            for filter in flow.filters() {
                wanted.extend(filter.secret_refs().into_iter().map(|r| (ns.clone(), r.name)));
            }
        }
        for flow in &cluster_flows {
            for filter in flow.filters() {
                wanted.extend(
                    filter
                        .secret_refs()
                        .into_iter()
                        .map(|r| (control_namespace.clone(), r.name)),
                );
            }
        }

        let mut secrets = BTreeMap::new();
        for (namespace, name) in wanted {
            match self.source.get_secret(&namespace, &name).await? {
                Some(data) => {
                    secrets.insert((namespace, name), data);
                }
                None => debug!(namespace = %namespace, secret = %name, "referenced secret absent"),
            }
        }

        let node_count = match self.source.count_nodes().await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "failed to count nodes, assuming none");
                0
            }
        };

        let mut snapshot = Snapshot {
            pipeline,
            namespaces,
            flows,
            cluster_flows,
            sinks,
            cluster_sinks,
            routes,
            secrets,
            node_count,
        };
        snapshot.sort();

        info!(
            namespaces = snapshot.namespaces.len(),
            flows = snapshot.flows.len(),
            cluster_flows = snapshot.cluster_flows.len(),
            sinks = snapshot.sinks.len(),
            cluster_sinks = snapshot.cluster_sinks.len(),
            routes = snapshot.routes.len(),
            "snapshot read"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockResourceSource;
    use logroute_common::crd::{FluentdSpec, LogPipelineSpec, PluginSpec, SinkSpec};
    use serde_json::json;

    fn pipeline(watch: Vec<String>) -> LogPipeline {
        LogPipeline::new(
            "main",
            LogPipelineSpec {
                control_namespace: "logging".to_string(),
                pipeline_ref: String::new(),
                watch_namespaces: watch,
                watch_namespace_selector: None,
                fluentd: Some(FluentdSpec::default()),
                syslog_ng: None,
                flow_config_override: None,
                enable_docker_parser_compatibility_for_cri: false,
            },
        )
    }

    fn sink(namespace: &str, name: &str, pipeline_ref: &str) -> Sink {
        let mut sink = Sink::new(
            name,
            SinkSpec {
                pipeline_ref: pipeline_ref.to_string(),
                plugin: PluginSpec::new("s3")
                    .with_param("s3_bucket", "logs")
                    .with_param(
                        "aws_key_id",
                        json!({"valueFrom": {"secretKeyRef": {"name": "s3", "key": "id"}}}),
                    ),
            },
        );
        sink.metadata.namespace = Some(namespace.to_string());
        sink
    }

    fn empty_lists(mock: &mut MockResourceSource) {
        mock.expect_list_flows().returning(|| Ok(vec![]));
        mock.expect_list_cluster_flows().returning(|_| Ok(vec![]));
        mock.expect_list_cluster_sinks().returning(|_| Ok(vec![]));
        mock.expect_list_routes().returning(|| Ok(vec![]));
    }

    /// Story: only watched namespaces and matching pipelineRefs are visible,
    /// and secrets are fetched once per referenced (namespace, name)
    #[tokio::test]
    async fn snapshot_filters_and_prefetches_secrets() {
        let mut mock = MockResourceSource::new();
        mock.expect_get_pipeline()
            .returning(|_| Ok(Some(pipeline(vec!["team-a".to_string()]))));
        mock.expect_list_namespaces().returning(|| {
            Ok(vec![
                NamespaceInfo::new("team-b", BTreeMap::new()),
                NamespaceInfo::new("team-a", BTreeMap::new()),
            ])
        });
        mock.expect_list_sinks().returning(|| {
            Ok(vec![
                sink("team-a", "z", ""),
                sink("team-a", "a", ""),
                sink("team-a", "other", "second-pipeline"),
                sink("team-b", "hidden", ""),
            ])
        });
        empty_lists(&mut mock);
        mock.expect_get_secret()
            .withf(|ns, name| ns == "team-a" && name == "s3")
            .times(1)
            .returning(|_, _| Ok(Some(BTreeMap::from([("id".to_string(), "AKIA".to_string())]))));
        mock.expect_count_nodes().returning(|| Ok(4));

        let snapshot = Repository::new(mock).snapshot("main").await.unwrap();
        let names: Vec<String> = snapshot.sinks.iter().map(|s| s.name_any()).collect();
        assert_eq!(names, vec!["a", "z"]);
        assert_eq!(snapshot.namespaces.len(), 1);
        assert_eq!(snapshot.node_count, 4);
        assert!(snapshot.secret_data("team-a", "s3").is_some());
    }

    #[tokio::test]
    async fn missing_pipeline_is_an_error() {
        let mut mock = MockResourceSource::new();
        mock.expect_get_pipeline().returning(|_| Ok(None));
        let err = Repository::new(mock).snapshot("main").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn failed_list_aborts_but_node_count_failure_does_not() {
        let mut mock = MockResourceSource::new();
        mock.expect_get_pipeline()
            .returning(|_| Ok(Some(pipeline(vec![]))));
        mock.expect_list_namespaces().returning(|| Ok(vec![]));
        mock.expect_list_flows()
            .returning(|| Err(Error::source_with_context("flows", "connection reset")));
        let err = Repository::new(mock).snapshot("main").await.unwrap_err();
        assert!(err.is_retryable());

        let mut mock = MockResourceSource::new();
        mock.expect_get_pipeline()
            .returning(|_| Ok(Some(pipeline(vec![]))));
        mock.expect_list_namespaces().returning(|| Ok(vec![]));
        mock.expect_list_sinks().returning(|| Ok(vec![]));
        empty_lists(&mut mock);
        mock.expect_count_nodes()
            .returning(|| Err(Error::internal("forbidden")));
        let snapshot = Repository::new(mock).snapshot("main").await.unwrap();
        assert_eq!(snapshot.node_count, 0);
    }
}
