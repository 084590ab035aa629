//! Validation reconciler
//!
//! Runs the pass in dry-run mode and writes the outcome to every Flow,
//! ClusterFlow, Sink and ClusterSink. A resource without a written status is
//! Pending; after a run it is Evaluated. Nothing is rendered and no secret
//! value is read into memory beyond the existence check.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use logroute_common::crd::{
    BackendFamily, ClusterFlow, ClusterSink, Condition, ConditionStatus, Flow, LogPipeline,
    LogPipelineStatus, ResourceStatus, Sink,
};
use logroute_common::{Error, ResourceKey, ResourceKind, FIELD_MANAGER};

use crate::error::CompileError;
use crate::pipeline::analyze;
use crate::repository::{Repository, Snapshot};
use crate::secrets::InjectionMode;
use crate::source::ResourceSource;

/// Outcome of an evaluated resource
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Evaluation {
    /// Takes part in the configuration
    Active,
    /// Valid but referenced by nothing
    Unused,
    /// Excluded because of problems
    HasProblems,
}

/// Lifecycle of a resource status
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Never evaluated
    Pending,
    /// Evaluated at least once
    Evaluated(Evaluation),
}

impl ResourceState {
    /// State described by a written status
    pub fn of(status: Option<&ResourceStatus>) -> Self {
        let Some(status) = status else {
            return Self::Pending;
        };
        match status.active {
            None => Self::Pending,
            Some(_) if status.problems_count > 0 => Self::Evaluated(Evaluation::HasProblems),
            Some(true) => Self::Evaluated(Evaluation::Active),
            Some(false) => Self::Evaluated(Evaluation::Unused),
        }
    }
}

/// Writes statuses back to the objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait StatusWriter: Send + Sync {
    /// Replace the status of a Flow, ClusterFlow, Sink or ClusterSink
    async fn write_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<(), Error>;

    /// Merge into the status of a LogPipeline
    async fn write_pipeline_status(
        &self,
        name: &str,
        status: &LogPipelineStatus,
    ) -> Result<(), Error>;
}

/// [`StatusWriter`] patching the status subresource through kube-rs
#[derive(Clone)]
pub struct KubeStatusWriter {
    client: Client,
}

impl KubeStatusWriter {
    /// Create a writer using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch<K>(
        &self,
        namespace: &str,
        name: &str,
        status: &ResourceStatus,
    ) -> Result<(), Error>
    where
        K: kube::Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatusWriter for KubeStatusWriter {
    async fn write_status(&self, key: &ResourceKey, status: &ResourceStatus) -> Result<(), Error> {
        match key.kind {
            ResourceKind::Flow => self.patch::<Flow>(&key.namespace, &key.name, status).await,
            ResourceKind::ClusterFlow => {
                self.patch::<ClusterFlow>(&key.namespace, &key.name, status)
                    .await
            }
            ResourceKind::Sink => self.patch::<Sink>(&key.namespace, &key.name, status).await,
            ResourceKind::ClusterSink => {
                self.patch::<ClusterSink>(&key.namespace, &key.name, status)
                    .await
            }
        }
    }

    async fn write_pipeline_status(
        &self,
        name: &str,
        status: &LogPipelineStatus,
    ) -> Result<(), Error> {
        let api: Api<LogPipeline> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "status": status });
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Statuses computed by a dry-run pass
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluated {
    /// Backend the pipeline compiles for
    pub backend: BackendFamily,
    /// Status per resource
    pub statuses: BTreeMap<ResourceKey, ResourceStatus>,
}

/// Evaluate a snapshot without rendering or materialising secrets
#[instrument(skip_all, fields(pipeline = %snapshot.pipeline_name()))]
pub fn evaluate_snapshot(snapshot: &Snapshot) -> Result<Evaluated, CompileError> {
    let analysis = analyze(snapshot, InjectionMode::DryRun)?;
    let participants = analysis.tree.participants();
    Ok(Evaluated {
        backend: analysis.backend,
        statuses: analysis.ledger.into_statuses(&participants),
    })
}

/// Status currently stored on the object behind `key`
fn current_status<'a>(snapshot: &'a Snapshot, key: &ResourceKey) -> Option<&'a ResourceStatus> {
    fn find<'a, K: kube::Resource>(
        items: &'a [K],
        key: &ResourceKey,
        status: fn(&K) -> Option<&ResourceStatus>,
    ) -> Option<&'a ResourceStatus> {
        items
            .iter()
            .find(|o| {
                o.namespace().as_deref() == Some(key.namespace.as_str()) && o.name_any() == key.name
            })
            .and_then(status)
    }

    match key.kind {
        ResourceKind::Flow => find(&snapshot.flows, key, |o| o.status.as_ref()),
        ResourceKind::ClusterFlow => find(&snapshot.cluster_flows, key, |o| o.status.as_ref()),
        ResourceKind::Sink => find(&snapshot.sinks, key, |o| o.status.as_ref()),
        ResourceKind::ClusterSink => find(&snapshot.cluster_sinks, key, |o| o.status.as_ref()),
    }
}

/// Summary of one reconcile
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// Resources that take part in the configuration
    pub active: usize,
    /// Valid resources nothing references
    pub unused: usize,
    /// Resources with problems
    pub with_problems: usize,
    /// Statuses written
    pub written: usize,
    /// Statuses already up to date
    pub unchanged: usize,
    /// Writes that failed
    pub failed: usize,
}

/// Dry-run pass plus status write-back
pub struct ValidationReconciler<S, W> {
    repository: Repository<S>,
    writer: W,
}

impl<S: ResourceSource, W: StatusWriter> ValidationReconciler<S, W> {
    /// Create a reconciler
    pub fn new(source: S, writer: W) -> Self {
        Self {
            repository: Repository::new(source),
            writer,
        }
    }

    /// Evaluate the named pipeline and write every status
    ///
    /// A failed write is logged and counted; it is not retried. A
    /// pipeline-level configuration error is written to the LogPipeline and
    /// returned.
    #[instrument(skip(self))]
    pub async fn reconcile(&self, pipeline: &str) -> Result<ValidationReport, CompileError> {
        let snapshot = self.repository.snapshot(pipeline).await?;

        let evaluated = match evaluate_snapshot(&snapshot) {
            Ok(evaluated) => evaluated,
            Err(CompileError::Configuration(message)) => {
                let status = LogPipelineStatus {
                    problems: vec![message.clone()],
                    problems_count: 1,
                    conditions: vec![Condition::new(
                        "Ready",
                        ConditionStatus::False,
                        "ConfigurationError",
                        message.clone(),
                    )],
                    ..Default::default()
                };
                if let Err(e) = self.writer.write_pipeline_status(pipeline, &status).await {
                    warn!(error = %e, "failed to write pipeline status");
                }
                return Err(CompileError::Configuration(message));
            }
            Err(e) => return Err(e),
        };

        let mut report = ValidationReport::default();
        for (key, status) in &evaluated.statuses {
            match ResourceState::of(Some(status)) {
                ResourceState::Evaluated(Evaluation::Active) => report.active += 1,
                ResourceState::Evaluated(Evaluation::Unused) => report.unused += 1,
                ResourceState::Evaluated(Evaluation::HasProblems) => report.with_problems += 1,
                ResourceState::Pending => {}
            }

            if current_status(&snapshot, key) == Some(status) {
                debug!(resource = %key, "status unchanged, skipping update");
                report.unchanged += 1;
                continue;
            }
            match self.writer.write_status(key, status).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    warn!(resource = %key, error = %e, "failed to write status");
                    report.failed += 1;
                }
            }
        }

        let status = LogPipelineStatus {
            backend: Some(evaluated.backend),
            conditions: vec![Condition::new(
                "Validated",
                ConditionStatus::True,
                "Evaluated",
                format!(
                    "{} active, {} unused, {} with problems",
                    report.active, report.unused, report.with_problems
                ),
            )],
            ..Default::default()
        };
        if let Err(e) = self.writer.write_pipeline_status(pipeline, &status).await {
            warn!(error = %e, "failed to write pipeline status");
        }

        info!(
            active = report.active,
            unused = report.unused,
            with_problems = report.with_problems,
            written = report.written,
            failed = report.failed,
            "validation complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::source::MockResourceSource;
    use logroute_common::crd::PluginSpec;
    use serde_json::json;

    fn source_with(snap: Snapshot) -> MockResourceSource {
        let mut source = MockResourceSource::new();
        let Snapshot {
            pipeline,
            namespaces,
            flows,
            cluster_flows,
            sinks,
            cluster_sinks,
            routes,
            secrets,
            node_count,
        } = snap;
        source
            .expect_get_pipeline()
            .returning(move |_| Ok(Some(pipeline.clone())));
        source
            .expect_list_namespaces()
            .returning(move || Ok(namespaces.clone()));
        source.expect_list_flows().returning(move || Ok(flows.clone()));
        source
            .expect_list_cluster_flows()
            .returning(move |_| Ok(cluster_flows.clone()));
        source.expect_list_sinks().returning(move || Ok(sinks.clone()));
        source
            .expect_list_cluster_sinks()
            .returning(move |_| Ok(cluster_sinks.clone()));
        source.expect_list_routes().returning(move || Ok(routes.clone()));
        source.expect_get_secret().returning(move |ns, name| {
            Ok(secrets.get(&(ns.to_string(), name.to_string())).cloned())
        });
        source
            .expect_count_nodes()
            .returning(move || Ok(node_count));
        source
    }

    #[test]
    fn states_follow_the_written_status() {
        assert_eq!(ResourceState::of(None), ResourceState::Pending);
        assert_eq!(
            ResourceState::of(Some(&ResourceStatus::default())),
            ResourceState::Pending
        );
        assert_eq!(
            ResourceState::of(Some(&ResourceStatus::new(true, vec![]))),
            ResourceState::Evaluated(Evaluation::Active)
        );
        assert_eq!(
            ResourceState::of(Some(&ResourceStatus::new(false, vec![]))),
            ResourceState::Evaluated(Evaluation::Unused)
        );
        assert_eq!(
            ResourceState::of(Some(&ResourceStatus::new(false, vec!["x".to_string()]))),
            ResourceState::Evaluated(Evaluation::HasProblems)
        );
    }

    /// Story: a flow without sink references is reported, never rendered
    #[test]
    fn flow_without_references_is_inactive_with_one_problem() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "empty", &[])];

        let evaluated = evaluate_snapshot(&snap).unwrap();
        let status = &evaluated.statuses[&ResourceKey::flow("team-a", "empty")];
        assert_eq!(status.active, Some(false));
        assert_eq!(status.problems_count, 1);
    }

    #[test]
    fn dry_run_reports_missing_secrets() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["archive"])];
        snap.sinks = vec![sink(
            "team-a",
            "archive",
            gcs("a").with_param(
                "keyfile",
                json!({"valueFrom": {"secretKeyRef": {"name": "gcs-sa", "key": "key.json"}}}),
            ),
        )];

        let evaluated = evaluate_snapshot(&snap).unwrap();
        let sink = &evaluated.statuses[&ResourceKey::sink("team-a", "archive")];
        assert_eq!(sink.problems, vec!["SecretError: secret team-a/gcs-sa not found"]);
        let flow = &evaluated.statuses[&ResourceKey::flow("team-a", "web")];
        assert_eq!(flow.active, Some(false));
    }

    /// Story: every resource a compile leaves out is reported by the dry
    /// run with the same problems
    #[test]
    fn dry_run_statuses_match_the_compiled_ones() {
        let mut fluentd = snapshot(fluentd_pipeline(), &["team-a"]);
        let mut parse = flow("team-a", "parse", &["good"]);
        parse.spec.filters = vec![PluginSpec::new("parser").with_param("format", "regexp")];
        fluentd.flows = vec![
            flow("team-a", "web", &["bad"]),
            flow("team-a", "ok", &["good"]),
            parse,
        ];
        fluentd.sinks = vec![
            sink(
                "team-a",
                "bad",
                s3("a").with_nested("buffer", "chunk_keys", json!("tag,bad key")),
            ),
            sink("team-a", "good", s3("b")),
        ];

        let mut syslog_ng = snapshot(syslog_ng_pipeline(), &["team-a"]);
        syslog_ng.flows = vec![flow("team-a", "web", &["loki", "files"])];
        syslog_ng.sinks = vec![
            sink(
                "team-a",
                "loki",
                PluginSpec::new("loki")
                    .with_param("url", "loki:9096")
                    .with_param("username", "svc"),
            ),
            sink(
                "team-a",
                "files",
                PluginSpec::new("file")
                    .with_param("path", "/var/log/out")
                    .with_param("compress", "gzip"),
            ),
        ];

        for snap in [fluentd, syslog_ng] {
            let evaluated = evaluate_snapshot(&snap).unwrap();
            let compiled = crate::pipeline::compile_snapshot(&snap, &Default::default()).unwrap();
            assert_eq!(evaluated.statuses, compiled.statuses);
            assert!(evaluated.statuses.values().any(|s| s.problems_count > 0));
        }
    }

    #[tokio::test]
    async fn reconcile_writes_changed_statuses_only() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        let mut web = flow("team-a", "web", &["archive"]);
        web.status = Some(ResourceStatus::new(true, vec![]));
        snap.flows = vec![web];
        snap.sinks = vec![
            sink("team-a", "archive", s3("logs")),
            sink("team-a", "idle", s3("idle")),
            sink("team-a", "broken", PluginSpec::new("s3")),
        ];

        let mut writer = MockStatusWriter::new();
        writer
            .expect_write_status()
            .times(3)
            .returning(|key, _| {
                if key.name == "broken" {
                    Err(Error::internal("conflict"))
                } else {
                    Ok(())
                }
            });
        writer
            .expect_write_pipeline_status()
            .times(1)
            .withf(|name, status| name == "main" && status.backend == Some(BackendFamily::Fluentd))
            .returning(|_, _| Ok(()));

        let reconciler = ValidationReconciler::new(source_with(snap), writer);
        let report = reconciler.reconcile("main").await.unwrap();
        assert_eq!(
            report,
            ValidationReport {
                active: 2,
                unused: 1,
                with_problems: 1,
                written: 2,
                unchanged: 1,
                failed: 1,
            }
        );
    }

    #[tokio::test]
    async fn configuration_error_is_written_to_the_pipeline() {
        let mut pipeline = fluentd_pipeline();
        pipeline.spec.syslog_ng = Some(Default::default());
        let snap = snapshot(pipeline, &[]);

        let mut writer = MockStatusWriter::new();
        writer.expect_write_status().never();
        writer
            .expect_write_pipeline_status()
            .times(1)
            .withf(|_, status| status.problems_count == 1)
            .returning(|_, _| Ok(()));

        let reconciler = ValidationReconciler::new(source_with(snap), writer);
        let err = reconciler.reconcile("main").await.unwrap_err();
        assert!(matches!(err, CompileError::Configuration(_)));
    }
}
