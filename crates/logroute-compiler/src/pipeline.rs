//! The compilation pass
//!
//! Snapshot in, configuration text plus per-resource statuses out. The pass
//! is synchronous; only reading the snapshot is async.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write;
use std::sync::{Arc, Mutex};

use tracing::{debug, info, instrument, warn};

use logroute_common::crd::{
    BackendFamily, Condition, ConditionStatus, FlowDefinition, LogPipelineStatus, ResourceStatus,
    SinkDefinition,
};
use logroute_common::ResourceKey;
use logroute_plugin::{ParamValue, SecretParam};

use crate::catalog::{validate_plugins, validation_context, PluginCatalog};
use crate::error::{CompileError, Problem, ProblemLedger};
use crate::model::{self, DirectiveTree};
use crate::render::{renderer_for, Renderer};
use crate::repository::{Repository, Snapshot};
use crate::resolver::{resolve, RoutingGraph};
use crate::secrets::{InjectionMode, MountBinding, SecretInjector};
use crate::source::ResourceSource;

/// Warn-once flag for pipelines compiled from verbatim text
pub const WARN_FLOW_CONFIG_OVERRIDE: &str = "flow-config-override";

/// Process-wide state shared by every pass
#[derive(Debug, Default)]
pub struct CompileContext {
    warned: Mutex<BTreeSet<&'static str>>,
    show_flow_config: bool,
}

impl CompileContext {
    /// Create a context
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the rendered text after every pass
    pub fn with_show_flow_config(mut self, show: bool) -> Self {
        self.show_flow_config = show;
        self
    }

    /// Emit `message` once per process for `flag`
    ///
    /// Returns whether the warning was emitted by this call.
    pub fn warn_once(&self, flag: &'static str, message: &str) -> bool {
        let first = self
            .warned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(flag);
        if first {
            warn!(warning = flag, "{message}");
        }
        first
    }

    /// Whether `flag` has been emitted
    pub fn has_warned(&self, flag: &str) -> bool {
        self.warned
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(flag)
    }
}

/// Result of a successful pass
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledPipeline {
    /// Pipeline name
    pub pipeline: String,
    /// Backend the text is written for
    pub backend: BackendFamily,
    /// Configuration text
    pub text: String,
    /// Secret files the deployment must mount
    pub mount_bindings: Vec<MountBinding>,
    /// Status of every Flow, ClusterFlow, Sink and ClusterSink
    pub statuses: BTreeMap<ResourceKey, ResourceStatus>,
    /// First 8 bytes of the SHA-256 of `text`, hex encoded
    pub config_hash: String,
    /// Whether `text` came from `flowConfigOverride`
    pub overridden: bool,
}

impl CompiledPipeline {
    /// Number of resources with problems
    pub fn resources_with_problems(&self) -> usize {
        self.statuses
            .values()
            .filter(|s| s.problems_count > 0)
            .count()
    }

    /// Status to record on the LogPipeline
    ///
    /// `Ready` says the configuration compiled; `Degraded` says whether
    /// resources were left out of it.
    pub fn pipeline_status(&self) -> LogPipelineStatus {
        let ready = Condition::new(
            "Ready",
            ConditionStatus::True,
            "Compiled",
            format!("{} configuration compiled", self.backend),
        );
        let broken = self.resources_with_problems();
        let degraded = if broken == 0 {
            Condition::new(
                "Degraded",
                ConditionStatus::False,
                "AllResourcesIncluded",
                "every resource is part of the configuration",
            )
        } else {
            Condition::new(
                "Degraded",
                ConditionStatus::True,
                "ResourcesExcluded",
                format!("{broken} resources excluded because of problems"),
            )
        };
        LogPipelineStatus {
            backend: Some(self.backend),
            config_hash: Some(self.config_hash.clone()),
            problems: Vec::new(),
            problems_count: 0,
            conditions: vec![ready, degraded],
        }
    }
}

/// Hex of the first 8 bytes of the SHA-256 of `text`
pub fn config_hash(text: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, text.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            let _ = write!(s, "{b:02x}");
            s
        })
}

/// Every stage up to the directive tree
pub(crate) struct Analysis {
    pub backend: BackendFamily,
    pub renderer: Box<dyn Renderer>,
    pub catalog: PluginCatalog,
    pub graph: RoutingGraph,
    pub tree: DirectiveTree,
    pub ledger: ProblemLedger,
    pub bindings: Vec<MountBinding>,
}

fn register_resources(snapshot: &Snapshot, ledger: &mut ProblemLedger) {
    for flow in &snapshot.flows {
        ledger.register(flow.key());
    }
    for flow in &snapshot.cluster_flows {
        ledger.register(flow.key());
    }
    for sink in &snapshot.sinks {
        ledger.register(sink.key());
    }
    for sink in &snapshot.cluster_sinks {
        ledger.register(sink.key());
    }
}

/// Run the stages shared by compilation and validation
///
/// Fails fast on a pipeline-level configuration error, before any
/// resolution or rendering.
pub(crate) fn analyze(snapshot: &Snapshot, mode: InjectionMode) -> Result<Analysis, CompileError> {
    let backend = snapshot.pipeline.effective_backend()?;
    let spec = &snapshot.pipeline.spec;
    let renderer = renderer_for(spec, backend, snapshot.node_count);

    let mut ledger = ProblemLedger::default();
    register_resources(snapshot, &mut ledger);

    let mut catalog = validate_plugins(snapshot, &validation_context(spec), &mut ledger);

    for (key, instance) in catalog.instances() {
        if !renderer.supports(instance.kind) {
            ledger.push(
                key.clone(),
                Problem::render(format!(
                    "{} is not supported by the {backend} backend",
                    instance.kind
                )),
            );
            continue;
        }
        for problem in renderer.check(instance) {
            ledger.push(key.clone(), problem);
        }
    }

    let mut injector = SecretInjector::new(snapshot, renderer.secret_dir(), mode);
    for (key, instance) in catalog.instances_mut() {
        if !renderer.supports(instance.kind) {
            continue;
        }
        let errors = injector.inject(instance, &key.namespace, |kind| {
            renderer.secret_delivery(kind)
        });
        for error in errors {
            ledger.push(key.clone(), Problem::secret(error.to_string()));
        }
    }
    let bindings = injector.finish();

    let graph = resolve(snapshot);
    for (key, routing) in &graph.flows {
        for problem in &routing.problems {
            ledger.push(key.clone(), problem.clone());
        }
    }

    let tree = model::build(snapshot, &graph, &catalog, &mut ledger);

    Ok(Analysis {
        backend,
        renderer,
        catalog,
        graph,
        tree,
        ledger,
        bindings,
    })
}

/// Mount paths the tree actually writes
fn mounted_paths(tree: &DirectiveTree) -> BTreeSet<&str> {
    let sinks = tree.sinks.iter().map(|s| &s.plugin);
    let filters = tree.flows.iter().flat_map(|f| f.filters.iter());
    sinks
        .chain(filters)
        .flat_map(|i| {
            i.params
                .iter()
                .chain(i.nested.iter().flat_map(|n| n.params.iter()))
        })
        .filter_map(|p| match &p.value {
            ParamValue::Secret(SecretParam::Mount(path)) => Some(path.as_str()),
            _ => None,
        })
        .collect()
}

/// Compile one snapshot
#[instrument(skip_all, fields(pipeline = %snapshot.pipeline_name()))]
pub fn compile_snapshot(
    snapshot: &Snapshot,
    ctx: &CompileContext,
) -> Result<CompiledPipeline, CompileError> {
    let Analysis {
        backend,
        renderer,
        catalog,
        graph,
        mut tree,
        mut ledger,
        mut bindings,
    } = analyze(snapshot, InjectionMode::Committing)?;

    let rendered = loop {
        let rendered = renderer.render(&tree);
        if rendered.problems.is_empty() {
            break rendered;
        }
        let before = ledger.total();
        for (key, problem) in rendered.problems {
            ledger.push(key, problem);
        }
        if ledger.total() == before {
            return Err(CompileError::System(logroute_common::Error::internal(
                "renderer reported problems on resources outside the tree",
            )));
        }
        tree = model::build(snapshot, &graph, &catalog, &mut ledger);
    };

    let mounted = mounted_paths(&tree);
    bindings.retain(|b| mounted.contains(b.path.as_str()));

    let overridden = match &snapshot.pipeline.spec.flow_config_override {
        Some(text) => {
            ctx.warn_once(
                WARN_FLOW_CONFIG_OVERRIDE,
                "flowConfigOverride is set; the compiled configuration is replaced verbatim",
            );
            Some(text.clone())
        }
        None => None,
    };
    let is_overridden = overridden.is_some();
    let text = overridden.unwrap_or(rendered.text);

    let config_hash = config_hash(&text);
    if ctx.show_flow_config {
        info!(config = %text, "rendered configuration");
    }

    let statuses = ledger.into_statuses(&tree.participants());
    info!(
        %backend,
        config_hash = %config_hash,
        flows = tree.flows.len(),
        sinks = tree.sinks.len(),
        mounts = bindings.len(),
        "compiled pipeline"
    );
    debug!(
        with_problems = statuses.values().filter(|s| s.problems_count > 0).count(),
        "resource statuses computed"
    );

    Ok(CompiledPipeline {
        pipeline: snapshot.pipeline_name(),
        backend,
        text,
        mount_bindings: bindings,
        statuses,
        config_hash,
        overridden: is_overridden,
    })
}

/// Reads snapshots and compiles them
pub struct Compiler<S> {
    repository: Repository<S>,
    context: Arc<CompileContext>,
}

impl<S: ResourceSource> Compiler<S> {
    /// Create a compiler over a source
    pub fn new(source: S, context: Arc<CompileContext>) -> Self {
        Self {
            repository: Repository::new(source),
            context,
        }
    }

    /// Read and compile the named pipeline
    #[instrument(skip(self))]
    pub async fn compile(&self, pipeline: &str) -> Result<CompiledPipeline, CompileError> {
        let snapshot = self.repository.snapshot(pipeline).await?;
        compile_snapshot(&snapshot, &self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::source::MockResourceSource;
    use logroute_common::crd::{LogPipelineStatus, PluginSpec};
    use serde_json::json;

    fn keyfile_ref(name: &str, key: &str) -> serde_json::Value {
        json!({"valueFrom": {"secretKeyRef": {"name": name, "key": key}}})
    }

    fn gcs_with_key(bucket: &str, secret: &str) -> PluginSpec {
        gcs(bucket).with_param("keyfile", keyfile_ref(secret, "key.json"))
    }

    fn add_secret(snap: &mut Snapshot, namespace: &str, name: &str) {
        snap.secrets.insert(
            (namespace.to_string(), name.to_string()),
            BTreeMap::from([("key.json".to_string(), "{}".to_string())]),
        );
    }

    #[test]
    fn config_hash_is_sixteen_hex_chars() {
        let hash = config_hash("<system>\n</system>\n");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, config_hash("<system>\n</system>\n"));
        assert_ne!(hash, config_hash(""));
    }

    #[test]
    fn warn_once_fires_once() {
        let ctx = CompileContext::new();
        assert!(ctx.warn_once("flag", "first"));
        assert!(!ctx.warn_once("flag", "second"));
        assert!(ctx.has_warned("flag"));
        assert!(!ctx.has_warned("other"));
    }

    /// Story: a missing secret key breaks one sink, the other keeps rendering
    /// and only the good reference is mounted
    #[test]
    fn missing_secret_key_only_affects_its_sink() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["good", "bad"])];
        snap.sinks = vec![
            sink("team-a", "good", gcs_with_key("a", "gcs-sa")),
            sink(
                "team-a",
                "bad",
                gcs("b").with_param("keyfile", keyfile_ref("gcs-sa", "missing.json")),
            ),
        ];
        add_secret(&mut snap, "team-a", "gcs-sa");

        let compiled = compile_snapshot(&snap, &CompileContext::new()).unwrap();
        let bad = &compiled.statuses[&ResourceKey::sink("team-a", "bad")];
        assert_eq!(bad.problems_count, 1);
        assert!(bad.problems[0].starts_with("SecretError: key missing.json"));
        assert_eq!(
            compiled.statuses[&ResourceKey::sink("team-a", "good")].active,
            Some(true)
        );
        assert_eq!(
            compiled.statuses[&ResourceKey::flow("team-a", "web")].active,
            Some(true)
        );

        assert_eq!(compiled.mount_bindings.len(), 1);
        assert_eq!(
            compiled.mount_bindings[0].path,
            "/fluentd/etc/secret/team-a_gcs-sa_key.json"
        );
        assert!(compiled
            .text
            .contains("keyfile /fluentd/etc/secret/team-a_gcs-sa_key.json"));
        assert!(!compiled.text.contains("sink_team-a_bad"));
    }

    /// Story: switching an already configured pipeline to another family
    /// fails before anything is resolved
    #[test]
    fn backend_switch_fails_fast() {
        let mut pipeline = syslog_ng_pipeline();
        pipeline.status = Some(LogPipelineStatus {
            backend: Some(BackendFamily::Fluentd),
            ..Default::default()
        });
        let mut snap = snapshot(pipeline, &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["missing"])];

        let err = compile_snapshot(&snap, &CompileContext::new()).unwrap_err();
        assert!(matches!(err, CompileError::Configuration(_)));
        assert!(err.to_string().contains("cannot change from fluentd to syslogNG"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unsupported_sink_is_reported_and_skipped() {
        let mut snap = snapshot(syslog_ng_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["archive", "s3"])];
        snap.sinks = vec![
            sink("team-a", "archive", gcs("a")),
            sink("team-a", "s3", s3("logs")),
        ];

        let compiled = compile_snapshot(&snap, &CompileContext::new()).unwrap();
        let archive = &compiled.statuses[&ResourceKey::sink("team-a", "archive")];
        assert_eq!(
            archive.problems,
            vec!["UnsupportedFeature: gcs is not supported by the syslogNG backend"]
        );
        assert!(compiled.text.contains("destination \"sink_team-a_s3\""));
        assert!(!compiled.text.contains("sink_team-a_archive"));
    }

    #[test]
    fn render_problems_exclude_the_resource_and_rerender() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["bad"]), flow("team-a", "ok", &["good"])];
        snap.sinks = vec![
            sink("team-a", "bad", s3("a").with_nested("buffer", "chunk_keys", json!("tag,bad key"))),
            sink("team-a", "good", s3("b")),
        ];

        let compiled = compile_snapshot(&snap, &CompileContext::new()).unwrap();
        assert_eq!(
            compiled.statuses[&ResourceKey::sink("team-a", "bad")].problems_count,
            1
        );
        let web = &compiled.statuses[&ResourceKey::flow("team-a", "web")];
        assert_eq!(web.active, Some(false));
        assert!(web.problems[0].contains("no valid sink left"));
        assert!(compiled.text.contains("@label @sink_team-a_good"));
    }

    /// Story: a record key carrying section syntax excludes its flow and
    /// never reaches the configuration text
    #[test]
    fn record_key_with_section_syntax_excludes_the_flow() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        let mut web = flow("team-a", "web", &["archive"]);
        web.spec.filters = vec![PluginSpec::new("record_transformer").with_param(
            "records",
            json!({"x\n</record>\n</filter>\n<match **>\n@type exec\ncommand touch /tmp/x\n</match>\n<filter **>\n<record>\ny": "v"}),
        )];
        snap.flows = vec![web, flow("team-a", "api", &["archive"])];
        snap.sinks = vec![sink("team-a", "archive", s3("logs"))];

        let compiled = compile_snapshot(&snap, &CompileContext::new()).unwrap();
        let web = &compiled.statuses[&ResourceKey::flow("team-a", "web")];
        assert_eq!(web.active, Some(false));
        assert!(web.problems[0].starts_with("ConfigurationError: filter 0:"));
        assert!(web.problems[0].contains("record key"));
        assert!(!compiled.text.contains("@type exec"));
        assert!(!compiled.text.contains("flow_team-a_web"));
        assert!(compiled.text.contains("<label @flow_team-a_api>"));
    }

    #[test]
    fn syslog_ng_version_with_directives_fails_the_pass() {
        let mut pipeline = syslog_ng_pipeline();
        if let Some(syslog_ng) = pipeline.spec.syslog_ng.as_mut() {
            syslog_ng.version = "4.3\n@include \"/etc/x.conf\"".to_string();
        }
        let mut snap = snapshot(pipeline, &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["archive"])];
        snap.sinks = vec![sink("team-a", "archive", s3("logs"))];

        let err = compile_snapshot(&snap, &CompileContext::new()).unwrap_err();
        assert!(matches!(err, CompileError::Configuration(_)));
        assert!(err.to_string().contains("must look like 4.3"));
    }

    #[test]
    fn excluded_resources_mark_the_pipeline_degraded() {
        let mut snap = snapshot(fluentd_pipeline(), &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &["archive"])];
        snap.sinks = vec![sink("team-a", "archive", s3("logs"))];
        let clean = compile_snapshot(&snap, &CompileContext::new())
            .unwrap()
            .pipeline_status();

        snap.flows.push(flow("team-a", "empty", &[]));
        let degraded = compile_snapshot(&snap, &CompileContext::new())
            .unwrap()
            .pipeline_status();

        let condition = |status: &LogPipelineStatus, type_: &str| {
            status
                .conditions
                .iter()
                .find(|c| c.type_ == type_)
                .map(|c| (c.status.clone(), c.reason.clone()))
                .unwrap()
        };
        assert_eq!(
            condition(&clean, "Ready"),
            (ConditionStatus::True, "Compiled".to_string())
        );
        assert_eq!(
            condition(&clean, "Degraded"),
            (ConditionStatus::False, "AllResourcesIncluded".to_string())
        );
        assert_eq!(
            condition(&degraded, "Ready"),
            (ConditionStatus::True, "Compiled".to_string())
        );
        assert_eq!(
            condition(&degraded, "Degraded"),
            (ConditionStatus::True, "ResourcesExcluded".to_string())
        );
    }

    #[test]
    fn flow_config_override_replaces_text_and_warns_once() {
        let mut pipeline = fluentd_pipeline();
        pipeline.spec.flow_config_override = Some("<match **>\n  @type null\n</match>\n".to_string());
        let mut snap = snapshot(pipeline, &["team-a"]);
        snap.flows = vec![flow("team-a", "web", &[])];

        let ctx = CompileContext::new();
        let compiled = compile_snapshot(&snap, &ctx).unwrap();
        assert!(compiled.overridden);
        assert_eq!(compiled.text, "<match **>\n  @type null\n</match>\n");
        assert_eq!(compiled.config_hash, config_hash(&compiled.text));
        assert!(ctx.has_warned(WARN_FLOW_CONFIG_OVERRIDE));
        assert_eq!(
            compiled.statuses[&ResourceKey::flow("team-a", "web")].problems_count,
            1
        );
    }

    #[tokio::test]
    async fn compiler_reads_through_the_repository() {
        let mut source = MockResourceSource::new();
        let pipeline = fluentd_pipeline();
        source
            .expect_get_pipeline()
            .returning(move |_| Ok(Some(pipeline.clone())));
        source.expect_list_namespaces().returning(|| Ok(vec![]));
        source.expect_list_flows().returning(|| Ok(vec![]));
        source.expect_list_cluster_flows().returning(|_| Ok(vec![]));
        source.expect_list_sinks().returning(|| Ok(vec![]));
        source.expect_list_cluster_sinks().returning(|_| Ok(vec![]));
        source.expect_list_routes().returning(|| Ok(vec![]));
        source.expect_count_nodes().returning(|| Ok(1));

        let compiler = Compiler::new(source, Arc::new(CompileContext::new()));
        let compiled = compiler.compile("main").await.unwrap();
        assert_eq!(compiled.backend, BackendFamily::Fluentd);
        assert!(compiled.text.contains("@type label_router"));
        assert!(compiled.statuses.is_empty());
        assert_eq!(compiled.pipeline_status().config_hash, Some(compiled.config_hash));
    }
}
