//! Object builders shared by unit tests

use std::collections::BTreeMap;

use logroute_common::crd::{
    ClusterFlow, ClusterFlowSpec, ClusterSink, ClusterSinkSpec, Flow, FlowSpec, FluentdSpec,
    LogPipeline, LogPipelineSpec, LogRoute, LogRouteSpec, MatchRule, PluginSpec, RouteEffect,
    RouteTarget, RouteTargetKind, Selector, Sink, SinkSpec, SyslogNgSpec,
};

use crate::repository::Snapshot;
use crate::source::NamespaceInfo;

pub const CONTROL_NS: &str = "logging";

pub fn fluentd_pipeline() -> LogPipeline {
    LogPipeline::new(
        "main",
        LogPipelineSpec {
            control_namespace: CONTROL_NS.to_string(),
            pipeline_ref: String::new(),
            watch_namespaces: vec![],
            watch_namespace_selector: None,
            fluentd: Some(FluentdSpec::default()),
            syslog_ng: None,
            flow_config_override: None,
            enable_docker_parser_compatibility_for_cri: false,
        },
    )
}

pub fn syslog_ng_pipeline() -> LogPipeline {
    let mut pipeline = fluentd_pipeline();
    pipeline.spec.fluentd = None;
    pipeline.spec.syslog_ng = Some(SyslogNgSpec::default());
    pipeline
}

pub fn s3(bucket: &str) -> PluginSpec {
    PluginSpec::new("s3").with_param("s3_bucket", bucket)
}

pub fn gcs(bucket: &str) -> PluginSpec {
    PluginSpec::new("gcs")
        .with_param("project", "logging-example")
        .with_param("bucket", bucket)
}

pub fn select_labels(pairs: &[(&str, &str)]) -> MatchRule {
    MatchRule::Select(Selector {
        labels: pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        ..Default::default()
    })
}

pub fn flow(namespace: &str, name: &str, refs: &[&str]) -> Flow {
    let mut flow = Flow::new(
        name,
        FlowSpec {
            sink_refs: refs.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        },
    );
    flow.metadata.namespace = Some(namespace.to_string());
    flow
}

pub fn cluster_flow(name: &str, refs: &[&str]) -> ClusterFlow {
    let mut flow = ClusterFlow::new(
        name,
        ClusterFlowSpec {
            sink_refs: refs.iter().map(|r| r.to_string()).collect(),
            ..Default::default()
        },
    );
    flow.metadata.namespace = Some(CONTROL_NS.to_string());
    flow
}

pub fn sink(namespace: &str, name: &str, plugin: PluginSpec) -> Sink {
    let mut sink = Sink::new(
        name,
        SinkSpec {
            pipeline_ref: String::new(),
            plugin,
        },
    );
    sink.metadata.namespace = Some(namespace.to_string());
    sink
}

pub fn cluster_sink(name: &str, plugin: PluginSpec) -> ClusterSink {
    let mut sink = ClusterSink::new(
        name,
        ClusterSinkSpec {
            pipeline_ref: String::new(),
            plugin,
        },
    );
    sink.metadata.namespace = Some(CONTROL_NS.to_string());
    sink
}

pub fn route(
    name: &str,
    effect: RouteEffect,
    kind: RouteTargetKind,
    target_ns: Option<&str>,
    target: &str,
    namespaces: &[&str],
) -> LogRoute {
    LogRoute::new(
        name,
        LogRouteSpec {
            pipeline_ref: String::new(),
            target: RouteTarget {
                kind,
                namespace: target_ns.map(str::to_string),
                name: target.to_string(),
            },
            effect,
            namespaces: namespaces.iter().map(|n| n.to_string()).collect(),
            namespace_selector: None,
        },
    )
}

pub fn snapshot(pipeline: LogPipeline, namespaces: &[&str]) -> Snapshot {
    let mut snapshot = Snapshot::new(pipeline);
    snapshot.namespaces = namespaces
        .iter()
        .map(|n| NamespaceInfo::new(*n, BTreeMap::new()))
        .collect();
    snapshot
}
