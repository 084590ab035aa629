//! Shared manifests for the integration tests

#![allow(dead_code)]

use std::sync::Arc;

use logroute_compiler::{CompileContext, CompileError, CompiledPipeline, Compiler, ManifestSource};

pub const PIPELINE: &str = r#"
apiVersion: logroute.dev/v1alpha1
kind: LogPipeline
metadata:
  name: main
spec:
  controlNamespace: logging
  fluentd: {}
"#;

pub const SYSLOG_NG_PIPELINE: &str = r#"
apiVersion: logroute.dev/v1alpha1
kind: LogPipeline
metadata:
  name: main
spec:
  controlNamespace: logging
  syslogNG:
    maxConnections: 100
"#;

pub fn namespace(name: &str, team: &str) -> String {
    format!(
        r#"
apiVersion: v1
kind: Namespace
metadata:
  name: {name}
  labels:
    team: {team}
"#
    )
}

pub fn flow(namespace: &str, name: &str, refs: &[&str]) -> String {
    format!(
        r#"
apiVersion: logroute.dev/v1alpha1
kind: Flow
metadata:
  name: {name}
  namespace: {namespace}
spec:
  match:
    - select:
        labels:
          app: {name}
  sinkRefs: [{refs}]
"#,
        refs = refs.join(", ")
    )
}

pub fn s3_sink(namespace: &str, name: &str, bucket: &str) -> String {
    format!(
        r#"
apiVersion: logroute.dev/v1alpha1
kind: Sink
metadata:
  name: {name}
  namespace: {namespace}
spec:
  plugin:
    type: s3
    params:
      s3_bucket: {bucket}
      s3_region: eu-west-1
"#
    )
}

pub fn gcs_sink(namespace: &str, name: &str, secret: &str, key: &str) -> String {
    format!(
        r#"
apiVersion: logroute.dev/v1alpha1
kind: Sink
metadata:
  name: {name}
  namespace: {namespace}
spec:
  plugin:
    type: gcs
    params:
      project: logging-example
      bucket: {name}
      keyfile:
        valueFrom:
          secretKeyRef:
            name: {secret}
            key: {key}
"#
    )
}

pub fn gcs_cluster_sink(name: &str) -> String {
    format!(
        r#"
apiVersion: logroute.dev/v1alpha1
kind: ClusterSink
metadata:
  name: {name}
  namespace: logging
spec:
  plugin:
    type: gcs
    params:
      project: logging-example
      bucket: {name}
"#
    )
}

pub fn secret(namespace: &str, name: &str, key: &str) -> String {
    format!(
        r#"
apiVersion: v1
kind: Secret
metadata:
  name: {name}
  namespace: {namespace}
stringData:
  {key}: "{{}}"
"#
    )
}

pub fn deny_route(name: &str, cluster_sink: &str, namespaces: &[&str]) -> String {
    format!(
        r#"
apiVersion: logroute.dev/v1alpha1
kind: LogRoute
metadata:
  name: {name}
spec:
  target:
    kind: ClusterSink
    name: {cluster_sink}
  effect: Deny
  namespaces: [{namespaces}]
"#,
        namespaces = namespaces.join(", ")
    )
}

/// Join documents into one multi-document manifest
pub fn manifest<S: AsRef<str>>(docs: &[S]) -> String {
    docs.iter()
        .map(|d| d.as_ref().trim().to_string())
        .collect::<Vec<_>>()
        .join("\n---\n")
}

pub async fn try_compile(docs: &[String]) -> Result<CompiledPipeline, CompileError> {
    let source = ManifestSource::from_yaml(&manifest(docs)).expect("manifests parse");
    let compiler = Compiler::new(source, Arc::new(CompileContext::new()));
    compiler.compile("main").await
}

pub async fn compile(docs: &[String]) -> CompiledPipeline {
    try_compile(docs).await.expect("pipeline compiles")
}
