//! Sink and ClusterSink: named, validated output destinations

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{PluginSpec, ResourceStatus};
use crate::resource::{ResourceKey, ResourceKind};

/// Specification for a namespaced Sink
///
/// ```yaml
/// apiVersion: logroute.dev/v1alpha1
/// kind: Sink
/// metadata:
///   name: archive
///   namespace: team-a
/// spec:
///   plugin:
///     type: s3
///     params:
///       s3_bucket: team-a-logs
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logroute.dev",
    version = "v1alpha1",
    kind = "Sink",
    plural = "sinks",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.plugin.type"}"#,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Problems","type":"integer","jsonPath":".status.problemsCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SinkSpec {
    /// Pipeline this sink belongs to
    #[serde(default)]
    pub pipeline_ref: String,

    /// Output plugin
    pub plugin: PluginSpec,
}

/// Specification for a ClusterSink, living in the control namespace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logroute.dev",
    version = "v1alpha1",
    kind = "ClusterSink",
    plural = "clustersinks",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.plugin.type"}"#,
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Problems","type":"integer","jsonPath":".status.problemsCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSinkSpec {
    /// Pipeline this sink belongs to
    #[serde(default)]
    pub pipeline_ref: String,

    /// Output plugin
    pub plugin: PluginSpec,
}

/// Read access shared by Sink and ClusterSink
pub trait SinkDefinition {
    /// Key identifying this sink
    fn key(&self) -> ResourceKey;
    /// Pipeline reference
    fn pipeline_ref(&self) -> &str;
    /// Output plugin declaration
    fn plugin(&self) -> &PluginSpec;
}

impl SinkDefinition for Sink {
    fn key(&self) -> ResourceKey {
        ResourceKey::new(
            ResourceKind::Sink,
            self.namespace().unwrap_or_default(),
            self.name_any(),
        )
    }

    fn pipeline_ref(&self) -> &str {
        &self.spec.pipeline_ref
    }

    fn plugin(&self) -> &PluginSpec {
        &self.spec.plugin
    }
}

impl SinkDefinition for ClusterSink {
    fn key(&self) -> ResourceKey {
        ResourceKey::new(
            ResourceKind::ClusterSink,
            self.namespace().unwrap_or_default(),
            self.name_any(),
        )
    }

    fn pipeline_ref(&self) -> &str {
        &self.spec.pipeline_ref
    }

    fn plugin(&self) -> &PluginSpec {
        &self.spec.plugin
    }
}
