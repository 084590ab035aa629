//! Flow and ClusterFlow: which logs go through which filters to which sinks

use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{PluginSpec, ResourceStatus};
use crate::resource::{ResourceKey, ResourceKind};

/// Log origin selector
///
/// All populated fields must match. An empty selector matches every record.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Pod labels, all of which must be present with the given values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Node host names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,

    /// Container names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub container_names: Vec<String>,

    /// Namespaces; only meaningful on ClusterFlows
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl Selector {
    /// Selector matching everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns true when no field constrains the match
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
            && self.hosts.is_empty()
            && self.container_names.is_empty()
            && self.namespaces.is_empty()
    }
}

/// One ordered match rule; the first rule whose selector matches decides
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MatchRule {
    /// Route matching records through the flow
    Select(Selector),
    /// Drop matching records from the flow
    Exclude(Selector),
}

impl MatchRule {
    /// The selector of this rule
    pub fn selector(&self) -> &Selector {
        match self {
            Self::Select(s) | Self::Exclude(s) => s,
        }
    }

    /// Returns true for exclude rules
    pub fn is_exclude(&self) -> bool {
        matches!(self, Self::Exclude(_))
    }
}

/// Specification for a namespaced Flow
///
/// ```yaml
/// apiVersion: logroute.dev/v1alpha1
/// kind: Flow
/// metadata:
///   name: web
///   namespace: team-a
/// spec:
///   match:
///     - exclude:
///         labels: { app: debug }
///     - select:
///         labels: { app: web }
///   filters:
///     - type: grep
///       params: { regexp: "error" }
///   sinkRefs: [archive]
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logroute.dev",
    version = "v1alpha1",
    kind = "Flow",
    plural = "flows",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Problems","type":"integer","jsonPath":".status.problemsCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct FlowSpec {
    /// Pipeline this flow belongs to
    #[serde(default)]
    pub pipeline_ref: String,

    /// Ordered match rules
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_rules: Vec<MatchRule>,

    /// Ordered filter chain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PluginSpec>,

    /// Ordered sink names
    #[serde(default)]
    pub sink_refs: Vec<String>,
}

/// Specification for a ClusterFlow, which lives in the control namespace and
/// selects across every watched namespace
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logroute.dev",
    version = "v1alpha1",
    kind = "ClusterFlow",
    plural = "clusterflows",
    namespaced,
    status = "ResourceStatus",
    printcolumn = r#"{"name":"Active","type":"boolean","jsonPath":".status.active"}"#,
    printcolumn = r#"{"name":"Problems","type":"integer","jsonPath":".status.problemsCount"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterFlowSpec {
    /// Pipeline this flow belongs to
    #[serde(default)]
    pub pipeline_ref: String,

    /// Ordered match rules; selectors may name namespaces
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub match_rules: Vec<MatchRule>,

    /// Ordered filter chain
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<PluginSpec>,

    /// Ordered ClusterSink names
    #[serde(default)]
    pub sink_refs: Vec<String>,
}

/// Read access shared by Flow and ClusterFlow
pub trait FlowDefinition {
    /// Kind of this flow
    fn kind(&self) -> ResourceKind;
    /// Key identifying this flow
    fn key(&self) -> ResourceKey;
    /// Pipeline reference
    fn pipeline_ref(&self) -> &str;
    /// Ordered match rules
    fn match_rules(&self) -> &[MatchRule];
    /// Ordered filter chain
    fn filters(&self) -> &[PluginSpec];
    /// Ordered sink references
    fn sink_refs(&self) -> &[String];
}

impl FlowDefinition for Flow {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Flow
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::flow(self.namespace().unwrap_or_default(), self.name_any())
    }

    fn pipeline_ref(&self) -> &str {
        &self.spec.pipeline_ref
    }

    fn match_rules(&self) -> &[MatchRule] {
        &self.spec.match_rules
    }

    fn filters(&self) -> &[PluginSpec] {
        &self.spec.filters
    }

    fn sink_refs(&self) -> &[String] {
        &self.spec.sink_refs
    }
}

impl FlowDefinition for ClusterFlow {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ClusterFlow
    }

    fn key(&self) -> ResourceKey {
        ResourceKey::cluster_flow(self.namespace().unwrap_or_default(), self.name_any())
    }

    fn pipeline_ref(&self) -> &str {
        &self.spec.pipeline_ref
    }

    fn match_rules(&self) -> &[MatchRule] {
        &self.spec.match_rules
    }

    fn filters(&self) -> &[PluginSpec] {
        &self.spec.filters
    }

    fn sink_refs(&self) -> &[String] {
        &self.spec.sink_refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_manifest_parses_match_rules_in_order() {
        let yaml = r#"
apiVersion: logroute.dev/v1alpha1
kind: Flow
metadata:
  name: web
  namespace: team-a
spec:
  match:
    - exclude:
        labels: { app: debug }
    - select:
        labels: { app: web }
        containerNames: [nginx]
  filters:
    - type: grep
      params: { regexp: error }
  sinkRefs: [archive]
"#;
        let flow: Flow = serde_yaml::from_str(yaml).unwrap();
        let rules = flow.match_rules();
        assert_eq!(rules.len(), 2);
        assert!(rules[0].is_exclude());
        assert!(!rules[1].is_exclude());
        assert_eq!(rules[1].selector().container_names, vec!["nginx"]);
        assert_eq!(flow.filters()[0].type_, "grep");
        assert_eq!(flow.key(), ResourceKey::flow("team-a", "web"));
    }

    #[test]
    fn cluster_flow_key_uses_cluster_kind() {
        let mut flow = ClusterFlow::new("all", ClusterFlowSpec::default());
        flow.metadata.namespace = Some("logging".to_string());
        assert_eq!(flow.key(), ResourceKey::cluster_flow("logging", "all"));
        assert_eq!(flow.kind(), ResourceKind::ClusterFlow);
    }

    #[test]
    fn empty_selector_is_select_all() {
        assert!(Selector::all().is_empty());
        let s = Selector {
            hosts: vec!["node-1".to_string()],
            ..Default::default()
        };
        assert!(!s.is_empty());
    }
}
