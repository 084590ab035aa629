//! Supporting types shared by the logroute CRDs

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw, unvalidated plugin declaration as written in a Sink or a flow filter
///
/// ```yaml
/// plugin:
///   type: gcs
///   params:
///     project: logging-example
///     bucket: archive
///     credentials:
///       valueFrom:
///         secretKeyRef: { name: gcs-sa, key: key.json }
///   nested:
///     buffer:
///       timekey: 1m
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct PluginSpec {
    /// Plugin type tag (e.g. `gcs`, `grep`)
    #[serde(rename = "type")]
    pub type_: String,

    /// Plugin parameters, keyed by parameter name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Value>,

    /// Nested sub-directives (buffer, retry, tls), keyed by kind
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nested: BTreeMap<String, BTreeMap<String, Value>>,
}

impl PluginSpec {
    /// Create a plugin spec with the given type tag and no parameters
    pub fn new(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            ..Default::default()
        }
    }

    /// Builder-style parameter insertion
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Builder-style nested parameter insertion
    pub fn with_nested(
        mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.nested
            .entry(kind.into())
            .or_default()
            .insert(name.into(), value.into());
        self
    }

    /// Every secret referenced by this plugin, sorted and deduplicated
    pub fn secret_refs(&self) -> Vec<SecretKeySelector> {
        let refs: BTreeSet<SecretKeySelector> = self
            .params
            .values()
            .chain(self.nested.values().flat_map(|n| n.values()))
            .filter_map(SecretValueSource::from_value)
            .collect();
        refs.into_iter().collect()
    }
}

/// Reference to one key of a Secret in the owning object's namespace
#[derive(
    Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct SecretKeySelector {
    /// Secret name
    pub name: String,
    /// Key within the secret's data
    pub key: String,
}

/// Secret-backed parameter value: `{ valueFrom: { secretKeyRef: { name, key } } }`
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretValueSource {
    /// Where the value comes from
    pub value_from: SecretKeySource,
}

/// Wrapper holding the secret key selector
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySource {
    /// Secret key selector
    pub secret_key_ref: SecretKeySelector,
}

impl SecretValueSource {
    /// Extract the secret key selector when `value` has the secret-reference shape
    pub fn from_value(value: &Value) -> Option<SecretKeySelector> {
        if !value.get("valueFrom").is_some_and(Value::is_object) {
            return None;
        }
        serde_json::from_value::<SecretValueSource>(value.clone())
            .ok()
            .map(|s| s.value_from.secret_key_ref)
    }
}

/// Status reported on every Flow, ClusterFlow, Sink and ClusterSink
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    /// Whether the object takes part in the rendered configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,

    /// Problems found during the last evaluation
    ///
    /// Always serialized so a merge patch clears earlier problems.
    #[serde(default)]
    pub problems: Vec<String>,

    /// Number of problems found during the last evaluation
    #[serde(default)]
    pub problems_count: i64,
}

impl ResourceStatus {
    /// Build a status from an activity flag and a problem list
    pub fn new(active: bool, problems: Vec<String>) -> Self {
        let problems_count = problems.len() as i64;
        Self {
            active: Some(active),
            problems,
            problems_count,
        }
    }
}

/// Status of a condition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., ConfigRendered)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}
