//! LogPipeline: one logging pipeline and its backend family

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::selector::LabelSelector;
use super::types::Condition;
use crate::Error;

/// Log message key used when the CRI compatibility flag is off
pub const DEFAULT_LOG_KEY: &str = "message";

/// Log message key used when the CRI compatibility flag is on
pub const CRI_COMPAT_LOG_KEY: &str = "log";

/// The downstream engine family a pipeline compiles for
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum BackendFamily {
    /// Block-structured configuration (`<match **> … </match>`)
    #[serde(rename = "fluentd")]
    Fluentd,
    /// Statement-structured configuration (`destination "x" { … };`)
    #[serde(rename = "syslogNG")]
    SyslogNg,
}

impl fmt::Display for BackendFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fluentd => write!(f, "fluentd"),
            Self::SyslogNg => write!(f, "syslogNG"),
        }
    }
}

/// Settings for the fluentd backend
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FluentdSpec {
    /// Port the forward input listens on
    #[serde(default = "default_fluentd_port")]
    pub port: u16,

    /// Engine log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Directory under which file buffers are placed
    #[serde(default = "default_buffer_root")]
    pub buffer_root: String,
}

fn default_fluentd_port() -> u16 {
    24240
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_buffer_root() -> String {
    "/buffers".to_string()
}

impl Default for FluentdSpec {
    fn default() -> Self {
        Self {
            port: default_fluentd_port(),
            log_level: default_log_level(),
            buffer_root: default_buffer_root(),
        }
    }
}

/// Settings for the syslog-ng backend
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyslogNgSpec {
    /// Port the network source listens on
    #[serde(default = "default_syslog_ng_port")]
    pub port: u16,

    /// Maximum concurrent connections; 0 derives a value from the node count
    #[serde(default)]
    pub max_connections: u32,

    /// Configuration version header
    #[serde(default = "default_syslog_ng_version")]
    pub version: String,
}

fn default_syslog_ng_port() -> u16 {
    601
}

fn default_syslog_ng_version() -> String {
    "4.3".to_string()
}

impl Default for SyslogNgSpec {
    fn default() -> Self {
        Self {
            port: default_syslog_ng_port(),
            max_connections: 0,
            version: default_syslog_ng_version(),
        }
    }
}

impl SyslogNgSpec {
    /// Check the settings that are written verbatim into the configuration
    pub fn validate(&self) -> Result<(), Error> {
        let numeric = |part: &str| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit());
        match self.version.split_once('.') {
            Some((major, minor)) if numeric(major) && numeric(minor) => Ok(()),
            _ => Err(Error::validation_for_field(
                "LogPipeline",
                "spec.syslogNG.version",
                format!("version {:?} must look like 4.3", self.version),
            )),
        }
    }

    /// Connection limit to render, given the number of nodes in the cluster
    pub fn effective_max_connections(&self, node_count: usize) -> u32 {
        if self.max_connections > 0 {
            return self.max_connections;
        }
        let scaled = (node_count as u64).saturating_mul(10).min(1000) as u32;
        scaled.max(100)
    }
}

/// Specification for a logging pipeline
///
/// ```yaml
/// apiVersion: logroute.dev/v1alpha1
/// kind: LogPipeline
/// metadata:
///   name: main
/// spec:
///   controlNamespace: logging
///   watchNamespaceSelector:
///     matchLabels:
///       logging: enabled
///   fluentd:
///     port: 24240
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "logroute.dev",
    version = "v1alpha1",
    kind = "LogPipeline",
    plural = "logpipelines",
    shortname = "lp",
    status = "LogPipelineStatus",
    printcolumn = r#"{"name":"Backend","type":"string","jsonPath":".status.backend"}"#,
    printcolumn = r#"{"name":"Problems","type":"integer","jsonPath":".status.problemsCount"}"#,
    printcolumn = r#"{"name":"Hash","type":"string","jsonPath":".status.configHash"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    /// Namespace holding this pipeline's ClusterFlows and ClusterSinks
    pub control_namespace: String,

    /// Objects whose `pipelineRef` equals this value belong to the pipeline
    #[serde(default)]
    pub pipeline_ref: String,

    /// Namespaces watched by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub watch_namespaces: Vec<String>,

    /// Namespaces watched by label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_namespace_selector: Option<LabelSelector>,

    /// Compile for fluentd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fluentd: Option<FluentdSpec>,

    /// Compile for syslog-ng
    #[serde(
        default,
        rename = "syslogNG",
        skip_serializing_if = "Option::is_none"
    )]
    pub syslog_ng: Option<SyslogNgSpec>,

    /// Verbatim configuration used instead of compiled output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_config_override: Option<String>,

    /// Use `log` rather than `message` as the log line key
    #[serde(default)]
    pub enable_docker_parser_compatibility_for_cri: bool,
}

impl LogPipelineSpec {
    /// The single backend family this spec selects
    pub fn backend(&self) -> Result<BackendFamily, Error> {
        match (&self.fluentd, &self.syslog_ng) {
            (Some(_), None) => Ok(BackendFamily::Fluentd),
            (None, Some(syslog_ng)) => {
                syslog_ng.validate()?;
                Ok(BackendFamily::SyslogNg)
            }
            (Some(_), Some(_)) => Err(Error::validation_for_field(
                "LogPipeline",
                "spec",
                "fluentd and syslogNG are mutually exclusive",
            )),
            (None, None) => Err(Error::validation_for_field(
                "LogPipeline",
                "spec",
                "one of fluentd or syslogNG must be configured",
            )),
        }
    }

    /// Key holding the log line in records
    pub fn log_key(&self) -> &'static str {
        if self.enable_docker_parser_compatibility_for_cri {
            CRI_COMPAT_LOG_KEY
        } else {
            DEFAULT_LOG_KEY
        }
    }

    /// Port the selected backend listens on for forwarded records
    pub fn source_port(&self) -> u16 {
        match (&self.fluentd, &self.syslog_ng) {
            (Some(fluentd), _) => fluentd.port,
            (None, Some(syslog_ng)) => syslog_ng.port,
            (None, None) => FluentdSpec::default().port,
        }
    }

    /// Whether a namespace with the given labels is watched
    pub fn watches(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        let selector = self
            .watch_namespace_selector
            .as_ref()
            .filter(|s| !s.is_empty());

        if self.watch_namespaces.is_empty() && selector.is_none() {
            return true;
        }

        self.watch_namespaces.iter().any(|n| n == namespace)
            || selector.is_some_and(|s| s.matches(labels))
    }
}

impl LogPipeline {
    /// Backend family to compile for, refusing a switch after configuration
    ///
    /// Once `status.backend` records a family, the spec may not name another one.
    pub fn effective_backend(&self) -> Result<BackendFamily, Error> {
        let name = self.metadata.name.as_deref().unwrap_or_default();
        let wanted = self.spec.backend().map_err(|e| match e {
            Error::Validation { message, field, .. } => Error::Validation {
                resource: format!("LogPipeline/{name}"),
                message,
                field,
            },
            other => other,
        })?;

        if let Some(previous) = self.status.as_ref().and_then(|s| s.backend) {
            if previous != wanted {
                return Err(Error::validation_for_field(
                    format!("LogPipeline/{name}"),
                    "spec",
                    format!(
                        "backend cannot change from {previous} to {wanted} once configured"
                    ),
                ));
            }
        }

        Ok(wanted)
    }
}

/// Status of a LogPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineStatus {
    /// Backend family of the last compiled configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendFamily>,

    /// Short hash of the last rendered configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// Pipeline-level problems
    ///
    /// Always serialized so a merge patch clears earlier problems.
    #[serde(default)]
    pub problems: Vec<String>,

    /// Number of pipeline-level problems
    #[serde(default)]
    pub problems_count: i64,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LabelSelector;

    fn spec() -> LogPipelineSpec {
        LogPipelineSpec {
            control_namespace: "logging".to_string(),
            pipeline_ref: String::new(),
            watch_namespaces: vec![],
            watch_namespace_selector: None,
            fluentd: Some(FluentdSpec::default()),
            syslog_ng: None,
            flow_config_override: None,
            enable_docker_parser_compatibility_for_cri: false,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_manifest_with_defaults() {
        let yaml = r#"
apiVersion: logroute.dev/v1alpha1
kind: LogPipeline
metadata:
  name: main
spec:
  controlNamespace: logging
  syslogNG: {}
"#;
        let pipeline: LogPipeline = serde_yaml::from_str(yaml).unwrap();
        let syslog = pipeline.spec.syslog_ng.clone().unwrap();
        assert_eq!(syslog.port, 601);
        assert_eq!(syslog.version, "4.3");
        assert_eq!(pipeline.spec.backend().unwrap(), BackendFamily::SyslogNg);
        assert_eq!(pipeline.spec.log_key(), DEFAULT_LOG_KEY);
    }

    #[test]
    fn backend_requires_exactly_one_family() {
        let mut both = spec();
        both.syslog_ng = Some(SyslogNgSpec::default());
        assert!(both.backend().is_err());

        let mut neither = spec();
        neither.fluentd = None;
        assert!(neither.backend().is_err());

        assert_eq!(spec().backend().unwrap(), BackendFamily::Fluentd);
    }

    #[test]
    fn syslog_ng_version_must_be_numeric() {
        let mut s = spec();
        s.fluentd = None;
        for good in ["4.3", "3.38", "10.0"] {
            s.syslog_ng = Some(SyslogNgSpec {
                version: good.to_string(),
                ..Default::default()
            });
            assert_eq!(s.backend().unwrap(), BackendFamily::SyslogNg, "{good}");
        }
        for bad in ["4.3\n@include \"/etc/x.conf\"", "4", "4.", ".3", "4.3.1", "v4.3", ""] {
            s.syslog_ng = Some(SyslogNgSpec {
                version: bad.to_string(),
                ..Default::default()
            });
            match s.backend().unwrap_err() {
                Error::Validation { field, message, .. } => {
                    assert_eq!(field.as_deref(), Some("spec.syslogNG.version"));
                    assert!(message.contains("must look like 4.3"), "{bad:?}");
                }
                other => panic!("unexpected error {other}"),
            }
        }
    }

    #[test]
    fn clean_pipeline_status_serializes_empty_problems() {
        let status = LogPipelineStatus {
            backend: Some(BackendFamily::Fluentd),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["problems"], serde_json::json!([]));
        assert_eq!(value["problemsCount"], 0);
    }

    #[test]
    fn backend_switch_after_configuration_is_refused() {
        let mut pipeline = LogPipeline::new("main", spec());
        pipeline.status = Some(LogPipelineStatus {
            backend: Some(BackendFamily::SyslogNg),
            ..Default::default()
        });
        let err = pipeline.effective_backend().unwrap_err();
        assert!(err.to_string().contains("cannot change"));
        assert!(!err.is_retryable());

        pipeline.status = Some(LogPipelineStatus {
            backend: Some(BackendFamily::Fluentd),
            ..Default::default()
        });
        assert_eq!(pipeline.effective_backend().unwrap(), BackendFamily::Fluentd);
    }

    #[test]
    fn cri_compat_switches_log_key() {
        let mut s = spec();
        s.enable_docker_parser_compatibility_for_cri = true;
        assert_eq!(s.log_key(), CRI_COMPAT_LOG_KEY);
    }

    #[test]
    fn watch_selector_semantics() {
        let mut s = spec();
        assert!(s.watches("anything", &labels(&[])));

        s.watch_namespaces = vec!["team-a".to_string()];
        assert!(s.watches("team-a", &labels(&[])));
        assert!(!s.watches("team-b", &labels(&[])));

        s.watch_namespace_selector = Some(LabelSelector {
            match_labels: Some(labels(&[("logging", "enabled")])),
            match_expressions: vec![],
        });
        assert!(s.watches("team-b", &labels(&[("logging", "enabled")])));
        assert!(!s.watches("team-c", &labels(&[("logging", "off")])));
    }

    #[test]
    fn max_connections_scale_with_nodes() {
        let s = SyslogNgSpec::default();
        assert_eq!(s.effective_max_connections(0), 100);
        assert_eq!(s.effective_max_connections(25), 250);
        assert_eq!(s.effective_max_connections(500), 1000);

        let fixed = SyslogNgSpec {
            max_connections: 42,
            ..Default::default()
        };
        assert_eq!(fixed.effective_max_connections(500), 42);
    }
}
