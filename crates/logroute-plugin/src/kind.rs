//! The closed set of plugin kinds

use std::fmt;
use std::str::FromStr;

/// Where a plugin kind may appear
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginRole {
    /// Output destination declared by a Sink or ClusterSink
    Sink,
    /// Transform step in a flow's filter chain
    Filter,
    /// Sub-directive attached to a sink
    Nested,
}

impl fmt::Display for PluginRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sink => write!(f, "sink"),
            Self::Filter => write!(f, "filter"),
            Self::Nested => write!(f, "nested"),
        }
    }
}

/// Every plugin kind logroute knows how to validate and render
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginKind {
    /// Google Cloud Storage output
    Gcs,
    /// Amazon S3 output
    S3,
    /// HTTP output
    Http,
    /// Forward protocol output
    Forward,
    /// Grafana Loki output
    Loki,
    /// Local file output
    File,
    /// Syslog output
    Syslog,
    /// Keep or drop records by pattern
    Grep,
    /// Add or remove record fields
    RecordTransformer,
    /// Parse a record field
    Parser,
    /// Replace dots in record keys
    Dedot,
    /// Output buffering
    Buffer,
    /// Output retry policy
    Retry,
    /// Transport security
    Tls,
}

impl PluginKind {
    /// All kinds, in declaration order
    pub const ALL: [PluginKind; 14] = [
        Self::Gcs,
        Self::S3,
        Self::Http,
        Self::Forward,
        Self::Loki,
        Self::File,
        Self::Syslog,
        Self::Grep,
        Self::RecordTransformer,
        Self::Parser,
        Self::Dedot,
        Self::Buffer,
        Self::Retry,
        Self::Tls,
    ];

    /// Type tag as written in manifests
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Gcs => "gcs",
            Self::S3 => "s3",
            Self::Http => "http",
            Self::Forward => "forward",
            Self::Loki => "loki",
            Self::File => "file",
            Self::Syslog => "syslog",
            Self::Grep => "grep",
            Self::RecordTransformer => "record_transformer",
            Self::Parser => "parser",
            Self::Dedot => "dedot",
            Self::Buffer => "buffer",
            Self::Retry => "retry",
            Self::Tls => "tls",
        }
    }

    /// Role of this kind
    pub fn role(&self) -> PluginRole {
        match self {
            Self::Gcs
            | Self::S3
            | Self::Http
            | Self::Forward
            | Self::Loki
            | Self::File
            | Self::Syslog => PluginRole::Sink,
            Self::Grep | Self::RecordTransformer | Self::Parser | Self::Dedot => {
                PluginRole::Filter
            }
            Self::Buffer | Self::Retry | Self::Tls => PluginRole::Nested,
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_tag())
    }
}

impl FromStr for PluginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.type_tag() == s)
            .ok_or_else(|| s.to_string())
    }
}
