//! Static parameter schemas for every plugin kind
//!
//! Parameters are listed in the order they are emitted.

use crate::kind::PluginKind;

/// How a parameter value is coerced and checked
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    /// Free-form string
    String,
    /// Signed integer, from a number or a numeric string
    Int,
    /// Boolean (`true/false/yes/no/on/off/1/0`)
    Bool,
    /// Duration (`30`, `30s`, `1m`, `1h30m`, `2d`)
    Duration,
    /// Byte size (`512`, `8k`, `8MB`, `1g`)
    Size,
    /// List of strings, from an array or a comma-separated string
    List,
    /// Map of string to string
    Map,
    /// Map whose keys are record field names
    RecordMap,
    /// One of a fixed set of strings
    Enum(&'static [&'static str]),
    /// Record field name (`[A-Za-z0-9_.-]+`)
    RecordKey,
    /// Secret-capable string
    Secret {
        /// Whether the consumer can read the value from a file path
        accepts_path: bool,
    },
}

/// Default applied when a parameter is absent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamDefault {
    /// Fixed value, coerced like user input
    Literal(&'static str),
    /// The pipeline's log message key
    LogKey,
    /// `<bufferRoot>/<owner id>.*.buffer`
    BufferPath,
}

/// Schema of a single parameter
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSchema {
    /// Parameter name as written in manifests and emitted in configuration
    pub name: &'static str,
    /// Coercion
    pub kind: ParamKind,
    /// Whether the parameter must be present (after defaults)
    pub required: bool,
    /// Default value
    pub default: Option<ParamDefault>,
}

impl ParamSchema {
    const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            default: None,
        }
    }

    const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: None,
        }
    }

    const fn defaulted(name: &'static str, kind: ParamKind, default: ParamDefault) -> Self {
        Self {
            name,
            kind,
            required: false,
            default: Some(default),
        }
    }
}

/// Schema of a plugin kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PluginSchema {
    /// Parameters in emission order
    pub params: &'static [ParamSchema],
    /// Nested kinds that may be declared
    pub nested: &'static [PluginKind],
    /// Nested kinds added with defaults when not declared
    pub default_nested: &'static [PluginKind],
}

impl PluginSchema {
    /// Look up a parameter by name
    pub fn param(&self, name: &str) -> Option<&'static ParamSchema> {
        self.params.iter().find(|p| p.name == name)
    }
}

use ParamDefault::{BufferPath, Literal, LogKey};
use ParamKind::*;

const INLINE_SECRET: ParamKind = Secret {
    accepts_path: false,
};
const PATH_SECRET: ParamKind = Secret { accepts_path: true };

const OUTPUT_NESTED: &[PluginKind] = &[PluginKind::Buffer, PluginKind::Retry];
const OUTPUT_TLS_NESTED: &[PluginKind] = &[PluginKind::Buffer, PluginKind::Retry, PluginKind::Tls];
const DEFAULT_BUFFER: &[PluginKind] = &[PluginKind::Buffer];

static GCS: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::required("bucket", String),
        ParamSchema::optional("keyfile", PATH_SECRET),
        ParamSchema::optional("object_key_format", String),
        ParamSchema::optional("path", String),
        ParamSchema::required("project", String),
        ParamSchema::optional(
            "storage_class",
            Enum(&[
                "dra",
                "nearline",
                "coldline",
                "multi_regional",
                "regional",
                "standard",
            ]),
        ),
    ],
    nested: OUTPUT_NESTED,
    default_nested: DEFAULT_BUFFER,
};

static S3: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("aws_key_id", INLINE_SECRET),
        ParamSchema::optional("aws_sec_key", INLINE_SECRET),
        ParamSchema::optional("path", String),
        ParamSchema::required("s3_bucket", String),
        ParamSchema::optional("s3_endpoint", String),
        ParamSchema::optional("s3_region", String),
        ParamSchema::defaulted(
            "store_as",
            Enum(&["gzip", "json", "text", "lzo"]),
            Literal("gzip"),
        ),
    ],
    nested: OUTPUT_NESTED,
    default_nested: DEFAULT_BUFFER,
};

static HTTP: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::required("endpoint", String),
        ParamSchema::optional("headers", Map),
        ParamSchema::defaulted("http_method", Enum(&["post", "put"]), Literal("post")),
        ParamSchema::optional("open_timeout", Duration),
        ParamSchema::optional("password", INLINE_SECRET),
        ParamSchema::optional("username", INLINE_SECRET),
    ],
    nested: OUTPUT_TLS_NESTED,
    default_nested: DEFAULT_BUFFER,
};

static FORWARD: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::required("host", String),
        ParamSchema::defaulted("port", Int, Literal("24224")),
        ParamSchema::optional("shared_key", INLINE_SECRET),
        ParamSchema::defaulted("transport", Enum(&["tcp", "tls"]), Literal("tcp")),
    ],
    nested: OUTPUT_TLS_NESTED,
    default_nested: DEFAULT_BUFFER,
};

static LOKI: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("extra_labels", Map),
        ParamSchema::optional("password", INLINE_SECRET),
        ParamSchema::optional("tenant", String),
        ParamSchema::required("url", String),
        ParamSchema::optional("username", INLINE_SECRET),
    ],
    nested: OUTPUT_TLS_NESTED,
    default_nested: DEFAULT_BUFFER,
};

static FILE: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("append", Bool),
        ParamSchema::optional("compress", Enum(&["gzip"])),
        ParamSchema::required("path", String),
    ],
    nested: &[PluginKind::Buffer],
    default_nested: DEFAULT_BUFFER,
};

static SYSLOG: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::required("host", String),
        ParamSchema::defaulted("port", Int, Literal("514")),
        ParamSchema::defaulted("transport", Enum(&["udp", "tcp", "tls"]), Literal("tcp")),
    ],
    nested: OUTPUT_TLS_NESTED,
    default_nested: DEFAULT_BUFFER,
};

static GREP: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::defaulted("exclude", Bool, Literal("false")),
        ParamSchema::defaulted("key", RecordKey, LogKey),
        ParamSchema::required("pattern", String),
    ],
    nested: &[],
    default_nested: &[],
};

static RECORD_TRANSFORMER: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("records", RecordMap),
        ParamSchema::optional("remove_keys", List),
    ],
    nested: &[],
    default_nested: &[],
};

static PARSER: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("expression", String),
        ParamSchema::required(
            "format",
            Enum(&["json", "regexp", "apache2", "nginx", "syslog", "none"]),
        ),
        ParamSchema::defaulted("key_name", RecordKey, LogKey),
        ParamSchema::optional("remove_key_name_field", Bool),
        ParamSchema::optional("reserve_data", Bool),
    ],
    nested: &[],
    default_nested: &[],
};

static DEDOT: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("de_dot_nested", Bool),
        ParamSchema::defaulted("de_dot_separator", String, Literal("_")),
    ],
    nested: &[],
    default_nested: &[],
};

static BUFFER: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::defaulted("type", Enum(&["file", "memory"]), Literal("file")),
        ParamSchema::defaulted("chunk_keys", List, Literal("tag,time")),
        ParamSchema::defaulted("chunk_limit_size", Size, Literal("8MB")),
        ParamSchema::optional("flush_interval", Duration),
        ParamSchema::optional(
            "flush_mode",
            Enum(&["default", "lazy", "interval", "immediate"]),
        ),
        ParamSchema::defaulted("path", String, BufferPath),
        ParamSchema::defaulted("retry_forever", Bool, Literal("true")),
        ParamSchema::optional("timekey", Duration),
        ParamSchema::optional("timekey_use_utc", Bool),
        ParamSchema::optional("timekey_wait", Duration),
        ParamSchema::optional("total_limit_size", Size),
    ],
    nested: &[],
    default_nested: &[],
};

static RETRY: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("max_times", Int),
        ParamSchema::optional("wait", Duration),
    ],
    nested: &[],
    default_nested: &[],
};

static TLS: PluginSchema = PluginSchema {
    params: &[
        ParamSchema::optional("ca_cert", PATH_SECRET),
        ParamSchema::optional("cert", PATH_SECRET),
        ParamSchema::optional("key", PATH_SECRET),
        ParamSchema::defaulted("verify", Bool, Literal("true")),
    ],
    nested: &[],
    default_nested: &[],
};

impl PluginKind {
    /// The static schema of this kind
    pub fn schema(&self) -> &'static PluginSchema {
        match self {
            Self::Gcs => &GCS,
            Self::S3 => &S3,
            Self::Http => &HTTP,
            Self::Forward => &FORWARD,
            Self::Loki => &LOKI,
            Self::File => &FILE,
            Self::Syslog => &SYSLOG,
            Self::Grep => &GREP,
            Self::RecordTransformer => &RECORD_TRANSFORMER,
            Self::Parser => &PARSER,
            Self::Dedot => &DEDOT,
            Self::Buffer => &BUFFER,
            Self::Retry => &RETRY,
            Self::Tls => &TLS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::PluginRole;

    #[test]
    fn parameter_names_are_unique_per_schema() {
        for kind in PluginKind::ALL {
            let params = kind.schema().params;
            for (i, p) in params.iter().enumerate() {
                assert!(
                    params[i + 1..].iter().all(|q| q.name != p.name),
                    "{kind} declares {} twice",
                    p.name
                );
            }
        }
    }

    #[test]
    fn only_sinks_declare_nested_kinds() {
        for kind in PluginKind::ALL {
            let schema = kind.schema();
            if kind.role() != PluginRole::Sink {
                assert!(schema.nested.is_empty(), "{kind}");
            }
            for nested in schema.nested.iter().chain(schema.default_nested) {
                assert_eq!(nested.role(), PluginRole::Nested);
            }
            for default in schema.default_nested {
                assert!(schema.nested.contains(default));
            }
        }
    }

    #[test]
    fn required_parameters_have_no_default() {
        for kind in PluginKind::ALL {
            for p in kind.schema().params {
                assert!(!(p.required && p.default.is_some()), "{kind}.{}", p.name);
            }
        }
    }

    #[test]
    fn lookup_by_name() {
        let schema = PluginKind::Tls.schema();
        assert_eq!(
            schema.param("ca_cert").map(|p| p.kind),
            Some(ParamKind::Secret { accepts_path: true })
        );
        assert!(schema.param("nope").is_none());
    }
}
