//! Plugin validation errors

use thiserror::Error;

use crate::kind::PluginRole;

/// A single problem found while validating a plugin declaration
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    /// The type tag does not name a plugin of the expected role
    #[error("unknown {role} plugin type: {type_tag}")]
    UnknownPluginType {
        /// The type tag as written
        type_tag: String,
        /// Role the declaration was expected to have
        role: PluginRole,
    },

    /// A required parameter is absent
    #[error("{plugin}: missing required parameter {field}")]
    MissingParameter {
        /// Plugin (or nested directive) type tag
        plugin: String,
        /// Parameter name
        field: String,
    },

    /// A parameter not in the schema was supplied
    #[error("{plugin}: unknown parameter {field}")]
    UnknownParameter {
        /// Plugin (or nested directive) type tag
        plugin: String,
        /// Parameter name
        field: String,
    },

    /// A parameter value failed coercion
    #[error("{plugin}: invalid value for {field}: {message}")]
    InvalidValue {
        /// Plugin (or nested directive) type tag
        plugin: String,
        /// Parameter name
        field: String,
        /// What was wrong with the value
        message: String,
    },

    /// A nested directive kind is unknown or not permitted on this plugin
    #[error("{plugin}: nested directive {nested} is not supported")]
    UnsupportedNested {
        /// Owning plugin type tag
        plugin: String,
        /// Nested kind as written
        nested: String,
    },
}

impl PluginError {
    /// Create a missing-parameter error
    pub fn missing(plugin: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingParameter {
            plugin: plugin.into(),
            field: field.into(),
        }
    }

    /// Create an unknown-parameter error
    pub fn unknown_param(plugin: impl Into<String>, field: impl Into<String>) -> Self {
        Self::UnknownParameter {
            plugin: plugin.into(),
            field: field.into(),
        }
    }

    /// Create an invalid-value error
    pub fn invalid(
        plugin: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            plugin: plugin.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// The parameter this problem concerns, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::MissingParameter { field, .. }
            | Self::UnknownParameter { field, .. }
            | Self::InvalidValue { field, .. } => Some(field),
            Self::UnknownPluginType { .. } | Self::UnsupportedNested { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_field() {
        let err = PluginError::missing("gcs", "bucket");
        assert_eq!(err.to_string(), "gcs: missing required parameter bucket");
        assert_eq!(err.field(), Some("bucket"));

        let err = PluginError::UnknownPluginType {
            type_tag: "kafka2".to_string(),
            role: PluginRole::Sink,
        };
        assert_eq!(err.to_string(), "unknown sink plugin type: kafka2");
        assert_eq!(err.field(), None);
    }
}
