//! Validated plugin instances

use std::collections::BTreeMap;

use logroute_common::crd::PluginSpec;
use serde_json::Value;
use tracing::trace;

use crate::error::PluginError;
use crate::kind::{PluginKind, PluginRole};
use crate::schema::{ParamDefault, ParamKind, ParamSchema};
use crate::value::{coerce, ParamValue, SecretParam};

/// One validated parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    /// Parameter name
    pub name: &'static str,
    /// Parameter kind from the schema
    pub kind: ParamKind,
    /// Coerced value
    pub value: ParamValue,
}

/// A validated nested sub-directive (buffer, retry, tls)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NestedInstance {
    /// Nested kind
    pub kind: PluginKind,
    /// Parameters in schema order
    pub params: Vec<Param>,
}

/// A validated plugin: kind, id, parameters and nested directives, all in schema order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PluginInstance {
    /// Plugin kind
    pub kind: PluginKind,
    /// Identifier of the owning directive
    pub id: String,
    /// Parameters in schema order
    pub params: Vec<Param>,
    /// Nested directives in schema order
    pub nested: Vec<NestedInstance>,
}

impl PluginInstance {
    /// Value of a parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        find_param(&self.params, name)
    }

    /// Nested directive of the given kind
    pub fn nested(&self, kind: PluginKind) -> Option<&NestedInstance> {
        self.nested.iter().find(|n| n.kind == kind)
    }

    /// Every secret-kind parameter, including those of nested directives
    pub fn secret_params_mut(&mut self) -> impl Iterator<Item = &mut Param> {
        self.params
            .iter_mut()
            .chain(self.nested.iter_mut().flat_map(|n| n.params.iter_mut()))
            .filter(|p| matches!(p.value, ParamValue::Secret(_)))
    }

    /// Whether any secret reference is still unresolved
    pub fn has_unresolved_secrets(&self) -> bool {
        self.params
            .iter()
            .chain(self.nested.iter().flat_map(|n| n.params.iter()))
            .any(|p| matches!(p.value, ParamValue::Secret(SecretParam::Reference(_))))
    }
}

impl NestedInstance {
    /// Value of a parameter by name
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        find_param(&self.params, name)
    }
}

fn find_param<'a>(params: &'a [Param], name: &str) -> Option<&'a ParamValue> {
    params.iter().find(|p| p.name == name).map(|p| &p.value)
}

/// Pipeline-level inputs that some defaults depend on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationContext {
    /// Record key holding the log line
    pub log_key: String,
    /// Directory file buffers are placed under
    pub buffer_root: String,
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self {
            log_key: "message".to_string(),
            buffer_root: "/buffers".to_string(),
        }
    }
}

/// Result of validating one plugin declaration
///
/// `instance` is absent only when the type tag is unknown; every other problem
/// leaves a complete instance with the offending parameter omitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validated {
    /// The validated instance
    pub instance: Option<PluginInstance>,
    /// Problems found
    pub problems: Vec<PluginError>,
}

impl Validated {
    /// Whether validation found no problems
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty() && self.instance.is_some()
    }
}

/// Validate a raw plugin declaration of the expected role
pub fn validate(
    spec: &PluginSpec,
    role: PluginRole,
    id: &str,
    ctx: &ValidationContext,
) -> Validated {
    let kind = match spec.type_.parse::<PluginKind>() {
        Ok(kind) if kind.role() == role => kind,
        _ => {
            return Validated {
                instance: None,
                problems: vec![PluginError::UnknownPluginType {
                    type_tag: spec.type_.clone(),
                    role,
                }],
            }
        }
    };

    let mut problems = Vec::new();
    let params = validate_params(kind, &spec.params, id, ctx, &mut problems);

    let schema = kind.schema();
    for name in spec.nested.keys() {
        let permitted = name
            .parse::<PluginKind>()
            .is_ok_and(|n| schema.nested.contains(&n));
        if !permitted {
            problems.push(PluginError::UnsupportedNested {
                plugin: kind.type_tag().to_string(),
                nested: name.clone(),
            });
        }
    }

    let empty = BTreeMap::new();
    let nested = schema
        .nested
        .iter()
        .filter_map(|nested_kind| {
            let raw = spec.nested.get(nested_kind.type_tag());
            if raw.is_none() && !schema.default_nested.contains(nested_kind) {
                return None;
            }
            let raw = raw.unwrap_or(&empty);
            Some(NestedInstance {
                kind: *nested_kind,
                params: validate_params(*nested_kind, raw, id, ctx, &mut problems),
            })
        })
        .collect();

    trace!(plugin = %kind, id, problems = problems.len(), "validated plugin");

    Validated {
        instance: Some(PluginInstance {
            kind,
            id: id.to_string(),
            params,
            nested,
        }),
        problems,
    }
}

fn validate_params(
    kind: PluginKind,
    raw: &BTreeMap<String, Value>,
    id: &str,
    ctx: &ValidationContext,
    problems: &mut Vec<PluginError>,
) -> Vec<Param> {
    let schema = kind.schema();
    let tag = kind.type_tag();

    for name in raw.keys() {
        if schema.param(name).is_none() {
            problems.push(PluginError::unknown_param(tag, name));
        }
    }

    let mut params = Vec::with_capacity(schema.params.len());
    for param in schema.params {
        let value = match raw.get(param.name) {
            Some(value) => Some(value.clone()),
            None => default_value(param, id, ctx),
        };

        let Some(value) = value else {
            if param.required {
                problems.push(PluginError::missing(tag, param.name));
            }
            continue;
        };

        match coerce(param.kind, &value) {
            Ok(value) => params.push(Param {
                name: param.name,
                kind: param.kind,
                value,
            }),
            Err(message) => problems.push(PluginError::invalid(tag, param.name, message)),
        }
    }
    params
}

fn default_value(param: &ParamSchema, id: &str, ctx: &ValidationContext) -> Option<Value> {
    param.default.map(|default| match default {
        ParamDefault::Literal(text) => Value::String(text.to_string()),
        ParamDefault::LogKey => Value::String(ctx.log_key.clone()),
        ParamDefault::BufferPath => Value::String(format!(
            "{}/{}.*.buffer",
            ctx.buffer_root.trim_end_matches('/'),
            id
        )),
    })
}
