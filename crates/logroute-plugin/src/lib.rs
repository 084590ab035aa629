//! Plugin type system for logroute
//!
//! Every sink, filter and nested sub-directive is one variant of the closed
//! [`PluginKind`] enum. Each kind carries a `const` [`PluginSchema`] describing
//! its parameters, their coercions and defaults, and the nested kinds it may
//! declare. [`validate`] turns a raw [`PluginSpec`](logroute_common::crd::PluginSpec)
//! into a [`PluginInstance`] plus the problems found on the way.

#![deny(missing_docs)]

pub mod error;
pub mod instance;
pub mod kind;
pub mod schema;
pub mod value;

pub use error::PluginError;
pub use instance::{validate, NestedInstance, Param, PluginInstance, Validated, ValidationContext};
pub use kind::{PluginKind, PluginRole};
pub use schema::{ParamDefault, ParamKind, ParamSchema, PluginSchema};
pub use value::{check_record_key, ParamValue, SecretParam};
