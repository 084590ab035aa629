//! logroute compiler
//!
//! Reads a consistent [`Snapshot`] of logging objects, validates every plugin,
//! resolves Flow → Sink references under the LogRoute visibility rules,
//! injects secrets, builds a backend-neutral [`DirectiveTree`] and renders it
//! for fluentd or syslog-ng. Problems attach to the resource that caused them;
//! a broken resource is left out while everything else still renders.

#![deny(missing_docs)]

pub mod catalog;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod render;
pub mod repository;
pub mod resolver;
pub mod secrets;
pub mod source;
pub mod validation;

#[cfg(test)]
mod fixtures;

pub use catalog::PluginCatalog;
pub use error::{CompileError, Problem, ProblemCategory, ProblemLedger};
pub use model::DirectiveTree;
pub use pipeline::{
    compile_snapshot, config_hash, CompileContext, CompiledPipeline, Compiler,
    WARN_FLOW_CONFIG_OVERRIDE,
};
pub use render::{FluentdRenderer, Renderer, SyslogNgRenderer};
pub use repository::{Repository, Snapshot};
pub use resolver::{resolve, RoutingGraph};
pub use secrets::{InjectionMode, MountBinding, SecretInjector, SecretReference};
pub use source::{KubeResourceSource, ManifestSource, NamespaceInfo, ResourceSource};
pub use validation::{
    evaluate_snapshot, KubeStatusWriter, StatusWriter, ValidationReconciler, ValidationReport,
};
