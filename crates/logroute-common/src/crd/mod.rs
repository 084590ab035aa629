//! Custom Resource Definitions for logroute
//!
//! This module contains all CRD definitions read by the configuration compiler.

mod flow;
mod pipeline;
mod route;
mod selector;
mod sink;
mod types;

pub use flow::{
    ClusterFlow, ClusterFlowSpec, Flow, FlowDefinition, FlowSpec, MatchRule, Selector,
};
pub use pipeline::{
    BackendFamily, FluentdSpec, LogPipeline, LogPipelineSpec, LogPipelineStatus, SyslogNgSpec,
    CRI_COMPAT_LOG_KEY, DEFAULT_LOG_KEY,
};
pub use route::{LogRoute, LogRouteSpec, RouteEffect, RouteTarget, RouteTargetKind};
pub use selector::{LabelSelector, LabelSelectorOperator, LabelSelectorRequirement};
pub use sink::{ClusterSink, ClusterSinkSpec, Sink, SinkDefinition, SinkSpec};
pub use types::{
    Condition, ConditionStatus, PluginSpec, ResourceStatus, SecretKeySelector, SecretKeySource,
    SecretValueSource,
};
