//! Pass-level errors and per-resource problems

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use logroute_common::crd::ResourceStatus;
use logroute_common::{Error, ResourceKey};

/// Failure that aborts a whole compilation pass
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The LogPipeline itself is misconfigured
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Reading the snapshot failed
    #[error("system error: {0}")]
    System(#[source] Error),
}

impl CompileError {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether retrying the pass without a configuration change may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration(_) => false,
            Self::System(e) => e.is_retryable(),
        }
    }
}

impl From<Error> for CompileError {
    fn from(e: Error) -> Self {
        match e {
            Error::Validation { .. } => Self::Configuration(e.to_string()),
            other => Self::System(other),
        }
    }
}

/// Stage that found a problem
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProblemCategory {
    /// Plugin or object validation
    Configuration,
    /// Sink reference resolution
    Resolution,
    /// Secret lookup
    Secret,
    /// Backend capability or rendering
    Render,
}

impl fmt::Display for ProblemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "ConfigurationError"),
            Self::Resolution => write!(f, "ResolutionError"),
            Self::Secret => write!(f, "SecretError"),
            Self::Render => write!(f, "UnsupportedFeature"),
        }
    }
}

/// A problem attached to one resource
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Problem {
    /// Stage that found the problem
    pub category: ProblemCategory,
    /// Human-readable description
    pub message: String,
}

impl Problem {
    /// Create a problem
    pub fn new(category: ProblemCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Configuration problem
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProblemCategory::Configuration, message)
    }

    /// Resolution problem
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::new(ProblemCategory::Resolution, message)
    }

    /// Secret problem
    pub fn secret(message: impl Into<String>) -> Self {
        Self::new(ProblemCategory::Secret, message)
    }

    /// Render problem
    pub fn render(message: impl Into<String>) -> Self {
        Self::new(ProblemCategory::Render, message)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category, self.message)
    }
}

/// Problems collected during one pass, keyed by owning resource
///
/// Every resource in the snapshot is registered up front so that each one
/// receives a status, including those with nothing to report.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProblemLedger {
    entries: BTreeMap<ResourceKey, Vec<Problem>>,
}

impl ProblemLedger {
    /// Make sure `key` receives a status
    pub fn register(&mut self, key: ResourceKey) {
        self.entries.entry(key).or_default();
    }

    /// Attach a problem, ignoring exact duplicates
    pub fn push(&mut self, key: ResourceKey, problem: Problem) {
        let problems = self.entries.entry(key).or_default();
        if !problems.contains(&problem) {
            problems.push(problem);
        }
    }

    /// Problems recorded for `key`
    pub fn problems(&self, key: &ResourceKey) -> &[Problem] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `key` has any problem
    pub fn has_problems(&self, key: &ResourceKey) -> bool {
        !self.problems(key).is_empty()
    }

    /// Total number of problems across all resources
    pub fn total(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Turn the ledger into statuses
    ///
    /// A resource is active when it has no problems and takes part in the
    /// rendered configuration.
    pub fn into_statuses(
        self,
        participants: &BTreeSet<ResourceKey>,
    ) -> BTreeMap<ResourceKey, ResourceStatus> {
        self.entries
            .into_iter()
            .map(|(key, problems)| {
                let active = problems.is_empty() && participants.contains(&key);
                let messages = problems.iter().map(ToString::to_string).collect();
                (key, ResourceStatus::new(active, messages))
            })
            .collect()
    }
}
