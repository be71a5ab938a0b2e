//! Trait seams for the external collaborators the pipeline consumes.
//!
//! The orchestrators never know whether a collaborator is a heuristic, a
//! remote model or a sandboxed interpreter. Every seam is object safe and
//! shared as `Arc<dyn _>` through a [`Toolkit`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::voting::Verdict;

/// Failure of a collaborator call. Never crashes a worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("malformed collaborator response: {0}")]
    Malformed(String),
}

/// Produces a free-form diagnosis of the source code.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeAnalyzer: Send + Sync {
    async fn find_issues(&self, code: &str) -> Result<String, CollaboratorError>;
}

/// Proposes up to five candidate fixes for a diagnosis.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FixSuggester: Send + Sync {
    async fn suggest_fixes(&self, report: &str) -> Result<Vec<String>, CollaboratorError>;
}

/// Casts one vote on a candidate. `seed` is the per-call randomness source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FixReviewer: Send + Sync {
    async fn review_fix(&self, candidate: &str, seed: u64) -> Result<Verdict, CollaboratorError>;
}

/// Best-effort application of a textual fix. May return the code unchanged.
#[cfg_attr(test, mockall::automock)]
pub trait PatchApplier: Send + Sync {
    fn apply_patch(&self, code: &str, fix: &str) -> String;
}

/// Outcome of running a bug's tests against patched code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: bool,
    pub log: String,
}

impl TestReport {
    pub fn pass(log: impl Into<String>) -> Self {
        Self {
            passed: true,
            log: log.into(),
        }
    }

    pub fn fail(log: impl Into<String>) -> Self {
        Self {
            passed: false,
            log: log.into(),
        }
    }
}

/// Runs the tests for `bug_id` against `code`.
///
/// Implementations that execute untrusted code must isolate it in a
/// subprocess with a wall-clock timeout.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TestOracle: Send + Sync {
    async fn run_tests(&self, code: &str, bug_id: u32) -> TestReport;
}

/// The five collaborators a repair run needs.
#[derive(Clone)]
pub struct Toolkit {
    pub analyzer: Arc<dyn CodeAnalyzer>,
    pub suggester: Arc<dyn FixSuggester>,
    pub reviewer: Arc<dyn FixReviewer>,
    pub patcher: Arc<dyn PatchApplier>,
    pub oracle: Arc<dyn TestOracle>,
}

impl Toolkit {
    pub fn new(
        analyzer: Arc<dyn CodeAnalyzer>,
        suggester: Arc<dyn FixSuggester>,
        reviewer: Arc<dyn FixReviewer>,
        patcher: Arc<dyn PatchApplier>,
        oracle: Arc<dyn TestOracle>,
    ) -> Self {
        Self {
            analyzer,
            suggester,
            reviewer,
            patcher,
            oracle,
        }
    }
}

impl fmt::Debug for Toolkit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Toolkit").finish_non_exhaustive()
    }
}
