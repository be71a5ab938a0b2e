//! Case input and the terminal outcome record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RoundFailure;
use crate::message::CorrelationId;
use crate::metrics::MetricsSnapshot;
use crate::state::TransitionRecord;
use crate::voting::Ballot;

/// One piece of buggy source code to repair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    /// Selects the test oracle.
    pub bug_id: u32,
    pub code: String,
    pub correlation_id: CorrelationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Case {
    pub fn new(bug_id: u32, code: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            bug_id,
            code: code.into(),
            correlation_id,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Success,
    Failed,
    Timeout,
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Which orchestrator produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Approach {
    Sync,
    Async,
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
        }
    }
}

/// One applied-and-tested fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchAttempt {
    pub fix: String,
    pub passed: bool,
}

/// Diagnostics for one retry round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub attempt: u32,
    pub candidates: Vec<String>,
    /// Verdicts per candidate, kept for diagnostics only.
    pub ballots: Vec<Ballot>,
    pub patches: Vec<PatchAttempt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RoundFailure>,
}

impl RoundSummary {
    pub fn new(attempt: u32) -> Self {
        Self {
            attempt,
            ..Default::default()
        }
    }

    pub fn approved(&self) -> Vec<String> {
        crate::voting::approved(&self.ballots)
    }
}

/// Terminal record of a case run. `run_case` always yields one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub status: CaseStatus,
    pub approach: Approach,
    pub correlation_id: CorrelationId,
    pub bug_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_fix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patched_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_log: Option<String>,
    pub rounds: Vec<RoundSummary>,
    pub transitions: Vec<TransitionRecord>,
    pub metrics: MetricsSnapshot,
    pub finished_at: DateTime<Utc>,
}

impl CaseOutcome {
    pub fn is_success(&self) -> bool {
        self.status == CaseStatus::Success
    }
}
