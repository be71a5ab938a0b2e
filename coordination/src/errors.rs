//! Step and round failure taxonomy.
//!
//! [`StepError`] is what a single orchestrator step returns. [`RoundFailure`]
//! is the serializable reason a retry round ended without a passing patch;
//! it is recorded on the round summary and never escapes `run_case`.

use serde::{Deserialize, Serialize};

use crate::message::MessageKind;

/// Failure of one orchestration step.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    /// No reply within the step timeout.
    #[error("step '{kind}' timed out after {timeout_ms}ms")]
    Timeout { kind: MessageKind, timeout_ms: u64 },

    /// The collaborator behind the step failed outright.
    #[error("step '{kind}' failed: {message}")]
    Unavailable { kind: MessageKind, message: String },
}

impl StepError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Timeout { kind, .. } | Self::Unavailable { kind, .. } => *kind,
        }
    }
}

/// Why a round ended without success. Every variant is recoverable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RoundFailure {
    StepTimeout { step: MessageKind, timeout_ms: u64 },
    StepUnavailable { step: MessageKind, message: String },
    EmptyCandidateSet,
    EmptyApprovalSet,
    /// Every approved fix was applied and failed the oracle.
    PatchVerificationFailure { attempted: usize },
}

impl From<StepError> for RoundFailure {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Timeout { kind, timeout_ms } => Self::StepTimeout {
                step: kind,
                timeout_ms,
            },
            StepError::Unavailable { kind, message } => Self::StepUnavailable {
                step: kind,
                message,
            },
        }
    }
}

impl std::fmt::Display for RoundFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StepTimeout { step, timeout_ms } => {
                write!(f, "{step} timed out after {timeout_ms}ms")
            }
            Self::StepUnavailable { step, message } => write!(f, "{step} failed: {message}"),
            Self::EmptyCandidateSet => write!(f, "no fix candidates"),
            Self::EmptyApprovalSet => write!(f, "no candidate approved"),
            Self::PatchVerificationFailure { attempted } => {
                write!(f, "all {attempted} approved fixes failed verification")
            }
        }
    }
}
