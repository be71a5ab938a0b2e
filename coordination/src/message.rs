//! Bus messages exchanged between the coordinator and the worker agents.
//!
//! A [`Message`] is an immutable value: a correlation id tying it to one
//! case, the retry round that produced it, and a typed [`Payload`]. Replies
//! are built with [`Message::reply`], which copies the correlation id and
//! attempt of the request so the coordinator can match them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::voting::Ballot;

/// Identifies one case's end-to-end run across every hop on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Sequential id in the `cid-0001` form used for batch runs.
    pub fn for_index(index: usize) -> Self {
        Self(format!("cid-{index:04}"))
    }

    /// Random id for ad-hoc cases.
    pub fn generate() -> Self {
        Self(format!("cid-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for CorrelationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The closed set of message types carried on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Coordinator → Analyst: source code to diagnose.
    AnalyzeCode,
    /// Analyst → Coordinator, then Coordinator → Fixer: free-form diagnosis.
    BugReport,
    /// Fixer → Coordinator, then Coordinator → Controller.
    FixCandidates,
    /// Controller → Coordinator: the approved subset plus the ballots.
    ApprovedFixes,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnalyzeCode => "analyze_code",
            Self::BugReport => "bug_report",
            Self::FixCandidates => "fix_candidates",
            Self::ApprovedFixes => "approved_fixes",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message body. The variant determines the [`MessageKind`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    AnalyzeCode {
        code: String,
    },
    BugReport {
        report: String,
    },
    FixCandidates {
        candidates: Vec<String>,
    },
    ApprovedFixes {
        approved: Vec<String>,
        /// One ballot per reviewed candidate, in candidate order.
        ballots: Vec<Ballot>,
    },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::AnalyzeCode { .. } => MessageKind::AnalyzeCode,
            Self::BugReport { .. } => MessageKind::BugReport,
            Self::FixCandidates { .. } => MessageKind::FixCandidates,
            Self::ApprovedFixes { .. } => MessageKind::ApprovedFixes,
        }
    }
}

/// Immutable envelope body routed between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub correlation_id: CorrelationId,
    /// Retry round that produced this message (0 for the first round).
    pub attempt: u32,
    pub payload: Payload,
}

impl Message {
    pub fn new(correlation_id: CorrelationId, attempt: u32, payload: Payload) -> Self {
        Self {
            correlation_id,
            attempt,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Build a reply carrying this message's correlation id and attempt.
    pub fn reply(&self, payload: Payload) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            attempt: self.attempt,
            payload,
        }
    }

    /// The key a parked waiter for this message would be registered under.
    pub fn key(&self) -> ReplyKey {
        ReplyKey {
            correlation_id: self.correlation_id.clone(),
            kind: self.kind(),
            attempt: self.attempt,
        }
    }
}

/// Typed, correlated expectation a coordinator parks on its mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplyKey {
    pub correlation_id: CorrelationId,
    pub kind: MessageKind,
    pub attempt: u32,
}

impl ReplyKey {
    pub fn new(correlation_id: CorrelationId, kind: MessageKind, attempt: u32) -> Self {
        Self {
            correlation_id,
            kind,
            attempt,
        }
    }
}

impl fmt::Display for ReplyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.correlation_id, self.kind, self.attempt)
    }
}
