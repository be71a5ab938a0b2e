//! Repair Coordination Library
//!
//! Drives a bug-repair pipeline over one piece of source code:
//! *find issue → propose fixes → peer-review vote → apply → verify*.
//!
//! Two orchestrators share the same control loop ([`pipeline::drive_case`]):
//!
//! - **Agent bus** ([`AgentSystem`]): Analyst, Fixer and Voting Controller run
//!   as long-lived tokio tasks that talk only through [`Mailbox`]es. A
//!   [`Coordinator`] tracks each case by correlation id, parks keyed
//!   expectations for replies, enforces per-step timeouts and drives retry
//!   rounds. Many cases can share one worker pool.
//! - **Linear** ([`LinearOrchestrator`]): the same steps as direct awaited
//!   calls, each bounded by the step timeout.
//!
//! Collaborators (analyzer, suggester, reviewer, patcher, oracle) are
//! consumed through the traits in [`collaborators`].
//!
//! # Usage
//!
//! ```ignore
//! let system = AgentSystem::start(toolkit, &RunConfig::default())?;
//! let outcomes = system.run_cases(&cases).await;
//! system.shutdown().await;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agents;
pub mod case;
pub mod collaborators;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod linear;
pub mod mailbox;
pub mod message;
pub mod metrics;
pub mod pipeline;
pub mod state;
pub mod system;
pub mod voting;

// Re-export message and mailbox types
pub use mailbox::{Address, Envelope, Mailbox, MailboxError};
pub use message::{CorrelationId, Message, MessageKind, Payload, ReplyKey};

// Re-export agent types
pub use agents::{run_worker, Agent, Analyst, Fixer, Role, VotingController};
pub use voting::{approval_quorum, Ballot, ReviewPanel, Verdict};

// Re-export orchestration types
pub use coordinator::{Coordinator, Workers};
pub use linear::LinearOrchestrator;
pub use pipeline::{drive_case, RepairSteps};
pub use system::{run_case, AgentSystem};

// Re-export case and outcome types
pub use case::{Approach, Case, CaseOutcome, CaseStatus, PatchAttempt, RoundSummary};
pub use metrics::{Metrics, MetricsSnapshot};
pub use state::{CaseMachine, CaseState, IllegalTransition, TransitionRecord};

// Re-export collaborator seams
pub use collaborators::{
    CodeAnalyzer, CollaboratorError, FixReviewer, FixSuggester, PatchApplier, TestOracle,
    TestReport, Toolkit,
};

// Re-export config and error types
pub use config::{ConfigError, RunConfig};
pub use errors::{RoundFailure, StepError};
