//! Long-running worker agents: Analyst, Fixer and the Voting Controller.
//!
//! Each agent owns one [`Mailbox`] and runs [`run_worker`]: receive the next
//! message, make exactly one collaborator call, reply to the sender. Errors
//! and panics inside a handler are logged and the loop keeps going; the
//! coordinator sees a missing reply and its step times out.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collaborators::{CodeAnalyzer, CollaboratorError, FixSuggester};
use crate::mailbox::Mailbox;
use crate::message::{Message, Payload};
use crate::metrics::Metrics;
use crate::voting::{self, ReviewPanel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Analyst,
    Fixer,
    Controller,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::Fixer => "fixer",
            Self::Controller => "controller",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message handler driven by [`run_worker`].
#[async_trait]
pub trait Agent: Send + 'static {
    fn role(&self) -> Role;

    /// Handle one message. `Ok(None)` means nothing to reply.
    async fn handle(
        &mut self,
        message: &Message,
        metrics: &Metrics,
    ) -> Result<Option<Payload>, CollaboratorError>;
}

/// Receive loop. Returns only when `cancel` fires.
///
/// Cancellation is checked while waiting for the next message, never in the
/// middle of handling one.
pub async fn run_worker<A: Agent>(mut agent: A, mailbox: Arc<Mailbox>, cancel: CancellationToken) {
    let role = agent.role();
    let address = mailbox.address();
    info!(agent = %role, "Agent started");

    loop {
        let envelope = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            received = mailbox.receive(None, None) => match received {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(agent = %role, error = %e, "Receive failed");
                    continue;
                }
            },
        };

        let message = &envelope.message;
        debug!(
            agent = %role,
            correlation_id = %message.correlation_id,
            kind = %message.kind(),
            attempt = message.attempt,
            "recv"
        );

        let handled = AssertUnwindSafe(agent.handle(message, &envelope.metrics))
            .catch_unwind()
            .await;
        match handled {
            Ok(Ok(Some(payload))) => {
                envelope
                    .reply_to
                    .send(message.reply(payload), &address, &envelope.metrics);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                warn!(
                    agent = %role,
                    correlation_id = %message.correlation_id,
                    error = %e,
                    "Collaborator failed, no reply sent"
                );
            }
            Err(_) => {
                error!(
                    agent = %role,
                    correlation_id = %message.correlation_id,
                    "Handler panicked, no reply sent"
                );
            }
        }
    }

    info!(agent = %role, "Agent stopped");
}

fn ignored(role: Role, message: &Message) -> Result<Option<Payload>, CollaboratorError> {
    debug!(agent = %role, kind = %message.kind(), "Ignoring unexpected message");
    Ok(None)
}

/// `analyze_code → bug_report`.
pub struct Analyst {
    analyzer: Arc<dyn CodeAnalyzer>,
}

impl Analyst {
    pub fn new(analyzer: Arc<dyn CodeAnalyzer>) -> Self {
        Self { analyzer }
    }
}

#[async_trait]
impl Agent for Analyst {
    fn role(&self) -> Role {
        Role::Analyst
    }

    async fn handle(
        &mut self,
        message: &Message,
        _metrics: &Metrics,
    ) -> Result<Option<Payload>, CollaboratorError> {
        match &message.payload {
            Payload::AnalyzeCode { code } => {
                let report = self.analyzer.find_issues(code).await?;
                Ok(Some(Payload::BugReport { report }))
            }
            _ => ignored(self.role(), message),
        }
    }
}

/// `bug_report → fix_candidates`.
pub struct Fixer {
    suggester: Arc<dyn FixSuggester>,
    max_candidates: Option<usize>,
}

impl Fixer {
    pub fn new(suggester: Arc<dyn FixSuggester>, max_candidates: Option<usize>) -> Self {
        Self {
            suggester,
            max_candidates,
        }
    }
}

#[async_trait]
impl Agent for Fixer {
    fn role(&self) -> Role {
        Role::Fixer
    }

    async fn handle(
        &mut self,
        message: &Message,
        metrics: &Metrics,
    ) -> Result<Option<Payload>, CollaboratorError> {
        match &message.payload {
            Payload::BugReport { report } => {
                let mut candidates = self.suggester.suggest_fixes(report).await?;
                if let Some(limit) = self.max_candidates {
                    candidates.truncate(limit);
                }
                metrics.add_candidates(candidates.len());
                Ok(Some(Payload::FixCandidates { candidates }))
            }
            _ => ignored(self.role(), message),
        }
    }
}

/// `fix_candidates → approved_fixes`. Owns the system's vote RNG.
pub struct VotingController {
    panel: ReviewPanel,
}

impl VotingController {
    pub fn new(panel: ReviewPanel) -> Self {
        Self { panel }
    }
}

#[async_trait]
impl Agent for VotingController {
    fn role(&self) -> Role {
        Role::Controller
    }

    async fn handle(
        &mut self,
        message: &Message,
        metrics: &Metrics,
    ) -> Result<Option<Payload>, CollaboratorError> {
        match &message.payload {
            Payload::FixCandidates { candidates } => {
                let ballots = self.panel.vote(candidates, metrics).await;
                let approved = voting::approved(&ballots);
                Ok(Some(Payload::ApprovedFixes { approved, ballots }))
            }
            _ => ignored(self.role(), message),
        }
    }
}
