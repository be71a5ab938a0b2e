//! Bus-side implementation of the repair steps.
//!
//! The coordinator owns one mailbox shared by every case it drives. Each
//! step sends a request to a worker and parks a keyed expectation for the
//! reply, so concurrent cases and stale rounds never see each other's
//! messages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::case::{Approach, Case, CaseOutcome};
use crate::collaborators::{PatchApplier, TestOracle};
use crate::errors::StepError;
use crate::mailbox::{Address, Mailbox, MailboxError};
use crate::message::{Message, MessageKind, Payload, ReplyKey};
use crate::metrics::Metrics;
use crate::pipeline::{drive_case, RepairSteps};
use crate::voting::Ballot;

/// Addresses of the three worker agents.
#[derive(Debug, Clone)]
pub struct Workers {
    pub analyst: Address,
    pub fixer: Address,
    pub controller: Address,
}

pub struct Coordinator {
    mailbox: Arc<Mailbox>,
    address: Address,
    workers: Workers,
    patcher: Arc<dyn PatchApplier>,
    oracle: Arc<dyn TestOracle>,
    step_timeout: Duration,
    max_retries: u32,
}

impl Coordinator {
    pub fn new(
        workers: Workers,
        patcher: Arc<dyn PatchApplier>,
        oracle: Arc<dyn TestOracle>,
        step_timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let mailbox = Mailbox::new("coordinator");
        let address = mailbox.address();
        Self {
            mailbox,
            address,
            workers,
            patcher,
            oracle,
            step_timeout,
            max_retries,
        }
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Drive `case` to a terminal state with fresh per-case metrics.
    pub async fn run_case(&self, case: &Case) -> CaseOutcome {
        let metrics = Arc::new(Metrics::new());
        let outcome = drive_case(
            self,
            self.patcher.as_ref(),
            self.oracle.as_ref(),
            case,
            self.max_retries,
            metrics,
        )
        .await;

        let dropped = self.mailbox.purge(&case.correlation_id);
        if dropped > 0 {
            debug!(correlation_id = %case.correlation_id, dropped, "Purged late replies");
        }
        outcome
    }

    /// Send `payload` to `to` and wait for the correlated reply of kind `expected`.
    async fn request(
        &self,
        to: &Address,
        case: &Case,
        attempt: u32,
        payload: Payload,
        expected: MessageKind,
        metrics: &Arc<Metrics>,
    ) -> Result<Payload, StepError> {
        let key = ReplyKey::new(case.correlation_id.clone(), expected, attempt);
        to.send(
            Message::new(case.correlation_id.clone(), attempt, payload),
            &self.address,
            metrics,
        );

        match self.mailbox.expect(key, self.step_timeout, metrics).await {
            Ok(envelope) => Ok(envelope.message.payload),
            Err(MailboxError::Timeout { timeout_ms, .. }) => Err(StepError::Timeout {
                kind: expected,
                timeout_ms,
            }),
            Err(e) => Err(StepError::Unavailable {
                kind: expected,
                message: e.to_string(),
            }),
        }
    }
}

fn unexpected(expected: MessageKind, got: &Payload) -> StepError {
    StepError::Unavailable {
        kind: expected,
        message: format!("expected {expected}, got {}", got.kind()),
    }
}

#[async_trait]
impl RepairSteps for Coordinator {
    fn approach(&self) -> Approach {
        Approach::Async
    }

    async fn analyze(&self, case: &Case, metrics: &Arc<Metrics>) -> Result<String, StepError> {
        let payload = Payload::AnalyzeCode {
            code: case.code.clone(),
        };
        match self
            .request(&self.workers.analyst, case, 0, payload, MessageKind::BugReport, metrics)
            .await?
        {
            Payload::BugReport { report } => Ok(report),
            other => Err(unexpected(MessageKind::BugReport, &other)),
        }
    }

    async fn propose(
        &self,
        case: &Case,
        report: &str,
        attempt: u32,
        metrics: &Arc<Metrics>,
    ) -> Result<Vec<String>, StepError> {
        let payload = Payload::BugReport {
            report: report.to_string(),
        };
        match self
            .request(
                &self.workers.fixer,
                case,
                attempt,
                payload,
                MessageKind::FixCandidates,
                metrics,
            )
            .await?
        {
            Payload::FixCandidates { candidates } => Ok(candidates),
            other => Err(unexpected(MessageKind::FixCandidates, &other)),
        }
    }

    async fn review(
        &self,
        case: &Case,
        candidates: &[String],
        attempt: u32,
        metrics: &Arc<Metrics>,
    ) -> Result<Vec<Ballot>, StepError> {
        let payload = Payload::FixCandidates {
            candidates: candidates.to_vec(),
        };
        match self
            .request(
                &self.workers.controller,
                case,
                attempt,
                payload,
                MessageKind::ApprovedFixes,
                metrics,
            )
            .await?
        {
            Payload::ApprovedFixes { ballots, .. } => Ok(ballots),
            other => Err(unexpected(MessageKind::ApprovedFixes, &other)),
        }
    }
}
