//! Linear orchestrator: the same control loop with direct collaborator calls.
//!
//! No mailboxes and no workers. Each step is a single awaited call bounded
//! by the step timeout. Candidates are shuffled with a seeded RNG before
//! truncation so a run is reproducible for a given seed.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::case::{Approach, Case, CaseOutcome};
use crate::collaborators::{CollaboratorError, Toolkit};
use crate::config::{ConfigError, RunConfig};
use crate::errors::StepError;
use crate::message::MessageKind;
use crate::metrics::Metrics;
use crate::pipeline::{drive_case, RepairSteps};
use crate::voting::{Ballot, ReviewPanel};

pub struct LinearOrchestrator {
    toolkit: Toolkit,
    panel: tokio::sync::Mutex<ReviewPanel>,
    shuffle: Mutex<StdRng>,
    step_timeout: Duration,
    max_retries: u32,
    max_candidates: Option<usize>,
}

impl LinearOrchestrator {
    pub fn new(toolkit: Toolkit, config: &RunConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let panel = ReviewPanel::new(toolkit.reviewer.clone(), config.n_reviewers, config.seed);
        Ok(Self {
            toolkit,
            panel: tokio::sync::Mutex::new(panel),
            // Separate stream so shuffling never shifts the vote seeds.
            shuffle: Mutex::new(StdRng::seed_from_u64(config.seed.wrapping_add(1))),
            step_timeout: config.step_timeout()?,
            max_retries: config.max_retries,
            max_candidates: config.max_candidates,
        })
    }

    pub async fn run_case(&self, case: &Case) -> CaseOutcome {
        drive_case(
            self,
            self.toolkit.patcher.as_ref(),
            self.toolkit.oracle.as_ref(),
            case,
            self.max_retries,
            Arc::new(Metrics::new()),
        )
        .await
    }

    /// Run cases one after another, in order.
    pub async fn run_cases(&self, cases: &[Case]) -> Vec<CaseOutcome> {
        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            outcomes.push(self.run_case(case).await);
        }
        outcomes
    }

    async fn bounded<T, F>(&self, kind: MessageKind, metrics: &Metrics, call: F) -> Result<T, StepError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        match tokio::time::timeout(self.step_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StepError::Unavailable {
                kind,
                message: e.to_string(),
            }),
            Err(_) => {
                metrics.record_timeout();
                Err(StepError::Timeout {
                    kind,
                    timeout_ms: self.step_timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl RepairSteps for LinearOrchestrator {
    fn approach(&self) -> Approach {
        Approach::Sync
    }

    async fn analyze(&self, case: &Case, metrics: &Arc<Metrics>) -> Result<String, StepError> {
        self.bounded(
            MessageKind::BugReport,
            metrics,
            self.toolkit.analyzer.find_issues(&case.code),
        )
        .await
    }

    async fn propose(
        &self,
        _case: &Case,
        report: &str,
        _attempt: u32,
        metrics: &Arc<Metrics>,
    ) -> Result<Vec<String>, StepError> {
        let mut candidates = self
            .bounded(
                MessageKind::FixCandidates,
                metrics,
                self.toolkit.suggester.suggest_fixes(report),
            )
            .await?;

        candidates.shuffle(&mut *self.shuffle.lock().unwrap_or_else(PoisonError::into_inner));
        if let Some(limit) = self.max_candidates {
            candidates.truncate(limit);
        }
        metrics.add_candidates(candidates.len());
        Ok(candidates)
    }

    async fn review(
        &self,
        _case: &Case,
        candidates: &[String],
        _attempt: u32,
        metrics: &Arc<Metrics>,
    ) -> Result<Vec<Ballot>, StepError> {
        let mut panel = self.panel.lock().await;
        let vote = async { Ok(panel.vote(candidates, metrics).await) };
        self.bounded(MessageKind::ApprovedFixes, metrics, vote).await
    }
}
