//! The shared find → fix → vote → apply → verify control loop.
//!
//! Both orchestrators implement [`RepairSteps`] (how a step is carried out:
//! over the bus or by direct call) and hand it to [`drive_case`], which owns
//! the state machine, the retry budget and the outcome record. Keeping the
//! loop in one place means the two approaches cannot drift apart.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, info_span, warn, Instrument};

use crate::case::{Approach, Case, CaseOutcome, CaseStatus, PatchAttempt, RoundSummary};
use crate::collaborators::{PatchApplier, TestOracle};
use crate::errors::{RoundFailure, StepError};
use crate::metrics::Metrics;
use crate::state::{CaseMachine, CaseState};
use crate::voting::Ballot;

/// How each remote step of a case is performed.
#[async_trait]
pub trait RepairSteps: Send + Sync {
    fn approach(&self) -> Approach;

    /// Diagnose the case's code.
    async fn analyze(&self, case: &Case, metrics: &Arc<Metrics>) -> Result<String, StepError>;

    /// Candidate fixes for `report`, tagged with `attempt`.
    async fn propose(
        &self,
        case: &Case,
        report: &str,
        attempt: u32,
        metrics: &Arc<Metrics>,
    ) -> Result<Vec<String>, StepError>;

    /// One ballot per candidate, in candidate order.
    async fn review(
        &self,
        case: &Case,
        candidates: &[String],
        attempt: u32,
        metrics: &Arc<Metrics>,
    ) -> Result<Vec<Ballot>, StepError>;
}

struct Passed {
    fix: String,
    patched_code: String,
    test_log: String,
}

fn transition(machine: &mut CaseMachine, to: CaseState, reason: &str) {
    if let Err(e) = machine.advance(to, Some(reason)) {
        error!(error = %e, "Rejected case transition");
    }
}

/// Run `case` to a terminal state. Never fails: the outcome carries the status.
pub async fn drive_case<S>(
    steps: &S,
    patcher: &dyn PatchApplier,
    oracle: &dyn TestOracle,
    case: &Case,
    max_retries: u32,
    metrics: Arc<Metrics>,
) -> CaseOutcome
where
    S: RepairSteps + ?Sized,
{
    let span = info_span!(
        "case",
        correlation_id = %case.correlation_id,
        bug_id = case.bug_id,
        approach = %steps.approach(),
    );
    drive(steps, patcher, oracle, case, max_retries, metrics)
        .instrument(span)
        .await
}

async fn drive<S>(
    steps: &S,
    patcher: &dyn PatchApplier,
    oracle: &dyn TestOracle,
    case: &Case,
    max_retries: u32,
    metrics: Arc<Metrics>,
) -> CaseOutcome
where
    S: RepairSteps + ?Sized,
{
    info!(max_retries, "Case started");
    let mut machine = CaseMachine::new();
    let mut outcome = Draft::new(steps.approach(), case);

    let report = match steps.analyze(case, &metrics).await {
        Ok(report) => report,
        Err(e) if e.is_timeout() => {
            warn!(error = %e, "Analysis timed out, abandoning case");
            transition(&mut machine, CaseState::TimedOut, "analysis timed out");
            return outcome.finish(CaseStatus::Timeout, machine, &metrics);
        }
        Err(e) => {
            warn!(error = %e, "Analysis failed, abandoning case");
            transition(&mut machine, CaseState::Failed, "analysis failed");
            return outcome.finish(CaseStatus::Failed, machine, &metrics);
        }
    };
    outcome.report = Some(report.clone());
    transition(&mut machine, CaseState::Fixing, "bug report received");

    for attempt in 0..=max_retries {
        if attempt > 0 {
            metrics.record_retry();
            machine.set_attempt(attempt);
            transition(&mut machine, CaseState::Fixing, "next round");
        }

        let mut round = RoundSummary::new(attempt);
        let result = run_round(
            steps,
            patcher,
            oracle,
            case,
            &report,
            &mut machine,
            &mut round,
            &metrics,
        )
        .await;

        match result {
            Ok(passed) => {
                info!(attempt, fix = %passed.fix, "Patch passed");
                outcome.rounds.push(round);
                outcome.chosen_fix = Some(passed.fix);
                outcome.patched_code = Some(passed.patched_code);
                outcome.test_log = Some(passed.test_log);
                transition(&mut machine, CaseState::Succeeded, "oracle passed");
                return outcome.finish(CaseStatus::Success, machine, &metrics);
            }
            Err(failure) => {
                warn!(attempt, reason = %failure, "Round failed");
                let reason = failure.to_string();
                round.failure = Some(failure);
                outcome.rounds.push(round);
                if attempt < max_retries {
                    transition(&mut machine, CaseState::Retrying, &reason);
                }
            }
        }
    }

    transition(&mut machine, CaseState::Failed, "retry budget exhausted");
    outcome.finish(CaseStatus::Failed, machine, &metrics)
}

#[allow(clippy::too_many_arguments)]
async fn run_round<S>(
    steps: &S,
    patcher: &dyn PatchApplier,
    oracle: &dyn TestOracle,
    case: &Case,
    report: &str,
    machine: &mut CaseMachine,
    round: &mut RoundSummary,
    metrics: &Arc<Metrics>,
) -> Result<Passed, RoundFailure>
where
    S: RepairSteps + ?Sized,
{
    let attempt = round.attempt;

    round.candidates = steps.propose(case, report, attempt, metrics).await?;
    if round.candidates.is_empty() {
        return Err(RoundFailure::EmptyCandidateSet);
    }
    transition(machine, CaseState::Reviewing, "candidates received");

    round.ballots = steps
        .review(case, &round.candidates, attempt, metrics)
        .await?;
    let approved = round.approved();
    if approved.is_empty() {
        return Err(RoundFailure::EmptyApprovalSet);
    }
    transition(machine, CaseState::Testing, "fixes approved");

    for fix in approved {
        let patched_code = patcher.apply_patch(&case.code, &fix);
        let report = oracle.run_tests(&patched_code, case.bug_id).await;
        round.patches.push(PatchAttempt {
            fix: fix.clone(),
            passed: report.passed,
        });
        if report.passed {
            metrics.record_patch_success();
            return Ok(Passed {
                fix,
                patched_code,
                test_log: report.log,
            });
        }
        metrics.record_patch_failure();
    }

    Err(RoundFailure::PatchVerificationFailure {
        attempted: round.patches.len(),
    })
}

/// Outcome fields accumulated while the case runs.
struct Draft {
    approach: Approach,
    case: Case,
    report: Option<String>,
    chosen_fix: Option<String>,
    patched_code: Option<String>,
    test_log: Option<String>,
    rounds: Vec<RoundSummary>,
}

impl Draft {
    fn new(approach: Approach, case: &Case) -> Self {
        Self {
            approach,
            case: case.clone(),
            report: None,
            chosen_fix: None,
            patched_code: None,
            test_log: None,
            rounds: Vec::new(),
        }
    }

    fn finish(self, status: CaseStatus, machine: CaseMachine, metrics: &Metrics) -> CaseOutcome {
        metrics.finish();
        let snapshot = metrics.snapshot();
        info!(
            %status,
            rounds = self.rounds.len(),
            retries = snapshot.retries_used,
            elapsed_s = snapshot.execution_time_seconds,
            "Case finished"
        );
        CaseOutcome {
            status,
            approach: self.approach,
            correlation_id: self.case.correlation_id,
            bug_id: self.case.bug_id,
            report: self.report,
            chosen_fix: self.chosen_fix,
            patched_code: self.patched_code,
            test_log: self.test_log,
            rounds: self.rounds,
            transitions: machine.into_transitions(),
            metrics: snapshot,
            finished_at: Utc::now(),
        }
    }
}
