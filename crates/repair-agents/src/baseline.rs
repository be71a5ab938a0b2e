//! Single-shot repair without review: diagnose, take the first suggested
//! fix, patch, test. The floor the orchestrated approaches are compared
//! against.

use repair_coordination::{Case, CollaboratorError, TestReport, Toolkit};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::oracle::truncate;
use crate::report::round_to;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineResult {
    pub bug_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Empty when the suggester produced nothing.
    pub fix: String,
    pub passed: bool,
    pub log: String,
    pub execution_time_seconds: f64,
}

pub async fn run_baseline(toolkit: &Toolkit, case: &Case) -> BaselineResult {
    let started = Instant::now();
    let (fix, passed, log) = match attempt(toolkit, case).await {
        Ok((fix, report)) => (fix, report.passed, report.log),
        Err(error) => (String::new(), false, format!("TEST FAILED: {error}")),
    };
    debug!(bug_id = case.bug_id, passed, "Baseline case done");
    BaselineResult {
        bug_id: case.bug_id,
        description: case.description.clone(),
        fix,
        passed,
        log: truncate(&log, 500),
        execution_time_seconds: round_to(started.elapsed().as_secs_f64(), 6),
    }
}

async fn attempt(
    toolkit: &Toolkit,
    case: &Case,
) -> Result<(String, TestReport), CollaboratorError> {
    let report = toolkit.analyzer.find_issues(&case.code).await?;
    let fix = toolkit
        .suggester
        .suggest_fixes(&report)
        .await?
        .into_iter()
        .next()
        .unwrap_or_default();
    let patched = toolkit.patcher.apply_patch(&case.code, &fix);
    let tested = toolkit.oracle.run_tests(&patched, case.bug_id).await;
    Ok((fix, tested))
}

pub async fn run_baseline_cases(toolkit: &Toolkit, cases: &[Case]) -> Vec<BaselineResult> {
    let mut results = Vec::with_capacity(cases.len());
    for case in cases {
        results.push(run_baseline(toolkit, case).await);
    }
    let passed = results.iter().filter(|r| r.passed).count();
    info!(passed, total = results.len(), "Baseline finished");
    results
}
