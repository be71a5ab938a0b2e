//! Four-way comparison on the same cases: linear orchestration, the agent
//! bus, the single-shot baseline and iterative rewriting.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use repair_coordination::{
    AgentSystem, Case, CaseOutcome, ConfigError, LinearOrchestrator, RunConfig, Toolkit,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::baseline::{run_baseline_cases, BaselineResult};
use crate::iterative::{IterativeOutcome, IterativeRepair};
use crate::llm::Completion;
use crate::report::round_to;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareReport {
    pub generated_at: DateTime<Utc>,
    pub seed: u64,
    pub cases: Vec<u32>,
    pub sync: Vec<CaseOutcome>,
    #[serde(rename = "async")]
    pub r#async: Vec<CaseOutcome>,
    pub baseline: Vec<BaselineResult>,
    pub iterative: Vec<IterativeOutcome>,
}

/// Success count and mean time for one approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub approach: String,
    pub successful: usize,
    pub total: usize,
    pub average_time_seconds: f64,
}

impl Tally {
    fn from_runs(approach: &str, runs: impl IntoIterator<Item = (bool, f64)>) -> Self {
        let (mut successful, mut total, mut time) = (0, 0, 0.0);
        for (passed, seconds) in runs {
            total += 1;
            successful += usize::from(passed);
            time += seconds;
        }
        let average_time_seconds = if total == 0 {
            0.0
        } else {
            round_to(time / total as f64, 6)
        };
        Self {
            approach: approach.to_string(),
            successful,
            total,
            average_time_seconds,
        }
    }
}

impl CompareReport {
    /// One tally per approach, in sync, async, baseline, iterative order.
    pub fn tallies(&self) -> Vec<Tally> {
        let orchestrated = |outcomes: &[CaseOutcome]| {
            outcomes
                .iter()
                .map(|o| (o.is_success(), o.metrics.execution_time_seconds))
                .collect::<Vec<_>>()
        };
        vec![
            Tally::from_runs("sync", orchestrated(&self.sync)),
            Tally::from_runs("async", orchestrated(&self.r#async)),
            Tally::from_runs(
                "baseline",
                self.baseline
                    .iter()
                    .map(|r| (r.passed, r.execution_time_seconds)),
            ),
            Tally::from_runs(
                "iterative",
                self.iterative.iter().map(|o| (o.success, o.total_time_sec)),
            ),
        ]
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize comparison")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write comparison to {}", path.display()))
    }
}

pub fn render_tallies(tallies: &[Tally]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<10} {:>9} {:>12}", "approach", "success", "avg time (s)");
    for t in tallies {
        let _ = writeln!(
            out,
            "{:<10} {:>9} {:>12}",
            t.approach,
            format!("{}/{}", t.successful, t.total),
            t.average_time_seconds
        );
    }
    out
}

/// Run every approach over `cases` with the same collaborators and seed.
pub async fn run_compare(
    toolkit: &Toolkit,
    rewriter: Arc<dyn Completion>,
    config: &RunConfig,
    cases: &[Case],
    max_attempts: u32,
) -> Result<CompareReport, ConfigError> {
    let sync = LinearOrchestrator::new(toolkit.clone(), config)?
        .run_cases(cases)
        .await;
    info!(approach = "sync", "Comparison leg done");

    let system = AgentSystem::start(toolkit.clone(), config)?;
    let r#async = system.run_sequential(cases).await;
    system.shutdown().await;
    info!(approach = "async", "Comparison leg done");

    let baseline = run_baseline_cases(toolkit, cases).await;

    let iterative = IterativeRepair::new(rewriter, toolkit.oracle.clone())
        .with_max_attempts(max_attempts)
        .run_cases(cases)
        .await;

    Ok(CompareReport {
        generated_at: Utc::now(),
        seed: config.seed,
        cases: cases.iter().map(|c| c.bug_id).collect(),
        sync,
        r#async,
        baseline,
        iterative,
    })
}
