//! Parameter sweep over candidate count, panel size and retry budget,
//! repeated per seed and aggregated into mean and sample deviation.

use std::path::Path;

use anyhow::{Context, Result};
use repair_coordination::{
    AgentSystem, Approach, Case, CaseOutcome, CaseStatus, ConfigError, LinearOrchestrator,
    RunConfig, Toolkit,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::report::round_to;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepGrid {
    pub candidates: Vec<usize>,
    pub reviewers: Vec<usize>,
    pub retries: Vec<u32>,
    /// Empty means the base config's seed only.
    #[serde(default)]
    pub seeds: Vec<u64>,
}

impl Default for SweepGrid {
    fn default() -> Self {
        Self {
            candidates: vec![1, 2, 3, 5],
            reviewers: vec![1, 3, 5],
            retries: vec![0, 1, 2],
            seeds: Vec::new(),
        }
    }
}

impl SweepGrid {
    /// Every (candidates, reviewers, retries) combination, in nesting order.
    pub fn points(&self) -> Vec<(usize, usize, u32)> {
        let mut points = Vec::new();
        for &c in &self.candidates {
            for &r in &self.reviewers {
                for &t in &self.retries {
                    points.push((c, r, t));
                }
            }
        }
        points
    }

    fn seeds_or(&self, base: u64) -> Vec<u64> {
        if self.seeds.is_empty() {
            vec![base]
        } else {
            self.seeds.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub approach: Approach,
    pub seed: u64,
    pub n_candidates: usize,
    pub n_reviewers: usize,
    pub max_retries: u32,
    pub success_cases: usize,
    pub failed_cases: usize,
    pub timeout_cases: usize,
    pub success_rate: f64,
    pub avg_time: Option<f64>,
}

impl SweepRow {
    fn tally(approach: Approach, config: &RunConfig, outcomes: &[CaseOutcome]) -> Self {
        let count = |status: CaseStatus| outcomes.iter().filter(|o| o.status == status).count();
        let avg_time = (!outcomes.is_empty()).then(|| {
            let total: f64 = outcomes.iter().map(|o| o.metrics.execution_time_seconds).sum();
            round_to(total / outcomes.len() as f64, 6)
        });
        let success_cases = count(CaseStatus::Success);
        let success_rate = if outcomes.is_empty() {
            0.0
        } else {
            round_to(success_cases as f64 / outcomes.len() as f64, 3)
        };
        Self {
            approach,
            seed: config.seed,
            n_candidates: config.max_candidates.unwrap_or_default(),
            n_reviewers: config.n_reviewers,
            max_retries: config.max_retries,
            success_cases,
            failed_cases: count(CaseStatus::Failed),
            timeout_cases: count(CaseStatus::Timeout),
            success_rate,
            avg_time,
        }
    }

    fn point(&self) -> (Approach, usize, usize, u32) {
        (self.approach, self.n_candidates, self.n_reviewers, self.max_retries)
    }
}

/// One grid point summarized across seeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepAggregate {
    pub approach: Approach,
    pub n_candidates: usize,
    pub n_reviewers: usize,
    pub max_retries: u32,
    pub runs: usize,
    pub mean_success_rate: f64,
    pub stdev_success_rate: f64,
    pub mean_time: f64,
    pub stdev_time: f64,
}

/// Mean and sample standard deviation; deviation is 0 below two samples.
fn mean_stdev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt())
}

/// Group rows by grid point, keeping first-seen order.
pub fn aggregate(rows: &[SweepRow]) -> Vec<SweepAggregate> {
    let mut points: Vec<(Approach, usize, usize, u32)> = Vec::new();
    for row in rows {
        if !points.contains(&row.point()) {
            points.push(row.point());
        }
    }

    points
        .into_iter()
        .map(|point| {
            let group: Vec<&SweepRow> = rows.iter().filter(|r| r.point() == point).collect();
            let rates: Vec<f64> = group.iter().map(|r| r.success_rate).collect();
            let times: Vec<f64> = group.iter().filter_map(|r| r.avg_time).collect();
            let (mean_success_rate, stdev_success_rate) = mean_stdev(&rates);
            let (mean_time, stdev_time) = mean_stdev(&times);
            let (approach, n_candidates, n_reviewers, max_retries) = point;
            SweepAggregate {
                approach,
                n_candidates,
                n_reviewers,
                max_retries,
                runs: group.len(),
                mean_success_rate: round_to(mean_success_rate, 3),
                stdev_success_rate: round_to(stdev_success_rate, 3),
                mean_time: round_to(mean_time, 6),
                stdev_time: round_to(stdev_time, 6),
            }
        })
        .collect()
}

/// Highest mean success rate, ties broken by the lower mean time.
pub fn best(aggregates: &[SweepAggregate]) -> Option<&SweepAggregate> {
    aggregates.iter().max_by(|a, b| {
        a.mean_success_rate
            .total_cmp(&b.mean_success_rate)
            .then(b.mean_time.total_cmp(&a.mean_time))
    })
}

/// Run `cases` through both orchestrators at every grid point and seed.
pub async fn run_sweep(
    toolkit: &Toolkit,
    base: &RunConfig,
    cases: &[Case],
    grid: &SweepGrid,
) -> Result<Vec<SweepRow>, ConfigError> {
    let seeds = grid.seeds_or(base.seed);
    let mut rows = Vec::new();
    for approach in [Approach::Sync, Approach::Async] {
        for (n_candidates, n_reviewers, max_retries) in grid.points() {
            for &seed in &seeds {
                let config = RunConfig {
                    seed,
                    n_reviewers,
                    max_retries,
                    max_candidates: Some(n_candidates),
                    ..base.clone()
                };
                let outcomes = match approach {
                    Approach::Sync => {
                        LinearOrchestrator::new(toolkit.clone(), &config)?
                            .run_cases(cases)
                            .await
                    }
                    Approach::Async => {
                        let system = AgentSystem::start(toolkit.clone(), &config)?;
                        let outcomes = system.run_sequential(cases).await;
                        system.shutdown().await;
                        outcomes
                    }
                };
                let row = SweepRow::tally(approach, &config, &outcomes);
                info!(
                    approach = %approach,
                    seed,
                    n_candidates,
                    n_reviewers,
                    max_retries,
                    success = row.success_cases,
                    failed = row.failed_cases,
                    "Sweep point done"
                );
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

pub fn save_rows(rows: &[SweepRow], path: &Path) -> Result<()> {
    #[derive(Serialize)]
    struct SweepFile<'a> {
        results: &'a [SweepRow],
        aggregates: Vec<SweepAggregate>,
    }

    let file = SweepFile {
        results: rows,
        aggregates: aggregate(rows),
    };
    let json = serde_json::to_string_pretty(&file).context("Failed to serialize sweep rows")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write sweep results to {}", path.display()))
}

/// Write `records` as CSV with a header row.
pub fn save_csv<T: Serialize>(records: &[T], path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for record in records {
        writer
            .serialize(record)
            .context("Failed to serialize CSV record")?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))
}
