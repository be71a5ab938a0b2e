//! Run analytics: per-approach summaries, sync vs async comparison, and the
//! JSON results file.

use std::fmt::Write as _;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use repair_coordination::{Approach, CaseOutcome, CaseStatus, MetricsSnapshot};
use serde::Serialize;

/// Approach-specific aggregates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ApproachDetail {
    Sync {
        total_retries: u64,
        average_candidates_per_case: f64,
        average_reviews_per_case: f64,
    },
    Async {
        total_messages: u64,
        total_timeouts: u64,
        average_message_efficiency: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApproachSummary {
    pub cases_processed: usize,
    pub successful: usize,
    pub failed: usize,
    pub timeouts: usize,
    pub success_rate: f64,
    pub average_execution_time: f64,
    #[serde(flatten)]
    pub detail: ApproachDetail,
}

impl ApproachSummary {
    /// `None` when no outcome belongs to `approach`.
    pub fn from_outcomes(approach: Approach, outcomes: &[CaseOutcome]) -> Option<Self> {
        let mine: Vec<&CaseOutcome> = outcomes.iter().filter(|o| o.approach == approach).collect();
        if mine.is_empty() {
            return None;
        }
        let n = mine.len();
        let count = |status: CaseStatus| mine.iter().filter(|o| o.status == status).count();
        let metrics: Vec<&MetricsSnapshot> = mine.iter().map(|o| &o.metrics).collect();
        let total = |f: fn(&MetricsSnapshot) -> u64| metrics.iter().map(|m| f(m)).sum::<u64>();
        let mean = |f: fn(&MetricsSnapshot) -> f64| metrics.iter().map(|m| f(m)).sum::<f64>() / n as f64;

        let detail = match approach {
            Approach::Sync => ApproachDetail::Sync {
                total_retries: total(|m| m.retries_used),
                average_candidates_per_case: round_to(
                    total(|m| m.candidates_generated) as f64 / n as f64,
                    1,
                ),
                average_reviews_per_case: round_to(
                    total(|m| m.reviews_performed) as f64 / n as f64,
                    1,
                ),
            },
            Approach::Async => ApproachDetail::Async {
                total_messages: total(|m| m.messages_sent),
                total_timeouts: total(|m| m.timeouts_occurred),
                average_message_efficiency: round_to(mean(|m| m.message_efficiency), 2),
            },
        };

        let successful = count(CaseStatus::Success);
        Some(Self {
            cases_processed: n,
            successful,
            failed: count(CaseStatus::Failed),
            timeouts: count(CaseStatus::Timeout),
            success_rate: round_to(successful as f64 / n as f64, 2),
            average_execution_time: round_to(mean(|m| m.execution_time_seconds), 3),
            detail,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Leader {
    Sync,
    Async,
    Equal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub faster_approach: Approach,
    pub time_difference_seconds: f64,
    pub more_successful: Leader,
    pub success_difference: usize,
}

impl Comparison {
    pub fn between(sync: &ApproachSummary, r#async: &ApproachSummary) -> Self {
        let faster_approach = if sync.average_execution_time < r#async.average_execution_time {
            Approach::Sync
        } else {
            Approach::Async
        };
        let more_successful = match sync.successful.cmp(&r#async.successful) {
            std::cmp::Ordering::Greater => Leader::Sync,
            std::cmp::Ordering::Less => Leader::Async,
            std::cmp::Ordering::Equal => Leader::Equal,
        };
        Self {
            faster_approach,
            time_difference_seconds: round_to(
                (sync.average_execution_time - r#async.average_execution_time).abs(),
                3,
            ),
            more_successful,
            success_difference: sync.successful.abs_diff(r#async.successful),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_execution_time: f64,
    pub total_cases: usize,
    /// `"heuristic"` or `"remote"`.
    pub llm_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub sync_approach: Option<ApproachSummary>,
    pub async_approach: Option<ApproachSummary>,
    pub comparison: Option<Comparison>,
}

/// Collects outcomes across a CLI run.
#[derive(Debug)]
pub struct Analytics {
    outcomes: Vec<CaseOutcome>,
    started: Instant,
    llm_mode: String,
    model: Option<String>,
}

impl Analytics {
    pub fn new(model: Option<String>) -> Self {
        Self {
            outcomes: Vec::new(),
            started: Instant::now(),
            llm_mode: if model.is_some() { "remote" } else { "heuristic" }.to_string(),
            model,
        }
    }

    pub fn extend(&mut self, outcomes: impl IntoIterator<Item = CaseOutcome>) {
        self.outcomes.extend(outcomes);
    }

    pub fn outcomes(&self) -> &[CaseOutcome] {
        &self.outcomes
    }

    pub fn summary(&self) -> RunSummary {
        let sync_approach = ApproachSummary::from_outcomes(Approach::Sync, &self.outcomes);
        let async_approach = ApproachSummary::from_outcomes(Approach::Async, &self.outcomes);
        let comparison = match (&sync_approach, &async_approach) {
            (Some(s), Some(a)) => Some(Comparison::between(s, a)),
            _ => None,
        };
        RunSummary {
            total_execution_time: round_to(self.started.elapsed().as_secs_f64(), 3),
            total_cases: self.outcomes.len(),
            llm_mode: self.llm_mode.clone(),
            model: self.model.clone(),
            sync_approach,
            async_approach,
            comparison,
        }
    }

    /// Write `{ "summary": ..., "results": [...] }` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct ResultsFile<'a> {
            summary: RunSummary,
            results: &'a [CaseOutcome],
        }

        let file = ResultsFile {
            summary: self.summary(),
            results: &self.outcomes,
        };
        let json = serde_json::to_string_pretty(&file).context("Failed to serialize results")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write results to {}", path.display()))
    }
}

/// Human-readable summary block.
pub fn render(summary: &RunSummary) -> String {
    let mut out = String::new();
    let rule = "=".repeat(72);
    let _ = writeln!(out, "{rule}\nRUN SUMMARY\n{rule}");
    let _ = writeln!(out, "Total time: {}s", summary.total_execution_time);
    let _ = writeln!(out, "Cases processed: {}", summary.total_cases);
    match &summary.model {
        Some(model) => {
            let _ = writeln!(out, "Model: {} ({model})", summary.llm_mode);
        }
        None => {
            let _ = writeln!(out, "Model: {}", summary.llm_mode);
        }
    }

    for (title, section) in [
        ("SYNC", &summary.sync_approach),
        ("ASYNC", &summary.async_approach),
    ] {
        let _ = writeln!(out, "\n{title}:");
        let Some(s) = section else {
            let _ = writeln!(out, "  not run");
            continue;
        };
        let _ = writeln!(out, "  processed: {}", s.cases_processed);
        let _ = writeln!(
            out,
            "  success: {}, failed: {}, timeout: {}",
            s.successful, s.failed, s.timeouts
        );
        let _ = writeln!(out, "  success rate: {:.0}%", s.success_rate * 100.0);
        let _ = writeln!(out, "  average time: {}s", s.average_execution_time);
        match &s.detail {
            ApproachDetail::Sync {
                total_retries,
                average_candidates_per_case,
                average_reviews_per_case,
            } => {
                let _ = writeln!(out, "  total retries: {total_retries}");
                let _ = writeln!(out, "  candidates per case: {average_candidates_per_case}");
                let _ = writeln!(out, "  reviews per case: {average_reviews_per_case}");
            }
            ApproachDetail::Async {
                total_messages,
                total_timeouts,
                average_message_efficiency,
            } => {
                let _ = writeln!(out, "  total messages: {total_messages}");
                let _ = writeln!(out, "  total timeouts: {total_timeouts}");
                let _ = writeln!(out, "  message efficiency: {average_message_efficiency}");
            }
        }
    }

    if let Some(c) = &summary.comparison {
        let _ = writeln!(out, "\nCOMPARISON:");
        let _ = writeln!(out, "  faster: {}", c.faster_approach);
        let _ = writeln!(out, "  time difference: {}s", c.time_difference_seconds);
        let _ = writeln!(out, "  more successful: {:?}", c.more_successful);
        let _ = writeln!(out, "  success difference: {} cases", c.success_difference);
    }
    let _ = write!(out, "{rule}");
    out
}

/// One-line per-case status for progress output.
pub fn case_line(outcome: &CaseOutcome) -> String {
    let m = &outcome.metrics;
    match outcome.approach {
        Approach::Sync => format!(
            "[{}] bug {} {}: {}s, {} candidates, {} retries",
            outcome.approach,
            outcome.bug_id,
            outcome.status,
            m.execution_time_seconds,
            m.candidates_generated,
            m.retries_used
        ),
        Approach::Async => format!(
            "[{}] bug {} {} ({}): {}s, messages {}/{}, {} timeouts",
            outcome.approach,
            outcome.bug_id,
            outcome.status,
            outcome.correlation_id,
            m.execution_time_seconds,
            m.messages_sent,
            m.messages_received,
            m.timeouts_occurred
        ),
    }
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use repair_coordination::CorrelationId;

    fn outcome(approach: Approach, status: CaseStatus, metrics: MetricsSnapshot) -> CaseOutcome {
        CaseOutcome {
            status,
            approach,
            correlation_id: CorrelationId::for_index(1),
            bug_id: 1,
            report: None,
            chosen_fix: None,
            patched_code: None,
            test_log: None,
            rounds: Vec::new(),
            transitions: Vec::new(),
            metrics,
            finished_at: Utc::now(),
        }
    }

    fn timed(secs: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            execution_time_seconds: secs,
            ..Default::default()
        }
    }

    #[test]
    fn test_sync_summary() {
        let outcomes = vec![
            outcome(
                Approach::Sync,
                CaseStatus::Success,
                MetricsSnapshot {
                    execution_time_seconds: 0.2,
                    candidates_generated: 2,
                    reviews_performed: 10,
                    ..Default::default()
                },
            ),
            outcome(
                Approach::Sync,
                CaseStatus::Failed,
                MetricsSnapshot {
                    execution_time_seconds: 0.4,
                    candidates_generated: 3,
                    reviews_performed: 15,
                    retries_used: 2,
                    ..Default::default()
                },
            ),
            outcome(Approach::Async, CaseStatus::Success, timed(9.0)),
        ];
        let s = ApproachSummary::from_outcomes(Approach::Sync, &outcomes).unwrap();
        assert_eq!(s.cases_processed, 2);
        assert_eq!((s.successful, s.failed, s.timeouts), (1, 1, 0));
        assert_eq!(s.success_rate, 0.5);
        assert_eq!(s.average_execution_time, 0.3);
        assert_eq!(
            s.detail,
            ApproachDetail::Sync {
                total_retries: 2,
                average_candidates_per_case: 2.5,
                average_reviews_per_case: 12.5,
            }
        );
    }

    #[test]
    fn test_async_summary_and_missing_approach() {
        let outcomes = vec![
            outcome(
                Approach::Async,
                CaseStatus::Timeout,
                MetricsSnapshot {
                    messages_sent: 1,
                    timeouts_occurred: 1,
                    ..Default::default()
                },
            ),
            outcome(
                Approach::Async,
                CaseStatus::Success,
                MetricsSnapshot {
                    messages_sent: 6,
                    message_efficiency: 1.0,
                    ..Default::default()
                },
            ),
        ];
        let s = ApproachSummary::from_outcomes(Approach::Async, &outcomes).unwrap();
        assert_eq!(s.timeouts, 1);
        assert_eq!(
            s.detail,
            ApproachDetail::Async {
                total_messages: 7,
                total_timeouts: 1,
                average_message_efficiency: 0.5,
            }
        );
        assert!(ApproachSummary::from_outcomes(Approach::Sync, &outcomes).is_none());
    }

    #[test]
    fn test_comparison() {
        let mut analytics = Analytics::new(None);
        analytics.extend([
            outcome(Approach::Sync, CaseStatus::Success, timed(0.1)),
            outcome(Approach::Sync, CaseStatus::Success, timed(0.1)),
            outcome(Approach::Async, CaseStatus::Success, timed(0.5)),
            outcome(Approach::Async, CaseStatus::Failed, timed(0.5)),
        ]);
        let summary = analytics.summary();
        assert_eq!(summary.total_cases, 4);
        assert_eq!(summary.llm_mode, "heuristic");
        let c = summary.comparison.unwrap();
        assert_eq!(c.faster_approach, Approach::Sync);
        assert_eq!(c.time_difference_seconds, 0.4);
        assert_eq!(c.more_successful, Leader::Sync);
        assert_eq!(c.success_difference, 1);
    }

    #[test]
    fn test_save_results_file() {
        let mut analytics = Analytics::new(Some("gpt-4".into()));
        analytics.extend([outcome(Approach::Async, CaseStatus::Success, timed(0.1))]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        analytics.save(&path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["summary"]["llm_mode"], "remote");
        assert_eq!(json["summary"]["async_approach"]["total_messages"], 0);
        assert!(json["summary"]["comparison"].is_null());
        assert_eq!(json["results"][0]["status"], "success");
        assert!(render(&analytics.summary()).contains("SYNC:\n  not run"));
    }
}
