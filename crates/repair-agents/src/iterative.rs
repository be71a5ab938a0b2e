//! Iterative whole-file repair.
//!
//! Each attempt asks a [`Completion`] to return the complete fixed code in a
//! fenced block, tests what comes back, and feeds failures into the next
//! prompt. No candidates, no review panel. [`HeuristicRewriter`] plays the
//! model offline by patching the code with the heuristic suggestions in turn.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use repair_coordination::{Case, TestOracle};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::heuristics;
use crate::llm::{ChatPrompt, Completion, LlmError};
use crate::oracle::truncate;
use crate::patching::apply_patch;
use crate::report::round_to;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

const REWRITE_SYSTEM_PROMPT: &str = "You are a developer assistant. Fix the bugs in the given Python code. \
Return only the complete fixed code in a single ```python ...``` block. \
Do not add explanations, text outside the code block, or formatting.";

static CODE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)```python\n([\s\S]*?)```|```\n([\s\S]*?)```")
        .expect("CODE_BLOCK regex should compile")
});

/// Marker that opens each history entry; also how attempts are counted.
const ATTEMPT_MARKER: &str = "\nAttempt ";

/// Body of the first fenced code block, trimmed.
pub fn extract_code(text: &str) -> Option<String> {
    let caps = CODE_BLOCK.captures(text)?;
    let body = caps.get(1).or_else(|| caps.get(2))?;
    Some(body.as_str().trim().to_string())
}

pub fn rewrite_prompt(description: &str, code: &str, history: &str) -> ChatPrompt {
    ChatPrompt::new(
        REWRITE_SYSTEM_PROMPT,
        format!(
            "Task: {description}.\n\n\
             Failed attempts so far (if any):\n{history}\n\n\
             Fix the following code so that it passes simple tests. \
             Return only the complete fixed code:\n\n\
             ```python\n{code}\n```"
        ),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptResult {
    Success,
    Fail,
    NoCodeBlock,
    RequestFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptDetail {
    pub attempt: u32,
    pub llm_time_sec: f64,
    pub test_time_sec: f64,
    pub result: AttemptResult,
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterativeOutcome {
    pub bug_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub attempts: u32,
    pub success: bool,
    pub total_time_sec: f64,
    pub attempt_details: Vec<AttemptDetail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_code: Option<String>,
}

pub struct IterativeRepair {
    completion: Arc<dyn Completion>,
    oracle: Arc<dyn TestOracle>,
    max_attempts: u32,
}

impl std::fmt::Debug for IterativeRepair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterativeRepair")
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

impl IterativeRepair {
    pub fn new(completion: Arc<dyn Completion>, oracle: Arc<dyn TestOracle>) -> Self {
        Self {
            completion,
            oracle,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// At least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn run(&self, case: &Case) -> IterativeOutcome {
        let description = case.description.as_deref().unwrap_or("fix the bug");
        let mut history = String::new();
        let mut details = Vec::new();
        let mut final_code = None;
        let mut success = false;

        for attempt in 1..=self.max_attempts {
            let prompt = rewrite_prompt(description, &case.code, &history);
            let asked = Instant::now();
            let response = self.completion.complete(&prompt).await;
            let llm_time_sec = round_to(asked.elapsed().as_secs_f64(), 6);

            let response = match response {
                Ok(response) => response,
                Err(e) => {
                    warn!(bug_id = case.bug_id, attempt, error = %e, "Rewrite request failed");
                    details.push(AttemptDetail {
                        attempt,
                        llm_time_sec,
                        test_time_sec: 0.0,
                        result: AttemptResult::RequestFailed,
                        log: e.to_string(),
                    });
                    history.push_str(&format!("{ATTEMPT_MARKER}{attempt}: the request failed."));
                    continue;
                }
            };

            let Some(code) = extract_code(&response) else {
                details.push(AttemptDetail {
                    attempt,
                    llm_time_sec,
                    test_time_sec: 0.0,
                    result: AttemptResult::NoCodeBlock,
                    log: truncate(&response, 500),
                });
                history.push_str(&format!(
                    "{ATTEMPT_MARKER}{attempt}: the model returned no code block. Return only code."
                ));
                continue;
            };

            let tested_at = Instant::now();
            let report = self.oracle.run_tests(&code, case.bug_id).await;
            let test_time_sec = round_to(tested_at.elapsed().as_secs_f64(), 6);
            debug!(bug_id = case.bug_id, attempt, passed = report.passed, "Rewrite tested");

            details.push(AttemptDetail {
                attempt,
                llm_time_sec,
                test_time_sec,
                result: if report.passed {
                    AttemptResult::Success
                } else {
                    AttemptResult::Fail
                },
                log: truncate(&report.log, 1000),
            });
            final_code = Some(code);
            if report.passed {
                success = true;
                break;
            }
            history.push_str(&format!(
                "{ATTEMPT_MARKER}{attempt} failed the tests. Errors/log:\n{}\n\
                 Do not repeat the previous solution. Propose a different approach.",
                truncate(&report.log, 500)
            ));
        }

        let total: f64 = details
            .iter()
            .map(|d| d.llm_time_sec + d.test_time_sec)
            .sum();
        IterativeOutcome {
            bug_id: case.bug_id,
            description: case.description.clone(),
            attempts: details.len() as u32,
            success,
            total_time_sec: round_to(total, 6),
            attempt_details: details,
            final_code,
        }
    }

    pub async fn run_cases(&self, cases: &[Case]) -> Vec<IterativeOutcome> {
        let mut outcomes = Vec::with_capacity(cases.len());
        for case in cases {
            outcomes.push(self.run(case).await);
        }
        let succeeded = outcomes.iter().filter(|o| o.success).count();
        info!(succeeded, total = outcomes.len(), "Iterative repair finished");
        outcomes
    }
}

/// Offline stand-in for a rewriting model.
///
/// Reads the code from the prompt's fenced block and applies the heuristic
/// fix whose index equals the number of earlier attempts, wrapping around.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicRewriter;

#[async_trait]
impl Completion for HeuristicRewriter {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError> {
        let Some(code) = extract_code(&prompt.user) else {
            return Ok("No code found to fix.".to_string());
        };
        let earlier = prompt.user.matches(ATTEMPT_MARKER).count();
        let fixes = heuristics::suggest_fixes(&heuristics::find_issues(&code));
        let fix = &fixes[earlier % fixes.len()];
        Ok(format!("```python\n{}\n```", apply_patch(&code, fix)))
    }
}
