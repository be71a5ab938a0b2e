//! Chat-completion backed collaborators.
//!
//! [`ChatClient`] speaks the OpenAI-compatible `/chat/completions` API and
//! throttles itself with a sliding one-minute window. [`RemoteModel`] turns
//! completions into diagnoses, candidate lists and verdicts, and falls back
//! to the [`HeuristicModel`] whenever a request fails.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repair_coordination::{CodeAnalyzer, CollaboratorError, FixReviewer, FixSuggester, Verdict};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::heuristics::{self, HeuristicModel, MAX_SUGGESTIONS};

const ANALYZE_SYSTEM_PROMPT: &str = "You are an expert Python code analyst. Find potential bugs in the code.

Look for:
- Out-of-bounds indexing
- Access on None values
- Division by zero
- Type mismatches
- Uninitialized variables
- Other likely errors

Answer briefly and concretely, naming the problems you found.";

const SUGGEST_SYSTEM_PROMPT: &str = "You are an expert at fixing bugs in Python code.

Propose concrete fixes for the reported problems. Each fix must be:
- Concrete and applicable
- Short (1-2 sentences)
- Aimed at one specific problem

Return 2-5 alternative fixes as a numbered list:
1. First fix
2. Second fix";

const REVIEW_SYSTEM_PROMPT: &str = "You are an experienced code reviewer. Judge the proposed fix.

Criteria: correctness, completeness, no new problems, readability.

Answer with a single word:
- \"approve\" if the fix is good
- \"request_changes\" if it needs more work";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Read from `OPENAI_API_KEY`; never written to config files.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_requests_per_minute: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4".to_string(),
            max_tokens: 1000,
            temperature: 0.1,
            max_requests_per_minute: 20,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model returned no choices")]
    EmptyResponse,
}

/// One system + user exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatPrompt {
    pub system: String,
    pub user: String,
    pub seed: Option<u64>,
}

impl ChatPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError>;
}

/// Sliding-window request limiter.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn per_minute(max_requests: u32) -> Self {
        Self::new(max_requests as usize, Duration::from_secs(60))
    }

    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests: max_requests.max(1),
            window,
            sent: Mutex::new(VecDeque::new()),
        }
    }

    /// Wait until another request fits in the window, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut sent = self.sent.lock().await;
                let now = Instant::now();
                while sent
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    sent.pop_front();
                }
                match sent.front().copied() {
                    Some(oldest) if sent.len() >= self.max_requests => {
                        self.window - now.duration_since(oldest)
                    }
                    _ => {
                        sent.push_back(now);
                        return;
                    }
                }
            };
            warn!(wait_secs = wait.as_secs_f64(), "Rate limit reached, waiting");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct ChatClient {
    http: reqwest::Client,
    config: LlmConfig,
    api_key: String,
    limiter: RateLimiter,
}

impl ChatClient {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            http,
            limiter: RateLimiter::per_minute(config.max_requests_per_minute),
            config,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Completion for ChatClient {
    async fn complete(&self, prompt: &ChatPrompt) -> Result<String, LlmError> {
        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
            max_tokens: u32,
            temperature: f32,
            #[serde(skip_serializing_if = "Option::is_none")]
            seed: Option<u64>,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ResponseMessage,
        }

        #[derive(Deserialize)]
        struct ResponseMessage {
            content: Option<String>,
        }

        self.limiter.acquire().await;

        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            seed: prompt.seed,
        };

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        let content = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?
            .message
            .content
            .unwrap_or_default();

        debug!(model = %self.config.model, chars = content.len(), "Completion received");
        Ok(content)
    }
}

/// Pull list items out of a completion: numbered (`1.` to `5.`) or bulleted
/// (`-`, `*`) lines, marker stripped, at most five.
pub fn parse_fix_list(response: &str) -> Vec<String> {
    const MARKERS: [&str; 7] = ["1.", "2.", "3.", "4.", "5.", "-", "*"];
    response
        .lines()
        .map(str::trim)
        .filter(|line| {
            line.starts_with(|c: char| c.is_ascii_digit())
                || line.starts_with('-')
                || line.starts_with('*')
        })
        .map(|line| {
            MARKERS
                .iter()
                .find_map(|m| line.strip_prefix(m))
                .unwrap_or(line)
                .trim()
        })
        .filter(|fix| !fix.is_empty())
        .take(MAX_SUGGESTIONS)
        .map(String::from)
        .collect()
}

pub fn parse_review(response: &str) -> Verdict {
    if response.to_lowercase().contains("approve") {
        Verdict::Approve
    } else {
        Verdict::RequestChanges
    }
}

/// Model-backed collaborators with heuristic fallback.
#[derive(Clone)]
pub struct RemoteModel {
    completion: Arc<dyn Completion>,
}

impl RemoteModel {
    pub fn new(completion: Arc<dyn Completion>) -> Self {
        Self { completion }
    }
}

impl std::fmt::Debug for RemoteModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteModel").finish_non_exhaustive()
    }
}

#[async_trait]
impl CodeAnalyzer for RemoteModel {
    async fn find_issues(&self, code: &str) -> Result<String, CollaboratorError> {
        let prompt = ChatPrompt::new(
            ANALYZE_SYSTEM_PROMPT,
            format!("Analyze this code for bugs:\n\n```python\n{code}\n```"),
        );
        match self.completion.complete(&prompt).await {
            Ok(report) if !report.trim().is_empty() => Ok(report),
            Ok(_) => Ok(heuristics::find_issues(code)),
            Err(e) => {
                warn!(error = %e, "Analysis request failed, using heuristics");
                HeuristicModel.find_issues(code).await
            }
        }
    }
}

#[async_trait]
impl FixSuggester for RemoteModel {
    async fn suggest_fixes(&self, report: &str) -> Result<Vec<String>, CollaboratorError> {
        let prompt = ChatPrompt::new(
            SUGGEST_SYSTEM_PROMPT,
            format!("Reported problems:\n{report}\n\nPropose concrete fixes:"),
        );
        match self.completion.complete(&prompt).await {
            Ok(response) => {
                let fixes = parse_fix_list(&response);
                if fixes.is_empty() {
                    debug!("No list items in completion, using heuristics");
                    Ok(heuristics::suggest_fixes(report))
                } else {
                    Ok(fixes)
                }
            }
            Err(e) => {
                warn!(error = %e, "Fix request failed, using heuristics");
                HeuristicModel.suggest_fixes(report).await
            }
        }
    }
}

#[async_trait]
impl FixReviewer for RemoteModel {
    async fn review_fix(&self, candidate: &str, seed: u64) -> Result<Verdict, CollaboratorError> {
        let prompt = ChatPrompt::new(REVIEW_SYSTEM_PROMPT, format!("Review this fix: {candidate}"))
            .with_seed(seed);
        match self.completion.complete(&prompt).await {
            Ok(response) => Ok(parse_review(&response)),
            Err(e) => {
                warn!(error = %e, "Review request failed, using heuristics");
                HeuristicModel.review_fix(candidate, seed).await
            }
        }
    }
}
