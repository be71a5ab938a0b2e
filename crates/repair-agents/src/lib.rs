//! Repair Agents
//!
//! Concrete collaborators for [`repair_coordination`]: a heuristic model and
//! an OpenAI-compatible remote model for diagnosis, fix proposal and review;
//! a rule-based patcher; static and sandboxed test oracles; the single-shot
//! and iterative repair loops compared against the orchestrators. Also ships the
//! built-in bug catalogue, run analytics and the parameter sweep behind the
//! `repair-agents` binary.

#![allow(clippy::uninlined_format_args)]

pub mod baseline;
pub mod cases;
pub mod compare;
pub mod config;
pub mod heuristics;
pub mod iterative;
pub mod llm;
pub mod oracle;
pub mod patching;
pub mod report;
pub mod sweep;

use std::sync::Arc;

use repair_coordination::{CodeAnalyzer, FixReviewer, FixSuggester, TestOracle, Toolkit};
use tracing::warn;

pub use cases::{builtin_case, builtin_cases, BugCase};
pub use config::{AppConfig, ConfigLoadError};
pub use heuristics::HeuristicModel;
pub use iterative::{HeuristicRewriter, IterativeRepair};
pub use llm::{ChatClient, Completion, LlmConfig, RemoteModel};
pub use oracle::{SandboxConfig, SandboxOracle, StaticOracle};
pub use patching::RulePatcher;

/// Model name when the remote model will be used.
pub fn active_model(config: &AppConfig) -> Option<&str> {
    let has_key = config
        .llm
        .api_key
        .as_deref()
        .is_some_and(|k| !k.trim().is_empty());
    (config.use_llm && has_key).then_some(config.llm.model.as_str())
}

/// Assemble collaborators from configuration. A requested remote model
/// without a usable client falls back to the heuristic model.
pub fn build_toolkit(config: &AppConfig) -> Toolkit {
    let (analyzer, suggester, reviewer): (
        Arc<dyn CodeAnalyzer>,
        Arc<dyn FixSuggester>,
        Arc<dyn FixReviewer>,
    ) = match remote_model(config) {
        Some(model) => {
            let model = Arc::new(model);
            (model.clone(), model.clone(), model)
        }
        None => {
            let model = Arc::new(HeuristicModel);
            (model.clone(), model.clone(), model)
        }
    };

    let oracle: Arc<dyn TestOracle> = if config.sandbox_enabled() {
        Arc::new(SandboxOracle::new(&config.sandbox))
    } else {
        if config.use_sandbox.is_none() {
            warn!(
                interpreter = %config.sandbox.interpreter,
                "Interpreter not found, falling back to pattern checks"
            );
        }
        Arc::new(StaticOracle)
    };

    Toolkit::new(analyzer, suggester, reviewer, Arc::new(RulePatcher), oracle)
}

/// Whole-code rewriter for iterative repair: the chat client when the
/// remote model is usable, otherwise [`HeuristicRewriter`].
pub fn build_rewriter(config: &AppConfig) -> Arc<dyn Completion> {
    match chat_client(config) {
        Some(client) => client,
        None => Arc::new(HeuristicRewriter),
    }
}

fn remote_model(config: &AppConfig) -> Option<RemoteModel> {
    chat_client(config).map(RemoteModel::new)
}

fn chat_client(config: &AppConfig) -> Option<Arc<dyn Completion>> {
    if !config.use_llm {
        return None;
    }
    match ChatClient::new(config.llm.clone()) {
        Ok(client) => {
            let client: Arc<dyn Completion> = Arc::new(client);
            Some(client)
        }
        Err(e) => {
            warn!(error = %e, "Remote model unavailable, using heuristics");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_model_needs_flag_and_key() {
        let mut config = AppConfig::default();
        assert_eq!(active_model(&config), None);
        config.use_llm = true;
        assert_eq!(active_model(&config), None);
        config.llm.api_key = Some("sk-test".into());
        assert_eq!(active_model(&config), Some("gpt-4"));
    }

    #[tokio::test]
    async fn test_default_toolkit_uses_heuristic_model() {
        let toolkit = build_toolkit(&AppConfig::default());
        let report = toolkit.analyzer.find_issues("return a / b").await.unwrap();
        assert!(report.contains("Division by zero"));
        let log = toolkit.oracle.run_tests("x = 1", 99).await;
        assert!(log.passed, "{}", log.log);
    }

    #[tokio::test]
    async fn test_rewriter_without_key_is_offline() {
        let config = AppConfig {
            use_llm: true,
            ..Default::default()
        };
        let rewriter = build_rewriter(&config);
        let prompt = iterative::rewrite_prompt("Division by zero", "def divide(a, b):\n    return a / b", "");
        let response = rewriter.complete(&prompt).await.unwrap();
        assert!(response.contains("if b == 0:"));
    }

    #[tokio::test]
    async fn test_sandbox_off_uses_pattern_checks() {
        let config = AppConfig {
            use_sandbox: Some(false),
            ..Default::default()
        };
        let toolkit = build_toolkit(&config);
        let report = toolkit.oracle.run_tests("def divide(a, b):\n    return a / b", 3).await;
        assert!(!report.passed);
        assert!(report.log.contains("pattern check"));
    }
}
