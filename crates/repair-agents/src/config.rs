//! Application configuration.
//!
//! Layering, lowest to highest precedence: built-in defaults, an optional
//! TOML file, environment variables, then CLI flags (applied by the binary).

use std::path::Path;
use std::str::FromStr;

use repair_coordination::{ConfigError, RunConfig};
use serde::{Deserialize, Serialize};

use crate::llm::LlmConfig;
use crate::oracle::{interpreter_available, SandboxConfig};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Everything the binary needs to build collaborators and run cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub run: RunConfig,
    pub llm: LlmConfig,
    pub sandbox: SandboxConfig,
    /// Use the remote model instead of the heuristic one.
    pub use_llm: bool,
    /// Sandboxed oracle on or off. Unset picks the sandbox whenever the
    /// interpreter can be launched.
    pub use_sandbox: Option<bool>,
}

impl AppConfig {
    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigLoadError> {
        let mut config = match path {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigLoadError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Read {
            path: display.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
            path: display,
            source,
        })
    }

    /// Overlay `REPAIR_*` and `OPENAI_*` variables read through `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigLoadError> {
        let run = &mut self.run;
        if let Some(v) = parse_var(&lookup, "REPAIR_SEED")? {
            run.seed = v;
        }
        if let Some(v) = parse_var(&lookup, "REPAIR_N_REVIEWERS")? {
            run.n_reviewers = v;
        }
        if let Some(v) = parse_var(&lookup, "REPAIR_MAX_RETRIES")? {
            run.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, "REPAIR_STEP_TIMEOUT")? {
            run.step_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "REPAIR_MAX_CONCURRENT_CASES")? {
            run.max_concurrent_cases = v;
        }
        if let Some(v) = lookup("REPAIR_PYTHON") {
            self.sandbox.interpreter = v;
        }
        if let Some(v) = parse_var(&lookup, "REPAIR_USE_SANDBOX")? {
            self.use_sandbox = Some(v);
        }

        let llm = &mut self.llm;
        if let Some(v) = lookup("OPENAI_API_KEY") {
            llm.api_key = Some(v);
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            llm.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            llm.model = v;
        }
        if let Some(v) = parse_var(&lookup, "OPENAI_MAX_TOKENS")? {
            llm.max_tokens = v;
        }
        if let Some(v) = parse_var(&lookup, "OPENAI_TEMPERATURE")? {
            llm.temperature = v;
        }
        if let Some(v) = parse_var(&lookup, "OPENAI_MAX_REQUESTS_PER_MINUTE")? {
            llm.max_requests_per_minute = v;
        }
        Ok(())
    }

    /// Resolve [`Self::use_sandbox`], probing the interpreter when unset.
    pub fn sandbox_enabled(&self) -> bool {
        self.use_sandbox
            .unwrap_or_else(|| interpreter_available(&self.sandbox.interpreter))
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.run.validate()?;
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigLoadError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigLoadError::InvalidEnv { var, value }),
    }
}
