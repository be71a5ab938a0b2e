//! Run parameters shared by both orchestrators.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("n_reviewers must be at least 1 (got {0})")]
    NoReviewers(usize),

    #[error("step_timeout_secs must be a positive, finite number of seconds (got {0})")]
    InvalidStepTimeout(f64),

    #[error("max_concurrent_cases must be at least 1 (got {0})")]
    NoConcurrency(usize),

    #[error("max_candidates must be at least 1 when set")]
    NoCandidates,
}

/// Knobs for one system or batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Reviewers consulted per candidate.
    pub n_reviewers: usize,
    /// Additional rounds after the first; `2` allows three rounds.
    pub max_retries: u32,
    /// Per-step wait limit, in seconds.
    pub step_timeout_secs: f64,
    /// Seeds the vote RNG (and the linear shuffle).
    pub seed: u64,
    /// Cases allowed in flight at once on one agent system.
    pub max_concurrent_cases: usize,
    /// Truncate candidate lists to this length.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_candidates: Option<usize>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n_reviewers: 5,
            max_retries: 2,
            step_timeout_secs: 5.0,
            seed: 42,
            max_concurrent_cases: 3,
            max_candidates: None,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_reviewers == 0 {
            return Err(ConfigError::NoReviewers(self.n_reviewers));
        }
        self.step_timeout()?;
        if self.max_concurrent_cases == 0 {
            return Err(ConfigError::NoConcurrency(self.max_concurrent_cases));
        }
        if self.max_candidates == Some(0) {
            return Err(ConfigError::NoCandidates);
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Result<Duration, ConfigError> {
        match Duration::try_from_secs_f64(self.step_timeout_secs) {
            Ok(timeout) if !timeout.is_zero() => Ok(timeout),
            _ => Err(ConfigError::InvalidStepTimeout(self.step_timeout_secs)),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout_secs = timeout.as_secs_f64();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.step_timeout().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn test_rejects_bad_values() {
        let config = RunConfig {
            n_reviewers: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoReviewers(0)));

        for secs in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = RunConfig {
                step_timeout_secs: secs,
                ..Default::default()
            };
            assert!(matches!(
                config.validate(),
                Err(ConfigError::InvalidStepTimeout(_))
            ));
        }

        let config = RunConfig {
            max_candidates: Some(0),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NoCandidates));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"n_reviewers": 3, "max_candidates": 2}"#).unwrap();
        assert_eq!(config.n_reviewers, 3);
        assert_eq!(config.max_candidates, Some(2));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.seed, 42);
    }
}
