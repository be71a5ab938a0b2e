//! Case state machine: explicit states and legal transition guards.
//!
//! Every case starts at `Analyzing` and ends at `Succeeded`, `Failed` or
//! `TimedOut`. The coordinator calls [`CaseMachine::advance`] for each step;
//! illegal edges are rejected and every accepted edge is recorded with the
//! attempt number and elapsed time for post-mortem replay.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// States a single case moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseState {
    /// Waiting for the analyst's bug report.
    Analyzing,
    /// Waiting for the fixer's candidates.
    Fixing,
    /// Waiting for the controller's vote.
    Reviewing,
    /// Applying approved fixes and running the oracle.
    Testing,
    /// Round failed; about to start the next one.
    Retrying,
    /// A patch passed the oracle. Terminal.
    Succeeded,
    /// Retry budget exhausted. Terminal.
    Failed,
    /// Analysis never answered. Terminal.
    TimedOut,
}

impl CaseState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

impl fmt::Display for CaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analyzing => write!(f, "Analyzing"),
            Self::Fixing => write!(f, "Fixing"),
            Self::Reviewing => write!(f, "Reviewing"),
            Self::Testing => write!(f, "Testing"),
            Self::Retrying => write!(f, "Retrying"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::TimedOut => write!(f, "TimedOut"),
        }
    }
}

/// ```text
/// Analyzing → Fixing | TimedOut
/// Fixing    → Reviewing | Retrying
/// Reviewing → Testing | Retrying
/// Testing   → Succeeded | Retrying
/// Retrying  → Fixing
/// any non-terminal → Failed
/// ```
fn is_legal_transition(from: CaseState, to: CaseState) -> bool {
    use CaseState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Analyzing, Fixing)
            | (Analyzing, TimedOut)
            | (Fixing, Reviewing)
            | (Fixing, Retrying)
            | (Reviewing, Testing)
            | (Reviewing, Retrying)
            | (Testing, Succeeded)
            | (Testing, Retrying)
            | (Retrying, Fixing)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: CaseState,
    pub to: CaseState,
    /// Retry round at the time of the transition.
    pub attempt: u32,
    /// Milliseconds since the case started.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal case transition: {from} → {to}")]
pub struct IllegalTransition {
    pub from: CaseState,
    pub to: CaseState,
}

/// Tracks the current state and the full transition log of one case.
#[derive(Debug)]
pub struct CaseMachine {
    current: CaseState,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl CaseMachine {
    pub fn new() -> Self {
        Self {
            current: CaseState::Analyzing,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> CaseState {
        self.current
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    pub fn advance(&mut self, to: CaseState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            reason = reason.unwrap_or(""),
            "State transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(CaseState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    /// One-line history, e.g. `Analyzing → Succeeded (12ms, 4 transitions)`.
    pub fn summary(&self) -> String {
        let path: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        let mut out = format!(
            "{} → {} ({}ms, {} transitions)",
            CaseState::Analyzing,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        );
        if !path.is_empty() {
            out.push_str(&format!(" [{}]", path.join(" → ")));
        }
        out
    }
}

impl Default for CaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let sm = CaseMachine::new();
        assert_eq!(sm.current(), CaseState::Analyzing);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_happy_path() {
        let mut sm = CaseMachine::new();
        sm.advance(CaseState::Fixing, None).unwrap();
        sm.advance(CaseState::Reviewing, None).unwrap();
        sm.advance(CaseState::Testing, None).unwrap();
        sm.advance(CaseState::Succeeded, Some("oracle passed")).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 4);
        assert_eq!(sm.transitions()[3].reason.as_deref(), Some("oracle passed"));
    }

    #[test]
    fn test_retry_loop_records_attempts() {
        let mut sm = CaseMachine::new();
        sm.advance(CaseState::Fixing, None).unwrap();
        sm.advance(CaseState::Retrying, Some("fixer timed out")).unwrap();
        sm.set_attempt(1);
        sm.advance(CaseState::Fixing, None).unwrap();
        sm.advance(CaseState::Reviewing, None).unwrap();
        sm.advance(CaseState::Retrying, Some("no approvals")).unwrap();
        sm.set_attempt(2);
        sm.advance(CaseState::Fixing, None).unwrap();

        let attempts: Vec<u32> = sm.transitions().iter().map(|t| t.attempt).collect();
        assert_eq!(attempts, vec![0, 0, 1, 1, 1, 2]);
    }

    #[test]
    fn test_analysis_timeout_is_terminal() {
        let mut sm = CaseMachine::new();
        sm.advance(CaseState::TimedOut, Some("analyst silent")).unwrap();
        assert!(sm.is_terminal());
        assert!(sm.advance(CaseState::Fixing, None).is_err());
        assert!(sm.fail("too late").is_err());
    }

    #[test]
    fn test_fail_from_any_non_terminal_state() {
        for state in [
            CaseState::Analyzing,
            CaseState::Fixing,
            CaseState::Reviewing,
            CaseState::Testing,
            CaseState::Retrying,
        ] {
            let mut sm = CaseMachine {
                current: state,
                attempt: 0,
                created_at: Instant::now(),
                transitions: Vec::new(),
            };
            assert!(sm.fail("budget exhausted").is_ok());
            assert_eq!(sm.current(), CaseState::Failed);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        let mut sm = CaseMachine::new();
        let err = sm.advance(CaseState::Testing, None).unwrap_err();
        assert_eq!(err.from, CaseState::Analyzing);
        assert_eq!(err.to, CaseState::Testing);

        sm.advance(CaseState::Fixing, None).unwrap();
        // Timeouts after analysis are per-round, never terminal.
        assert!(sm.advance(CaseState::TimedOut, None).is_err());
        assert!(sm.advance(CaseState::Analyzing, None).is_err());
    }

    #[test]
    fn test_summary_lists_path() {
        let mut sm = CaseMachine::new();
        sm.advance(CaseState::Fixing, None).unwrap();
        sm.fail("gave up").unwrap();
        let summary = sm.summary();
        assert!(summary.starts_with("Analyzing → Failed"));
        assert!(summary.contains("[Fixing → Failed]"));
    }
}
