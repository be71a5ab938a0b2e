//! Peer-review quorum vote over fix candidates.
//!
//! Every candidate is reviewed by `n_reviewers` independent, sequential
//! `review_fix` calls and approved on a strict majority. The per-call seed
//! handed to the reviewer is drawn from a panel-owned [`StdRng`], so two
//! panels built from the same seed and reviewer count see the exact same
//! seed sequence.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::FixReviewer;
use crate::metrics::Metrics;

/// One reviewer slot's decision on one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Approve,
    RequestChanges,
}

impl Verdict {
    pub fn is_approve(self) -> bool {
        matches!(self, Self::Approve)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::RequestChanges => write!(f, "request_changes"),
        }
    }
}

/// Approvals needed to pass a panel of `n_reviewers`: `floor(n/2) + 1`.
pub fn approval_quorum(n_reviewers: usize) -> usize {
    n_reviewers / 2 + 1
}

/// The votes cast on a single candidate and the resulting decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub candidate: String,
    pub votes: Vec<Verdict>,
    pub approved: bool,
}

impl Ballot {
    /// Reduce a set of verdicts to a majority decision.
    pub fn tally(candidate: impl Into<String>, votes: Vec<Verdict>) -> Self {
        let approvals = votes.iter().filter(|v| v.is_approve()).count();
        let approved = approvals >= approval_quorum(votes.len());
        Self {
            candidate: candidate.into(),
            votes,
            approved,
        }
    }

    pub fn approvals(&self) -> usize {
        self.votes.iter().filter(|v| v.is_approve()).count()
    }
}

/// Approved candidates in their original order.
pub fn approved(ballots: &[Ballot]) -> Vec<String> {
    ballots
        .iter()
        .filter(|b| b.approved)
        .map(|b| b.candidate.clone())
        .collect()
}

/// A reviewer plus the seeded RNG that feeds it per-call seeds.
pub struct ReviewPanel {
    reviewer: Arc<dyn FixReviewer>,
    n_reviewers: usize,
    rng: StdRng,
}

impl ReviewPanel {
    pub fn new(reviewer: Arc<dyn FixReviewer>, n_reviewers: usize, seed: u64) -> Self {
        Self {
            reviewer,
            n_reviewers,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn n_reviewers(&self) -> usize {
        self.n_reviewers
    }

    /// Review every candidate `n_reviewers` times, one call after another.
    ///
    /// A reviewer error counts as [`Verdict::RequestChanges`] for that slot.
    pub async fn vote(&mut self, candidates: &[String], metrics: &Metrics) -> Vec<Ballot> {
        let mut ballots = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let mut votes = Vec::with_capacity(self.n_reviewers);
            for slot in 0..self.n_reviewers {
                let seed: u64 = self.rng.gen();
                let verdict = match self.reviewer.review_fix(candidate, seed).await {
                    Ok(verdict) => verdict,
                    Err(e) => {
                        warn!(slot, error = %e, "Reviewer failed, counting as request_changes");
                        Verdict::RequestChanges
                    }
                };
                metrics.record_review();
                votes.push(verdict);
            }

            let ballot = Ballot::tally(candidate.clone(), votes);
            if ballot.approved {
                metrics.record_approval();
            }
            debug!(
                approvals = ballot.approvals(),
                n_reviewers = self.n_reviewers,
                approved = ballot.approved,
                "Candidate voted"
            );
            ballots.push(ballot);
        }

        ballots
    }
}

impl fmt::Debug for ReviewPanel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewPanel")
            .field("n_reviewers", &self.n_reviewers)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CollaboratorError, MockFixReviewer};
    use std::sync::Mutex;

    fn votes(approve: usize, reject: usize) -> Vec<Verdict> {
        std::iter::repeat(Verdict::Approve)
            .take(approve)
            .chain(std::iter::repeat(Verdict::RequestChanges).take(reject))
            .collect()
    }

    #[test]
    fn test_majority_boundaries() {
        assert!(!Ballot::tally("a", votes(2, 2)).approved);
        assert!(Ballot::tally("a", votes(3, 1)).approved);
        assert!(Ballot::tally("a", votes(1, 0)).approved);
        assert!(!Ballot::tally("a", votes(0, 1)).approved);
        assert!(Ballot::tally("a", votes(3, 2)).approved);
        assert!(!Ballot::tally("a", votes(2, 3)).approved);
    }

    #[test]
    fn test_quorum() {
        assert_eq!(approval_quorum(1), 1);
        assert_eq!(approval_quorum(4), 3);
        assert_eq!(approval_quorum(5), 3);
    }

    #[test]
    fn test_approved_preserves_order() {
        let ballots = vec![
            Ballot::tally("first", votes(1, 0)),
            Ballot::tally("second", votes(0, 1)),
            Ballot::tally("third", votes(1, 0)),
        ];
        assert_eq!(approved(&ballots), vec!["first", "third"]);
    }

    /// Reviewer that records the seeds it was handed and approves on even seeds.
    struct SeedRecorder {
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait::async_trait]
    impl FixReviewer for SeedRecorder {
        async fn review_fix(&self, _candidate: &str, seed: u64) -> Result<Verdict, CollaboratorError> {
            self.seen.lock().unwrap().push(seed);
            Ok(if seed % 2 == 0 {
                Verdict::Approve
            } else {
                Verdict::RequestChanges
            })
        }
    }

    #[tokio::test]
    async fn test_same_seed_gives_identical_votes() {
        let candidates: Vec<String> = vec!["a".into(), "b".into(), "c".into()];

        let run = |seed| {
            let candidates = candidates.clone();
            async move {
                let recorder = Arc::new(SeedRecorder {
                    seen: Mutex::new(Vec::new()),
                });
                let mut panel = ReviewPanel::new(recorder.clone(), 5, seed);
                let ballots = panel.vote(&candidates, &Metrics::new()).await;
                let seen = recorder.seen.lock().unwrap().clone();
                (ballots, seen)
            }
        };

        let (ballots_a, seeds_a) = run(42).await;
        let (ballots_b, seeds_b) = run(42).await;
        let (_, seeds_c) = run(7).await;

        assert_eq!(ballots_a, ballots_b);
        assert_eq!(seeds_a, seeds_b);
        assert_eq!(seeds_a.len(), 15);
        assert_ne!(seeds_a, seeds_c);
    }

    #[tokio::test]
    async fn test_reviewer_error_counts_as_request_changes() {
        let mut reviewer = MockFixReviewer::new();
        reviewer
            .expect_review_fix()
            .times(3)
            .returning(|_, _| Err(CollaboratorError::Unavailable("down".into())));

        let metrics = Metrics::new();
        let mut panel = ReviewPanel::new(Arc::new(reviewer), 3, 1);
        let ballots = panel.vote(&["fix".to_string()], &metrics).await;

        assert_eq!(ballots[0].votes, votes(0, 3));
        assert!(!ballots[0].approved);
        let snap = metrics.snapshot();
        assert_eq!(snap.reviews_performed, 3);
        assert_eq!(snap.approved_fixes, 0);
    }

    #[tokio::test]
    async fn test_counts_reviews_and_approvals() {
        let mut reviewer = MockFixReviewer::new();
        reviewer
            .expect_review_fix()
            .returning(|candidate, _| {
                Ok(if candidate.starts_with("good") {
                    Verdict::Approve
                } else {
                    Verdict::RequestChanges
                })
            });

        let metrics = Metrics::new();
        let mut panel = ReviewPanel::new(Arc::new(reviewer), 4, 9);
        let candidates = vec!["good one".to_string(), "bad one".into(), "good two".into()];
        let ballots = panel.vote(&candidates, &metrics).await;

        assert_eq!(approved(&ballots), vec!["good one", "good two"]);
        let snap = metrics.snapshot();
        assert_eq!(snap.reviews_performed, 12);
        assert_eq!(snap.approved_fixes, 2);
    }
}
