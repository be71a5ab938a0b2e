//! Per-case counters shared by every agent that touches the case.
//!
//! All mutation goes through atomic increments so concurrently running
//! agents never race on a read-modify-write. [`Metrics::snapshot`] produces
//! the serializable view carried on a [`CaseOutcome`](crate::CaseOutcome).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Atomic counters for one case run.
#[derive(Debug)]
pub struct Metrics {
    started: Instant,
    elapsed: OnceLock<Duration>,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    timeouts_occurred: AtomicU64,
    candidates_generated: AtomicU64,
    reviews_performed: AtomicU64,
    approved_fixes: AtomicU64,
    successful_patches: AtomicU64,
    failed_patches: AtomicU64,
    retries_used: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            elapsed: OnceLock::new(),
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            timeouts_occurred: AtomicU64::new(0),
            candidates_generated: AtomicU64::new(0),
            reviews_performed: AtomicU64::new(0),
            approved_fixes: AtomicU64::new(0),
            successful_patches: AtomicU64::new(0),
            failed_patches: AtomicU64::new(0),
            retries_used: AtomicU64::new(0),
        }
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_timeout(&self) {
        self.timeouts_occurred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_candidates(&self, count: usize) {
        self.candidates_generated
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_review(&self) {
        self.reviews_performed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_approval(&self) {
        self.approved_fixes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_patch_success(&self) {
        self.successful_patches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_patch_failure(&self) {
        self.failed_patches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_used.fetch_add(1, Ordering::Relaxed);
    }

    /// Freeze the execution time. Later calls keep the first value.
    pub fn finish(&self) {
        let _ = self.elapsed.set(self.started.elapsed());
    }

    pub fn execution_time(&self) -> Duration {
        self.elapsed
            .get()
            .copied()
            .unwrap_or_else(|| self.started.elapsed())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        // Every receive follows its send, so reading received first keeps
        // received <= sent in a snapshot taken mid-run.
        let messages_received = self.messages_received.load(Ordering::SeqCst);
        let messages_sent = self.messages_sent.load(Ordering::SeqCst);
        let candidates_generated = self.candidates_generated.load(Ordering::Relaxed);
        let approved_fixes = self.approved_fixes.load(Ordering::Relaxed);
        let successful_patches = self.successful_patches.load(Ordering::Relaxed);

        MetricsSnapshot {
            execution_time_seconds: round_to(self.execution_time().as_secs_f64(), 3),
            messages_sent,
            messages_received,
            timeouts_occurred: self.timeouts_occurred.load(Ordering::Relaxed),
            candidates_generated,
            reviews_performed: self.reviews_performed.load(Ordering::Relaxed),
            approved_fixes,
            successful_patches,
            failed_patches: self.failed_patches.load(Ordering::Relaxed),
            retries_used: self.retries_used.load(Ordering::Relaxed),
            success_rate: ratio(successful_patches, approved_fixes),
            review_approval_rate: ratio(approved_fixes, candidates_generated),
            message_efficiency: ratio(messages_received, messages_sent),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`Metrics`] with derived ratios.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub execution_time_seconds: f64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub timeouts_occurred: u64,
    pub candidates_generated: u64,
    pub reviews_performed: u64,
    pub approved_fixes: u64,
    pub successful_patches: u64,
    pub failed_patches: u64,
    pub retries_used: u64,
    /// successful patches / approved fixes
    pub success_rate: f64,
    /// approved fixes / candidates generated
    pub review_approval_rate: f64,
    /// messages received / messages sent
    pub message_efficiency: f64,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    round_to(numerator as f64 / denominator.max(1) as f64, 2)
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}
