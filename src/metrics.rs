use std::sync::atomic::{AtomicU64, Ordering};

use crate::embedding::TransportBreaker;
use crate::review::{AbortCause, StageOutcome};

/// Thread-safe counters describing review activity.
#[derive(Default)]
pub struct ReviewMetrics {
    reviews_started: AtomicU64,
    reviews_completed: AtomicU64,
    reviews_aborted: AtomicU64,
    global_timeouts: AtomicU64,
    client_disconnects: AtomicU64,
    degraded_stages: AtomicU64,
    skipped_stages: AtomicU64,
}

impl ReviewMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted review.
    pub fn record_started(&self) {
        self.reviews_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a review that delivered its report.
    pub fn record_completed(&self) {
        self.reviews_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a review that stopped early.
    pub fn record_aborted(&self, cause: &AbortCause) {
        self.reviews_aborted.fetch_add(1, Ordering::Relaxed);
        match cause {
            AbortCause::GlobalTimeout { .. } => {
                self.global_timeouts.fetch_add(1, Ordering::Relaxed);
            }
            AbortCause::ClientDisconnected => {
                self.client_disconnects.fetch_add(1, Ordering::Relaxed);
            }
            AbortCause::StageFailed { .. } => {}
        }
    }

    /// Record a stage that ran on a substitute value.
    pub fn record_degraded(&self) {
        self.degraded_stages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stage that contributed nothing.
    pub fn record_skipped(&self) {
        self.skipped_stages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a resolved stage by its outcome.
    pub fn record_outcome<T>(&self, outcome: &StageOutcome<T>) {
        match outcome {
            StageOutcome::Degraded(..) => self.record_degraded(),
            StageOutcome::Skipped(_) => self.record_skipped(),
            StageOutcome::Completed(_) | StageOutcome::Failed(_) => {}
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self, breaker: &TransportBreaker) -> MetricsSnapshot {
        MetricsSnapshot {
            reviews_started: self.reviews_started.load(Ordering::Relaxed),
            reviews_completed: self.reviews_completed.load(Ordering::Relaxed),
            reviews_aborted: self.reviews_aborted.load(Ordering::Relaxed),
            global_timeouts: self.global_timeouts.load(Ordering::Relaxed),
            client_disconnects: self.client_disconnects.load(Ordering::Relaxed),
            degraded_stages: self.degraded_stages.load(Ordering::Relaxed),
            skipped_stages: self.skipped_stages.load(Ordering::Relaxed),
            embedding_transport: breaker.state().as_str(),
            embedding_transport_reason: breaker.reason().map(str::to_string),
        }
    }
}

/// Immutable view of review counters used for reporting.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Reviews accepted since startup.
    pub reviews_started: u64,
    /// Reviews that delivered a report.
    pub reviews_completed: u64,
    /// Reviews that stopped early for any reason.
    pub reviews_aborted: u64,
    /// Aborts caused by the global deadline.
    pub global_timeouts: u64,
    /// Aborts caused by the client going away.
    pub client_disconnects: u64,
    /// Stages that continued on a substitute value.
    pub degraded_stages: u64,
    /// Stages that were skipped.
    pub skipped_stages: u64,
    /// Embedding transport in force: `batch` or `per_item`.
    pub embedding_transport: &'static str,
    /// Why the batch transport was abandoned, once it has been.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_transport_reason: Option<String>,
}
