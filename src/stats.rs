//! Lifetime tallies of guarded calls.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counts every call the breaker has seen since it was built.
///
/// Unlike the per-window counters these are never reset.
#[derive(Debug, Default)]
pub(crate) struct BreakerStats {
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    cancellations: AtomicU64,
}

impl BreakerStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejection(&self) {
        self.rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// A cancelled call is also counted as a failure.
    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn totals(&self) -> Totals {
        Totals {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`BreakerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Calls whose operation succeeded.
    pub successes: u64,
    /// Calls whose operation failed or was cancelled.
    pub failures: u64,
    /// Calls short-circuited while open.
    pub rejections: u64,
    /// Calls dropped while the operation was in flight.
    pub cancellations: u64,
}

impl Totals {
    /// Completed invocations of the operation.
    pub fn total_calls(&self) -> u64 {
        self.successes + self.failures
    }
}
