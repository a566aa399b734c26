use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing code-hash recovery outcomes.
///
/// One instance is handed to every reader that performs recovery, so concurrent block
/// executions can either share counters or keep their own.
#[derive(Debug, Default)]
pub struct RecoveryMetrics {
    candidates: AtomicU64,
    pointer_hits: AtomicU64,
    latest_code_hits: AtomicU64,
    rejected_blobs: AtomicU64,
    misses: AtomicU64,
}

/// Point-in-time copy of [`RecoveryMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records that announced a code hash but decoded as code-less
    pub candidates: u64,
    /// Recoveries served by the legacy code-pointer table
    pub pointer_hits: u64,
    /// Recoveries served by the latest-code store
    pub latest_code_hits: u64,
    /// Probed blobs that turned out not to be delegations
    pub rejected_blobs: u64,
    /// Candidates left code-less
    pub misses: u64,
}

impl RecoveryMetrics {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads all counters.
    pub fn stats(&self) -> RecoveryStats {
        RecoveryStats {
            candidates: self.candidates.load(Ordering::Relaxed),
            pointer_hits: self.pointer_hits.load(Ordering::Relaxed),
            latest_code_hits: self.latest_code_hits.load(Ordering::Relaxed),
            rejected_blobs: self.rejected_blobs.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_candidate(&self) {
        self.candidates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pointer_hit(&self) {
        self.pointer_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_latest_code_hit(&self) {
        self.latest_code_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected_blob(&self) {
        self.rejected_blobs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }
}
