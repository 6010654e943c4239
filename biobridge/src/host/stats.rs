//! Bridge counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of bridge activity across attach cycles.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BridgeStats {
    /// Requests received from miniapps.
    pub received: u64,
    /// Requests answered with a result.
    pub responded: u64,
    /// Requests answered with an error.
    pub rejected: u64,
    /// Permission prompts shown.
    pub permission_prompts: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    received: AtomicU64,
    responded: AtomicU64,
    rejected: AtomicU64,
    permission_prompts: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn settled(&self, ok: bool) {
        let counter = if ok { &self.responded } else { &self.rejected };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn permission_prompt(&self) {
        self.permission_prompts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BridgeStats {
        BridgeStats {
            received: self.received.load(Ordering::Relaxed),
            responded: self.responded.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            permission_prompts: self.permission_prompts.load(Ordering::Relaxed),
        }
    }
}
