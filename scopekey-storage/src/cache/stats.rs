//! Digest cache statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of digest cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Digests served from the store.
    pub hits: u64,
    /// Digests computed because the store had no fresh entry.
    pub misses: u64,
    /// Digests computed with no store configured.
    pub pass_through: u64,
    /// Expired entries re-armed for the race window before recomputing.
    pub race_refreshes: u64,
    /// Store reads or writes that failed and were treated as misses.
    pub store_errors: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0) over cached lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Database round-trips issued so far.
    pub fn queries(&self) -> u64 {
        self.misses + self.pass_through
    }
}

/// Shared counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub pass_through: AtomicU64,
    pub race_refreshes: AtomicU64,
    pub store_errors: AtomicU64,
}

impl StatsCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pass_through: self.pass_through.load(Ordering::Relaxed),
            race_refreshes: self.race_refreshes.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}
