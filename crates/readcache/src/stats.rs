use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A point-in-time snapshot of a cache's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// All calls to `get`.
    pub accesses: u64,
    /// Accesses answered by a live entry, without waiting on a fetch.
    pub hits: u64,
    /// Fetch function invocations.
    pub fetches: u64,
    /// Accesses that waited on a fetch run by another caller.
    pub coalesced: u64,
    /// Fetch attempts that returned an error.
    pub fetch_errors: u64,
    /// Entries evicted by the purge policy.
    pub purged: u64,
    /// Entries currently stored, including expired ones not yet removed.
    pub entries: usize,
    /// Fetches currently in flight.
    pub in_flight: usize,
}

impl CacheStats {
    /// Accesses that had to fetch or wait on a fetch.
    pub fn misses(&self) -> u64 {
        self.accesses.saturating_sub(self.hits)
    }
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub accesses: AtomicU64,
    pub hits: AtomicU64,
    pub fetches: AtomicU64,
    pub coalesced: AtomicU64,
    pub fetch_errors: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, purged: u64, entries: usize, in_flight: usize) -> CacheStats {
        CacheStats {
            accesses: self.accesses.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            purged,
            entries,
            in_flight,
        }
    }
}
