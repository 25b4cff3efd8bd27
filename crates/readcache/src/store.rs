//! The entry store, holding fetched values until they expire.
//!
//! Expiration is lazy: there is no background sweep, an expired entry is removed by the first
//! reader noticing it (or by an explicit [`EntryStore::retain_live`]).

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use parking_lot::{RwLock, RwLockReadGuard};

use crate::entry::Entry;
use crate::purge::PurgePolicy;

/// A stored entry, tagged with the sequence number of its insertion.
#[derive(Debug)]
struct Slot<V> {
    entry: Entry<V>,
    seq: u64,
}

/// The state guarded by the store lock.
#[derive(Debug)]
pub(crate) struct Entries<V> {
    slots: HashMap<String, Slot<V>>,
    /// Keys by insertion sequence, oldest first. Drives purge eviction order.
    insertion_order: BTreeMap<u64, String>,
    next_seq: u64,
    policy: PurgePolicy,
    /// Total number of entries evicted by purges.
    purged: u64,
}

impl<V> Entries<V> {
    fn live(&self, key: &str, now: Instant) -> Option<&Entry<V>> {
        self.slots
            .get(key)
            .map(|slot| &slot.entry)
            .filter(|entry| entry.is_live_at(now))
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.slots.remove(key) {
            Some(slot) => {
                self.insertion_order.remove(&slot.seq);
                true
            }
            None => false,
        }
    }

    /// Evicts the oldest inserted entries until `len` entries are left.
    fn evict_to(&mut self, len: usize) -> usize {
        let mut evicted = 0;
        while self.slots.len() > len {
            let Some((_, key)) = self.insertion_order.pop_first() else {
                break;
            };
            self.slots.remove(&key);
            evicted += 1;
        }
        evicted
    }
}

/// Shared access to the store.
///
/// Holding one of these proves the store lock has been taken, which is what the
/// [`Registry`](crate::arbitrator::Registry) demands before it may be locked exclusively.
pub(crate) struct StoreReadGuard<'a, V>(RwLockReadGuard<'a, Entries<V>>);

impl<V> StoreReadGuard<'_, V> {
    /// Returns the entry for `key` if it is live at `now`. Never removes anything.
    pub fn live(&self, key: &str, now: Instant) -> Option<&Entry<V>> {
        self.0.live(key, now)
    }
}

/// A key-value store of [`Entry`]s behind a single reader/writer lock.
#[derive(Debug)]
pub(crate) struct EntryStore<V> {
    /// The cache name, used to tag metrics.
    name: String,
    inner: RwLock<Entries<V>>,
}

impl<V: Clone> EntryStore<V> {
    pub fn new(name: &str, policy: PurgePolicy) -> Self {
        Self {
            name: name.to_owned(),
            inner: RwLock::new(Entries {
                slots: HashMap::new(),
                insertion_order: BTreeMap::new(),
                next_seq: 0,
                policy,
                purged: 0,
            }),
        }
    }

    /// Takes the store lock in shared mode.
    pub fn read(&self) -> StoreReadGuard<'_, V> {
        StoreReadGuard(self.inner.read())
    }

    /// Returns the entry for `key` if it has not expired yet.
    ///
    /// An expired entry is removed, unless a concurrent writer refreshed it between the shared
    /// read and taking the exclusive lock, in which case the refreshed entry is returned.
    pub fn try_get(&self, key: &str) -> Option<Entry<V>> {
        let now = Instant::now();
        {
            let entries = self.inner.read();
            match entries.slots.get(key) {
                None => return None,
                Some(slot) if slot.entry.is_live_at(now) => return Some(slot.entry.clone()),
                Some(_) => {}
            }
        }

        self.recheck_expired(key, now)
    }

    /// Removes the entry for `key`, which was seen expired at `now` under the shared lock.
    ///
    /// The entry may have been replaced in the meantime. A live replacement is returned and kept.
    fn recheck_expired(&self, key: &str, now: Instant) -> Option<Entry<V>> {
        let mut entries = self.inner.write();
        if let Some(entry) = entries.live(key, now) {
            return Some(entry.clone());
        }
        if entries.remove(key) {
            tracing::trace!(key, "Removed expired entry");
        }
        None
    }

    /// Inserts or replaces the entry for `key`, then purges if the store grew too large.
    ///
    /// Returns the number of entries evicted by the purge.
    pub fn put(&self, key: &str, entry: Entry<V>) -> usize {
        let mut guard = self.inner.write();
        let entries = &mut *guard;

        let seq = entries.next_seq;
        entries.next_seq += 1;
        if let Some(previous) = entries.slots.insert(key.to_owned(), Slot { entry, seq }) {
            entries.insertion_order.remove(&previous.seq);
        }
        entries.insertion_order.insert(seq, key.to_owned());

        let len = entries.slots.len();
        let target = entries.policy.target_len(len);
        match target {
            Some(target) => {
                let evicted = entries.evict_to(target);
                entries.purged += evicted as u64;
                drop(guard);

                tracing::debug!(cache = %self.name, len, target, evicted, "Purged oldest entries");
                metric!(counter("caches.purge") += evicted as i64, "cache" => &self.name);
                evicted
            }
            None => 0,
        }
    }

    /// Removes the entry for `key`, returning whether there was one.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.write().remove(key)
    }

    /// Removes all entries.
    pub fn clear(&self) {
        let mut entries = self.inner.write();
        entries.slots.clear();
        entries.insertion_order.clear();
    }

    /// Removes all entries that have expired by now, returning how many were removed.
    pub fn retain_live(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.write();
        let expired: Vec<_> = entries
            .slots
            .iter()
            .filter(|(_, slot)| !slot.entry.is_live_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired.len()
    }

    /// The total number of entries evicted by purges so far.
    pub fn purged(&self) -> u64 {
        self.inner.read().purged
    }

    /// The number of stored entries, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
