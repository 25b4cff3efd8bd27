use std::fmt;
use std::time::Instant;

use crate::arbitrator::{self, Acquired, Registry};
use crate::config::Config;
use crate::entry::Entry;
use crate::error::{BoxError, CacheError, ConfigError};
use crate::gate::Passage;
use crate::stats::{CacheStats, Counters};
use crate::store::EntryStore;

/// The backing data source of a [`Cache`].
///
/// This is implemented for all closures taking a key and returning an [`Entry`].
pub trait Fetcher<V>: Send + Sync {
    /// Fetches the value for `key`, together with the instant it expires at.
    ///
    /// This is called synchronously by whichever caller of [`Cache::get`] ends up driving the
    /// fetch, and no timeout is imposed on it. Returned errors are never cached.
    fn fetch(&self, key: &str) -> Result<Entry<V>, BoxError>;
}

impl<V, F> Fetcher<V> for F
where
    F: Fn(&str) -> Result<Entry<V>, BoxError> + Send + Sync,
{
    fn fetch(&self, key: &str) -> Result<Entry<V>, BoxError> {
        self(key)
    }
}

/// A read-through cache with per-entry expiration and single-flight fetches.
///
/// Values are fetched on demand via the [`Fetcher`] supplied at construction and reused by all
/// readers until they expire. Concurrent [`get`](Self::get)s for the same missing or expired key
/// trigger exactly one fetch, and all of them receive that fetch's result, be it a value or an
/// error.
///
/// The cache owns no threads. Callers bring their own concurrency, and a caller blocks only on
/// the internal locks or while waiting for a fetch run by another caller. There is no timeout:
/// a fetch that never returns blocks every caller waiting on that key.
pub struct Cache<V> {
    config: Config,
    fetcher: Box<dyn Fetcher<V>>,
    store: EntryStore<V>,
    registry: Registry<V>,
    counters: Counters,
}

impl<V> fmt::Debug for Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("config", &self.config)
            .field("entries", &self.store.len())
            .field("in-flight fetches", &self.registry.in_flight())
            .finish()
    }
}

impl<V> Cache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a cache with the default configuration, fetching values via `fetch`.
    pub fn new<F>(fetch: F) -> Self
    where
        F: Fn(&str) -> Result<Entry<V>, BoxError> + Send + Sync + 'static,
    {
        Self::build(Config::default(), Box::new(fetch))
    }

    /// Creates a cache with the given configuration, fetching values via `fetch`.
    pub fn with_config<F>(config: Config, fetch: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Entry<V>, BoxError> + Send + Sync + 'static,
    {
        Self::with_fetcher(config, fetch)
    }

    /// Creates a cache with the given configuration and [`Fetcher`].
    pub fn with_fetcher(
        config: Config,
        fetcher: impl Fetcher<V> + 'static,
    ) -> Result<Self, ConfigError> {
        config.purge.validate()?;
        Ok(Self::build(config, Box::new(fetcher)))
    }

    fn build(config: Config, fetcher: Box<dyn Fetcher<V>>) -> Self {
        let store = EntryStore::new(&config.name, config.purge);
        Self {
            config,
            fetcher,
            store,
            registry: Registry::new(),
            counters: Counters::default(),
        }
    }

    /// The name of this cache, as used in logs and metrics.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the value for `key`, fetching it if there is no live entry.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::FetchFailed`] if the fetch this call ran or waited on failed. The
    /// error is not cached: the next call for the same key fetches again.
    ///
    /// Returns [`CacheError::InternalError`] if the fetch this call waited on panicked.
    pub fn get(&self, key: &str) -> Result<V, CacheError> {
        let name = self.name();
        Counters::incr(&self.counters.accesses);
        metric!(counter("caches.access") += 1, "cache" => name);

        if let Some(entry) = self.store.try_get(key) {
            return Ok(self.hit(key, entry));
        }

        let token = match arbitrator::acquire(&self.store, &self.registry, key) {
            Acquired::Cached(entry) => return Ok(self.hit(key, entry)),
            Acquired::Fetch(token) => token,
        };

        let passage =
            arbitrator::run_exclusive(&token, &self.store, &self.registry, |key| self.fetch(key));

        let outcome = match passage {
            Passage::Ran(outcome) => outcome,
            Passage::Waited(outcome) => {
                Counters::incr(&self.counters.coalesced);
                metric!(counter("caches.coalesced") += 1, "cache" => name);
                tracing::trace!(cache = name, key = token.key(), "Waited on concurrent fetch");

                outcome.unwrap_or_else(|| {
                    tracing::error!(
                        cache = name,
                        key = token.key(),
                        "Concurrent fetch did not complete"
                    );
                    Err(CacheError::InternalError)
                })
            }
        };

        outcome.map(Entry::into_value)
    }

    fn hit(&self, key: &str, entry: Entry<V>) -> V {
        Counters::incr(&self.counters.hits);
        metric!(counter("caches.memory.hit") += 1, "cache" => self.name());
        tracing::trace!(cache = self.name(), key, "Cache hit");
        entry.into_value()
    }

    /// Invokes the fetcher. Only ever called by the caller driving a fetch token.
    fn fetch(&self, key: &str) -> Result<Entry<V>, BoxError> {
        let name = self.name();
        Counters::incr(&self.counters.fetches);
        metric!(counter("caches.computation") += 1, "cache" => name);
        tracing::debug!(cache = name, key, "Fetching");

        let start = Instant::now();
        let result = self.fetcher.fetch(key);
        metric!(timer("caches.fetch.duration") = start.elapsed(), "cache" => name);

        if let Err(err) = &result {
            Counters::incr(&self.counters.fetch_errors);
            metric!(counter("caches.fetch.error") += 1, "cache" => name);
            tracing::warn!(cache = name, key, error = %err, "Fetch failed");
        }
        result
    }

    /// Removes the entry for `key`, so that the next `get` fetches it again.
    ///
    /// A fetch currently in flight for `key` is not affected and will still store its result.
    pub fn invalidate(&self, key: &str) -> bool {
        self.store.remove(key)
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Removes all expired entries, returning how many were removed.
    ///
    /// Expired entries are otherwise only removed when they are read.
    pub fn purge_expired(&self) -> usize {
        self.store.retain_live()
    }

    /// The number of stored entries, including expired ones that were not yet removed.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Returns a snapshot of the cache's counters.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(
            self.store.purged(),
            self.store.len(),
            self.registry.in_flight(),
        )
    }
}
