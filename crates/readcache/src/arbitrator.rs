//! Single-flight arbitration of fetches.
//!
//! Among all callers that miss a live entry for the same key, exactly one gets to run the fetch
//! function. Everybody else holds on to the same [`FetchToken`] and waits for its outcome.
//!
//! # Lock ordering
//!
//! Whenever the entry store and the registry are locked together, the store is locked first. The
//! only operation doing so, [`Registry::claim`], takes a [`StoreReadGuard`] to make that order
//! impossible to get wrong. No registry method ever locks the store on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::defer::defer;
use crate::entry::Entry;
use crate::error::{BoxError, CacheError};
use crate::gate::{Gate, Passage};
use crate::store::{EntryStore, StoreReadGuard};

/// The outcome of a single fetch attempt, shared by everybody waiting on it.
pub(crate) type FetchOutcome<V> = Result<Entry<V>, CacheError>;

/// Represents one fetch in flight for a key.
#[derive(Debug)]
pub(crate) struct FetchToken<V> {
    key: String,
    gate: Gate<FetchOutcome<V>>,
}

impl<V: Clone> FetchToken<V> {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_owned(),
            gate: Gate::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// What a caller ends up with after [`acquire`].
pub(crate) enum Acquired<V> {
    /// A fetch finished while we were acquiring, and its entry is live.
    Cached(Entry<V>),
    /// The token to drive or wait on.
    Fetch(Arc<FetchToken<V>>),
}

/// Fetch tokens by key, present only while a fetch is in flight.
#[derive(Debug)]
pub(crate) struct Registry<V> {
    tokens: RwLock<HashMap<String, Arc<FetchToken<V>>>>,
}

impl<V: Clone> Registry<V> {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the token of a fetch currently in flight for `key`.
    pub fn lookup(&self, key: &str) -> Option<Arc<FetchToken<V>>> {
        self.tokens.read().get(key).cloned()
    }

    /// Decides under the exclusive registry lock whether the caller becomes the fetcher.
    ///
    /// A fetch may have completed, populated the store and released its token since the caller
    /// last looked, so the store is checked again before the registry.
    pub fn claim(&self, store: &StoreReadGuard<'_, V>, key: &str) -> Acquired<V> {
        let mut tokens = self.tokens.write();

        if let Some(entry) = store.live(key, Instant::now()) {
            return Acquired::Cached(entry.clone());
        }
        if let Some(token) = tokens.get(key) {
            return Acquired::Fetch(Arc::clone(token));
        }

        let token = Arc::new(FetchToken::new(key));
        tokens.insert(key.to_owned(), Arc::clone(&token));
        Acquired::Fetch(token)
    }

    fn release(&self, token: &FetchToken<V>) {
        let removed = self.tokens.write().remove(&token.key);
        debug_assert!(
            removed.is_some_and(|removed| std::ptr::eq(removed.as_ref(), token)),
            "released a fetch token that was not registered"
        );
    }

    /// The number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.tokens.read().len()
    }
}

/// Finds a live entry for `key`, or the token of the fetch that is going to produce one.
pub(crate) fn acquire<V: Clone>(
    store: &EntryStore<V>,
    registry: &Registry<V>,
    key: &str,
) -> Acquired<V> {
    if let Some(token) = registry.lookup(key) {
        return Acquired::Fetch(token);
    }

    let store = store.read();
    registry.claim(&store, key)
}

/// Runs `fetch` for the token's key, unless another caller already does so.
///
/// The caller that runs the fetch writes a successful result into the store. Errors are only
/// recorded on the token. Either way, the token is removed from the registry before the result
/// is handed out, so the next miss for the key starts a fresh fetch.
pub(crate) fn run_exclusive<V, F>(
    token: &FetchToken<V>,
    store: &EntryStore<V>,
    registry: &Registry<V>,
    fetch: F,
) -> Passage<FetchOutcome<V>>
where
    V: Clone,
    F: FnOnce(&str) -> Result<Entry<V>, BoxError>,
{
    token.gate.run_or_wait(|| {
        // released even if `fetch` panics
        let _release = defer(|| registry.release(token));

        match fetch(&token.key) {
            Ok(entry) => {
                store.put(&token.key, entry.clone());
                Ok(entry)
            }
            Err(err) => Err(CacheError::fetch_failed(err)),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::time::Duration;

    use super::*;
    use crate::purge::PurgePolicy;

    fn setup() -> (EntryStore<&'static str>, Registry<&'static str>) {
        (
            EntryStore::new("test", PurgePolicy::DISABLED),
            Registry::new(),
        )
    }

    fn expect_token<V>(acquired: Acquired<V>) -> Arc<FetchToken<V>> {
        match acquired {
            Acquired::Fetch(token) => token,
            Acquired::Cached(_) => panic!("expected a fetch token"),
        }
    }

    #[test]
    fn test_acquire_shares_token() {
        let (store, registry) = setup();

        let first = expect_token(acquire(&store, &registry, "k"));
        let second = expect_token(acquire(&store, &registry, "k"));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.key(), "k");
        assert_eq!(registry.in_flight(), 1);

        let other = expect_token(acquire(&store, &registry, "other"));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.in_flight(), 2);
    }

    #[test]
    fn test_claim_rechecks_store() {
        let (store, registry) = setup();
        store.put("k", Entry::with_ttl("foo", Duration::from_secs(100)));

        match acquire(&store, &registry, "k") {
            Acquired::Cached(entry) => assert_eq!(entry.value(), &"foo"),
            Acquired::Fetch(_) => panic!("expected the live entry"),
        }
        assert_eq!(registry.in_flight(), 0);
    }

    #[test]
    fn test_run_exclusive_success() {
        let (store, registry) = setup();
        let token = expect_token(acquire(&store, &registry, "k"));

        let passage = run_exclusive(&token, &store, &registry, |key| {
            assert_eq!(key, "k");
            Ok(Entry::with_ttl("foo", Duration::from_secs(100)))
        });
        match passage {
            Passage::Ran(Ok(entry)) => assert_eq!(entry.value(), &"foo"),
            _ => panic!("expected to run the fetch"),
        }

        assert_eq!(registry.in_flight(), 0);
        assert_eq!(store.try_get("k").unwrap().value(), &"foo");

        // a late waiter on the same token does not fetch again
        let passage = run_exclusive(&token, &store, &registry, |_| panic!("fetched twice"));
        assert!(matches!(passage, Passage::Waited(Some(Ok(_)))));
    }

    #[test]
    fn test_run_exclusive_error_is_not_stored() {
        let (store, registry) = setup();
        let token = expect_token(acquire(&store, &registry, "k"));

        let passage = run_exclusive(&token, &store, &registry, |_| Err("Error message".into()));
        match passage {
            Passage::Ran(Err(err)) => assert_eq!(err.to_string(), "Error message"),
            _ => panic!("expected a failed fetch"),
        }

        assert_eq!(registry.in_flight(), 0);
        assert!(store.is_empty());

        // the next miss gets a fresh token
        let next = expect_token(acquire(&store, &registry, "k"));
        assert!(!Arc::ptr_eq(&token, &next));
    }

    #[test]
    fn test_run_exclusive_releases_on_panic() {
        let (store, registry) = setup();
        let token = expect_token(acquire(&store, &registry, "k"));

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            run_exclusive(&token, &store, &registry, |_| panic!("fetch exploded"))
        }));
        assert!(result.is_err());
        assert_eq!(registry.in_flight(), 0);

        let passage = run_exclusive(&token, &store, &registry, |_| panic!("fetched twice"));
        assert!(matches!(passage, Passage::Waited(None)));
    }
}
