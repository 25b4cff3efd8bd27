//! # A read-through cache with single-flight fetches
//!
//! [`Cache`] sits in front of a slow or expensive data source and guarantees that:
//!
//! - a value, once fetched, is reused by all readers until it expires, and
//! - concurrent requests for the same missing or expired key trigger exactly one underlying
//!   fetch, with all concurrent requesters receiving that fetch's result (value or error).
//!
//! The data source is supplied as a [`Fetcher`], most commonly a closure returning an [`Entry`],
//! which is the value together with the instant it expires at.
//!
//! ```
//! use std::time::Duration;
//!
//! use readcache::{Cache, Entry};
//!
//! let cache = Cache::new(|key: &str| Ok(Entry::with_ttl(key.len(), Duration::from_secs(60))));
//! assert_eq!(cache.get("hello").unwrap(), 5);
//! ```
//!
//! ## Layers
//!
//! A `get` goes through the following steps:
//!
//! - First, the entry store is consulted. A live entry is returned right away, without ever
//!   calling the fetcher. An expired entry is removed at this point.
//! - On miss, the fetch arbitrator is asked for the fetch token of the key. If a fetch is already
//!   in flight, its token is shared. Otherwise the store is checked once more while the registry
//!   of tokens is locked, as a concurrent fetch may have completed in the meantime, and only then
//!   a new token is created.
//! - Exactly one holder of a token runs the fetch, stores a successful result, and removes the
//!   token. All other holders wait on the token and receive the same result.
//!
//! Errors are never cached. A failed fetch is reported to everybody waiting on it, and the next
//! `get` for that key will fetch again.
//!
//! ## Purging
//!
//! There is no background expiration. Expired entries are removed when read, or explicitly via
//! [`Cache::purge_expired`]. To bound the number of entries, a [`PurgePolicy`] can be configured,
//! evicting the oldest inserted entries once a high-water mark is reached.
//!
//! ## Metrics
//!
//! The following metrics are emitted once [`metrics::configure_statsd`] was called, each tagged
//! with the `cache` name:
//!
//! - `caches.access`: All accesses.
//! - `caches.memory.hit`: Accesses served by a live entry.
//! - `caches.computation`: Actual fetches being run.
//! - `caches.coalesced`: Accesses that waited on a fetch run by somebody else.
//! - `caches.fetch.error`: Failed fetches.
//! - `caches.fetch.duration`: A timer for fetches.
//! - `caches.purge`: Entries evicted by the purge policy.
//!
//! The same counters are available in-process via [`Cache::stats`].

#[macro_use]
pub mod metrics;

mod arbitrator;
mod cache;
mod config;
mod defer;
mod entry;
mod error;
mod gate;
mod purge;
mod stats;
mod store;

pub use cache::{Cache, Fetcher};
pub use config::Config;
pub use entry::Entry;
pub use error::{BoxError, CacheError, ConfigError};
pub use purge::PurgePolicy;
pub use stats::CacheStats;
