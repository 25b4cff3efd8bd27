//! Helpers for testing the cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - Fetch functions passed to a cache have to be `'static`. Use a [`FetchCounter`] clone inside
//!    the fetch function, and keep the original around to assert on the number of fetches.
//!
//!  - Concurrency tests should use [`run_concurrently`], which releases all workers at once to
//!    maximize contention on the cache.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `readcache` crate and mutes all
///    other logs.
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("readcache=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Counts invocations of a fetch function across threads.
#[derive(Clone, Debug, Default)]
pub struct FetchCounter(Arc<AtomicUsize>);

impl FetchCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one invocation, returning how many happened before it.
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst)
    }

    /// The number of recorded invocations.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// An instant far enough in the future for entries never to expire during a test.
pub fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(100)
}

/// An instant that has already passed.
pub fn already_expired() -> Instant {
    Instant::now() - Duration::from_secs(1)
}

/// Runs `f` on `workers` threads at the same time, returning all results in worker order.
///
/// All threads wait on a barrier before calling `f`, so that they hit the cache together.
///
/// # Panics
///
/// Panics if any of the workers panics.
pub fn run_concurrently<F, R>(workers: usize, f: F) -> Vec<R>
where
    F: Fn(usize) -> R + Sync,
    R: Send,
{
    let barrier = Barrier::new(workers);
    thread::scope(|s| {
        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let barrier = &barrier;
                let f = &f;
                s.spawn(move || {
                    barrier.wait();
                    f(worker)
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker panicked"))
            .collect()
    })
}
