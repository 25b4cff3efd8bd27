//! A barrier that runs its guarded action exactly once.

use parking_lot::{Condvar, Mutex};

use crate::defer::defer;

#[derive(Debug)]
enum State<T> {
    /// Nobody has triggered the gate yet.
    Idle,
    /// The guarded action is running.
    Running,
    /// The action finished. `None` means it unwound without producing a result.
    Done(Option<T>),
}

/// How a caller made it through a [`Gate`].
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Passage<T> {
    /// This caller ran the guarded action and got its result.
    Ran(T),
    /// Another caller ran the action; this one waited for it to finish.
    Waited(Option<T>),
}

/// Runs a guarded action exactly once across any number of concurrent triggers.
///
/// The first caller of [`run_or_wait`](Self::run_or_wait) runs the action; every other caller
/// blocks until it has finished and then receives a clone of its result. The result is stored
/// before waiters are woken up, so they need no further synchronization to observe it.
///
/// If the action panics, the gate still opens, handing `None` to all waiters. The panic itself
/// propagates to the caller that ran the action.
#[derive(Debug)]
pub(crate) struct Gate<T> {
    state: Mutex<State<T>>,
    opened: Condvar,
}

impl<T: Clone> Gate<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Idle),
            opened: Condvar::new(),
        }
    }

    /// Runs `action` if nobody has yet, otherwise waits for its result.
    pub fn run_or_wait<F: FnOnce() -> T>(&self, action: F) -> Passage<T> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                State::Idle => break,
                State::Running => {}
                State::Done(outcome) => return Passage::Waited(outcome.clone()),
            }
            self.opened.wait(&mut state);
        }
        *state = State::Running;
        drop(state);

        // opens the gate with no result if `action` unwinds
        let unwind_guard = defer(|| self.open(None));
        let result = action();
        unwind_guard.cancel();

        self.open(Some(result.clone()));
        Passage::Ran(result)
    }

    fn open(&self, outcome: Option<T>) {
        *self.state.lock() = State::Done(outcome);
        self.opened.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_runs_once() {
        let gate = Gate::new();
        assert_eq!(gate.run_or_wait(|| 1), Passage::Ran(1));
        assert_eq!(gate.run_or_wait(|| 2), Passage::Waited(Some(1)));
    }

    #[test]
    fn test_concurrent_triggers_share_result() {
        let gate = Gate::new();
        let runs = AtomicUsize::new(0);
        let barrier = Barrier::new(16);

        let passages: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    s.spawn(|| {
                        barrier.wait();
                        gate.run_or_wait(|| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            "done"
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        let ran = passages
            .iter()
            .filter(|p| matches!(p, Passage::Ran("done")))
            .count();
        let waited = passages
            .iter()
            .filter(|p| matches!(p, Passage::Waited(Some("done"))))
            .count();
        assert_eq!((ran, waited), (1, 15));
    }

    #[test]
    fn test_panicking_action_opens_gate() {
        let gate = Gate::<u32>::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            gate.run_or_wait(|| panic!("fetch exploded"))
        }));
        assert!(result.is_err());

        assert_eq!(gate.run_or_wait(|| 1), Passage::Waited(None));
    }
}
