//! Single-assignment result cell with blocking and async retrieval.
//!
//! A [`Promise`] is settled exactly once, by [`resolve`](Promise::resolve)
//! or [`reject`](Promise::reject). Settling twice is a programming error
//! and panics immediately; the first outcome is never overwritten.
//!
//! Any number of clones may wait for the outcome concurrently and all of
//! them observe the same value. A bounded wait that gives up
//! ([`get_timeout`](Promise::get_timeout)) does not consume anything: a
//! later `get` still sees the eventual outcome.
//!
//! # Example
//!
//! ```ignore
//! use pipewright::sync::Promise;
//!
//! let promise = Promise::new();
//! let writer = promise.clone();
//! std::thread::spawn(move || writer.resolve(42));
//! assert_eq!(promise.get()?, 42);
//! ```

use super::wait_queue::{WaitQueue, wake_all};
use crate::error::Error;
use crate::runtime::block_on;
use crate::time::timeout;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

struct State<T> {
    outcome: Option<Result<T, Error>>,
    settled: bool,
    waiters: WaitQueue,
}

/// A write-once asynchronous result cell.
pub struct Promise<T> {
    state: Arc<Mutex<State<T>>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Promise")
            .field("settled", &state.settled)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}

impl<T> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Promise<T> {
    /// Creates an unsettled promise.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                outcome: None,
                settled: false,
                waiters: WaitQueue::new(),
            })),
        }
    }

    /// Settles the promise with a value.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already settled.
    pub fn resolve(&self, value: T) {
        self.settle(Ok(value));
    }

    /// Settles the promise with an error.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already settled.
    pub fn reject(&self, error: Error) {
        self.settle(Err(error));
    }

    /// Returns true once the promise has been settled.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.lock().settled
    }

    fn settle(&self, outcome: Result<T, Error>) {
        let mut state = self.state.lock();
        assert!(!state.settled, "promise settled twice");
        state.settled = true;
        state.outcome = Some(outcome);
        let batch = state.waiters.take_all();
        drop(state);
        wake_all(batch);
    }

    /// Moves the outcome out; used by the sole consumer of a task result.
    pub(crate) fn poll_take(
        &self,
        cx: &mut Context<'_>,
        key: &mut Option<usize>,
    ) -> Poll<Result<T, Error>> {
        let mut state = self.state.lock();
        if let Some(outcome) = state.outcome.take() {
            state.waiters.deregister(key);
            return Poll::Ready(outcome);
        }
        if state.settled {
            state.waiters.deregister(key);
            return Poll::Ready(Err(Error::InvalidState {
                expected: "unconsumed promise",
                actual: "consumed promise",
            }));
        }
        state.waiters.register(key, cx.waker());
        Poll::Pending
    }

    pub(crate) fn release(&self, key: &mut Option<usize>) {
        if key.is_some() {
            self.state.lock().waiters.deregister(key);
        }
    }
}

impl<T: Clone> Promise<T> {
    /// Waits asynchronously for the outcome.
    pub fn wait(&self) -> Wait<'_, T> {
        Wait {
            promise: self,
            key: None,
        }
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// Do not call this from inside a runtime task; await [`wait`](Self::wait)
    /// instead.
    pub fn get(&self) -> Result<T, Error> {
        block_on(self.wait())
    }

    /// Blocks for at most `window`, failing with [`Error::Timeout`] if the
    /// promise is still unsettled. The eventual outcome is not lost.
    pub fn get_timeout(&self, window: Duration) -> Result<T, Error> {
        block_on(timeout(window, self.wait()))?
    }

    /// Returns the outcome if already settled.
    #[must_use]
    pub fn try_get(&self) -> Option<Result<T, Error>> {
        self.state.lock().outcome.clone()
    }
}

/// Future returned by [`Promise::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<'a, T> {
    promise: &'a Promise<T>,
    key: Option<usize>,
}

impl<T: Clone> Future for Wait<'_, T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let mut state = this.promise.state.lock();
        if let Some(outcome) = state.outcome.as_ref() {
            let outcome = outcome.clone();
            state.waiters.deregister(&mut this.key);
            return Poll::Ready(outcome);
        }
        state.waiters.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl<T> Drop for Wait<'_, T> {
    fn drop(&mut self) {
        self.promise.release(&mut self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::time::Instant;

    #[test]
    fn resolve_then_get_returns_value() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("resolve_then_get_returns_value");
        let promise = Promise::new();
        promise.resolve(5);
        assert!(promise.is_ready());
        assert_eq!(promise.get().expect("resolved"), 5);
        assert_eq!(promise.get().expect("still resolved"), 5);
        crate::test_complete!("resolve_then_get_returns_value");
    }

    #[test]
    fn reject_then_get_returns_error() {
        let promise: Promise<i32> = Promise::new();
        promise.reject(Error::ChannelClosed);
        let err = promise.get().expect_err("rejected");
        assert_eq!(err.kind(), ErrorKind::ChannelClosed);
    }

    #[test]
    #[should_panic(expected = "promise settled twice")]
    fn second_settle_panics() {
        let promise = Promise::new();
        promise.resolve(1);
        promise.resolve(2);
    }

    #[test]
    fn timeout_then_late_resolution_still_observed() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("timeout_then_late_resolution_still_observed");
        let promise: Promise<&'static str> = Promise::new();
        let start = Instant::now();
        let err = promise
            .get_timeout(Duration::from_millis(30))
            .expect_err("unsettled");
        crate::assert_with_log!(
            err.kind() == ErrorKind::Timeout,
            "timeout kind",
            ErrorKind::Timeout,
            err.kind()
        );
        assert!(start.elapsed() >= Duration::from_millis(30));

        let writer = promise.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            writer.resolve("late");
        });
        assert_eq!(promise.get().expect("late value"), "late");
        handle.join().expect("writer thread");
        crate::test_complete!("timeout_then_late_resolution_still_observed");
    }

    #[test]
    fn concurrent_getters_observe_same_outcome() {
        let promise: Promise<u64> = Promise::new();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reader = promise.clone();
                std::thread::spawn(move || reader.get())
            })
            .collect();
        std::thread::sleep(Duration::from_millis(10));
        promise.resolve(99);
        for reader in readers {
            assert_eq!(reader.join().expect("reader").expect("value"), 99);
        }
    }

    #[test]
    fn try_get_before_and_after() {
        let promise = Promise::new();
        assert!(promise.try_get().is_none());
        promise.resolve(String::from("done"));
        assert_eq!(
            promise.try_get().map(|r| r.expect("ok")),
            Some(String::from("done"))
        );
    }
}
