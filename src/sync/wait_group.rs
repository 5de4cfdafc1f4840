//! Join barrier counting outstanding work.

use super::wait_queue::{WaitQueue, wake_all};
use crate::runtime::block_on;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Debug)]
struct State {
    pending: usize,
    waiters: WaitQueue,
}

/// Counts outstanding units of work; waiters resume once the count
/// reaches zero.
///
/// ```ignore
/// let group = WaitGroup::new();
/// group.add(jobs.len());
/// for job in jobs {
///     let group = group.clone();
///     handle.spawn(async move {
///         process(job);
///         group.done();
///     });
/// }
/// group.wait().await;
/// ```
#[derive(Debug, Clone)]
pub struct WaitGroup {
    state: Arc<Mutex<State>>,
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitGroup {
    /// Creates a group with nothing outstanding.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                pending: 0,
                waiters: WaitQueue::new(),
            })),
        }
    }

    /// Registers `count` more units of work.
    pub fn add(&self, count: usize) {
        self.state.lock().pending += count;
    }

    /// Marks one unit of work finished.
    ///
    /// # Panics
    ///
    /// Panics if called more often than work was added.
    pub fn done(&self) {
        let mut state = self.state.lock();
        assert!(state.pending > 0, "WaitGroup::done called with no pending work");
        state.pending -= 1;
        if state.pending == 0 {
            let batch = state.waiters.take_all();
            drop(state);
            wake_all(batch);
        }
    }

    /// Number of outstanding units.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.state.lock().pending
    }

    /// Resolves once nothing is outstanding.
    pub fn wait(&self) -> WaitGroupWait<'_> {
        WaitGroupWait {
            group: self,
            key: None,
        }
    }

    /// Blocks the calling thread until nothing is outstanding.
    pub fn wait_blocking(&self) {
        block_on(self.wait());
    }
}

/// Future returned by [`WaitGroup::wait`].
#[must_use = "futures do nothing unless polled"]
pub struct WaitGroupWait<'a> {
    group: &'a WaitGroup,
    key: Option<usize>,
}

impl Future for WaitGroupWait<'_> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = &mut *self;
        let mut state = this.group.state.lock();
        if state.pending == 0 {
            state.waiters.deregister(&mut this.key);
            return Poll::Ready(());
        }
        state.waiters.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl Drop for WaitGroupWait<'_> {
    fn drop(&mut self) {
        if self.key.is_some() {
            self.group.state.lock().waiters.deregister(&mut self.key);
        }
    }
}
