//! Task records and join handles.
//!
//! A task is a boxed future plus a `scheduled` flag. The task itself is the
//! waker: waking pushes it onto the runtime's injector queue unless it is
//! already queued. Completion (or a caught panic) settles the task's
//! [`Promise`], which is what the [`JoinHandle`] waits on.

use super::scheduler::Shared;
use crate::error::Error;
use crate::types::CancelReason;
use crate::sync::Promise;
use crate::tracing_compat::trace;
use parking_lot::Mutex;
use pin_project::pin_project;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Wake, Waker};

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Identifier assigned to every spawned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) key: usize,
    future: Mutex<Option<BoxFuture>>,
    scheduled: AtomicBool,
    shared: Weak<Shared>,
}

impl Task {
    pub(crate) fn new(id: TaskId, key: usize, future: BoxFuture, shared: Weak<Shared>) -> Self {
        Self {
            id,
            key,
            future: Mutex::new(Some(future)),
            // Born scheduled: the spawner pushes it onto the queue.
            scheduled: AtomicBool::new(true),
            shared,
        }
    }

    fn schedule(self: &Arc<Self>) {
        if self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(shared) = self.shared.upgrade() {
            if !shared.is_shutdown() {
                shared.push(Arc::clone(self));
            }
        }
    }

    /// Polls the task once. Returns true when the task has finished.
    pub(crate) fn run(self: &Arc<Self>) -> bool {
        self.scheduled.store(false, Ordering::Release);
        let mut slot = self.future.lock();
        let Some(future) = slot.as_mut() else {
            return false;
        };
        let waker = Waker::from(Arc::clone(self));
        let mut cx = Context::from_waker(&waker);
        if future.as_mut().poll(&mut cx).is_ready() {
            *slot = None;
            trace!(task = %self.id, "task finished");
            return true;
        }
        // The poll itself may have shut the runtime down; `abort` could not
        // take the future while it was being polled.
        if self.shared.upgrade().is_none_or(|shared| shared.is_shutdown()) {
            *slot = None;
            trace!(task = %self.id, "task dropped after shutdown");
        }
        false
    }

    /// Takes the future so it is never polled again.
    ///
    /// Returns `None` if the task already finished or is being polled right
    /// now; in the latter case `run` drops the future once the poll returns.
    pub(crate) fn abort(&self) -> Option<BoxFuture> {
        self.future.try_lock().and_then(|mut slot| slot.take())
    }
}

impl Wake for Task {
    fn wake(self: Arc<Self>) {
        self.schedule();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.schedule();
    }
}

/// Future adapter that turns a panic during `poll` into an `Err`.
#[pin_project]
pub(crate) struct CatchUnwind<F> {
    #[pin]
    future: F,
}

impl<F> CatchUnwind<F> {
    pub(crate) fn new(future: F) -> Self {
        Self { future }
    }
}

impl<F: Future> Future for CatchUnwind<F> {
    type Output = Result<F::Output, Box<dyn Any + Send>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let future = self.project().future;
        match catch_unwind(AssertUnwindSafe(|| future.poll(cx))) {
            Ok(Poll::Ready(value)) => Poll::Ready(Ok(value)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(payload)),
        }
    }
}

/// Handle to a spawned task's output.
///
/// Awaiting the handle (or calling [`join`](Self::join)) yields the task's
/// output, or [`Error::Panicked`] if the task panicked. Dropping the handle
/// detaches the task; it keeps running to completion.
#[must_use = "dropping a JoinHandle detaches the task"]
pub struct JoinHandle<T> {
    id: TaskId,
    promise: Promise<T>,
    key: Option<usize>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, promise: Promise<T>) -> Self {
        Self {
            id,
            promise,
            key: None,
        }
    }

    /// The id of the task this handle refers to.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns true once the task has produced its output.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.promise.is_ready()
    }

    /// Blocks the calling thread until the task finishes.
    pub fn join(self) -> Result<T, Error> {
        super::block_on(self)
    }
}

impl<T> fmt::Debug for JoinHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("finished", &self.is_finished())
            .finish()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, Error>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        this.promise.poll_take(cx, &mut this.key)
    }
}

impl<T> Drop for JoinHandle<T> {
    fn drop(&mut self) {
        self.promise.release(&mut self.key);
    }
}

/// Rejects the task's promise if the task is dropped before finishing.
struct SettleOnDrop<T> {
    promise: Option<Promise<T>>,
}

impl<T> Drop for SettleOnDrop<T> {
    fn drop(&mut self) {
        if let Some(promise) = self.promise.take() {
            promise.reject(Error::Cancelled(CancelReason::shutdown()));
        }
    }
}

/// Wraps a user future so its output (or panic) settles `promise`.
pub(crate) fn wrap<F, T, C>(future: F, promise: Promise<T>, convert: C) -> BoxFuture
where
    F: Future + Send + 'static,
    T: Send + 'static,
    C: FnOnce(F::Output) -> Result<T, Error> + Send + 'static,
{
    // Built outside the async block so it also fires if the future is
    // dropped before its first poll.
    let guard = SettleOnDrop {
        promise: Some(promise),
    };
    Box::pin(async move {
        let mut guard = guard;
        let outcome = CatchUnwind::new(future).await;
        if let Some(promise) = guard.promise.take() {
            match outcome.map(convert) {
                Ok(Ok(value)) => promise.resolve(value),
                Ok(Err(err)) => promise.reject(err),
                Err(payload) => promise.reject(Error::from_panic(&*payload)),
            }
        }
    })
}
