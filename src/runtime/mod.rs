//! Task runtime: a fixed pool of worker threads executing lightweight tasks.
//!
//! Tasks only yield at their own suspension points (channel send/receive,
//! semaphore acquire, promise wait, token wait, timers). There is no
//! preemption: a synchronous work function occupies its worker until it
//! returns, so size the pool to the concurrency you expect to run. The
//! engine's own loops call [`yield_now`] every few dozen items.
//!
//! Spawning goes through a [`Handle`], which is cheap to clone and is
//! passed explicitly to the components that need to start tasks.
//!
//! # Example
//!
//! ```ignore
//! use pipewright::runtime::Runtime;
//!
//! let runtime = Runtime::builder().worker_threads(2).build()?;
//! let handle = runtime.spawn(async { 21 * 2 });
//! assert_eq!(handle.join()?, 42);
//! ```

mod block_on;
mod builder;
mod scheduler;
pub mod task;
pub mod timer;
mod yield_now;

pub use block_on::block_on;
pub use builder::RuntimeBuilder;
pub use task::{JoinHandle, TaskId};
pub use yield_now::{YieldNow, yield_now};
pub(crate) use yield_now::Budget;

use crate::error::Error;
use crate::sync::Promise;
use scheduler::Shared;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Cloneable spawn capability for a [`Runtime`].
#[derive(Clone)]
pub struct Handle {
    shared: Arc<Shared>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("live_tasks", &self.live_tasks())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl Handle {
    /// Spawns a task onto the runtime.
    ///
    /// After shutdown the task is dropped and the handle resolves to
    /// [`Error::Cancelled`] with a shutdown reason.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let promise = Promise::new();
        let boxed = task::wrap(future, promise.clone(), Ok);
        let id = self.shared.spawn(boxed).unwrap_or_else(TaskId::next);
        JoinHandle::new(id, promise)
    }

    /// Spawns a fallible task and returns a [`Promise`] settled with its
    /// outcome. A panic rejects the promise with [`Error::Panicked`].
    pub fn spawn_promise<T, F>(&self, future: F) -> Promise<T>
    where
        F: Future<Output = Result<T, Error>> + Send + 'static,
        T: Send + 'static,
    {
        let promise = Promise::new();
        let boxed = task::wrap(future, promise.clone(), |outcome| outcome);
        let _ = self.shared.spawn(boxed);
        promise
    }

    /// Number of spawned tasks that have not finished yet.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.shared.live_tasks()
    }

    /// Returns true once the owning runtime has begun shutting down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

/// A running worker pool.
///
/// Dropping the runtime stops the workers and drops every unfinished task;
/// their join handles resolve to a shutdown cancellation.
pub struct Runtime {
    handle: Handle,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("workers", &self.workers.len())
            .field("handle", &self.handle)
            .finish()
    }
}

impl Runtime {
    /// Starts a runtime with default settings.
    pub fn new() -> Result<Self, Error> {
        RuntimeBuilder::new().build()
    }

    /// Returns a builder for customizing the runtime.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Returns the spawn handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a task onto the runtime.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Drives `future` on the calling thread while workers run spawned tasks.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        block_on(future)
    }

    /// Number of spawned tasks that have not finished yet.
    #[must_use]
    pub fn live_tasks(&self) -> usize {
        self.handle.live_tasks()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_threads(&self) -> usize {
        self.workers.len()
    }

    /// Stops the workers and drops unfinished tasks.
    pub fn shutdown(self) {
        drop(self);
    }

    fn shutdown_inner(&mut self) {
        let shared = &self.handle.shared;
        shared.begin_shutdown();
        let current = std::thread::current().id();
        for worker in self.workers.drain(..) {
            // A runtime dropped from inside one of its own tasks cannot
            // join the worker it is running on.
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
        shared.drain();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown_inner();
    }
}
