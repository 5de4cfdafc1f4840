//! Synchronization primitives for tasks.
//!
//! - [`Semaphore`]: bounds concurrency; acquisition races a cancel token
//! - [`WaitGroup`]: join barrier over a count of outstanding work
//! - [`Promise`]: write-once result cell with blocking and async retrieval
//!
//! All of them park tasks through the same internal waker registry and
//! never block a worker thread.

mod promise;
mod semaphore;
mod wait_group;
pub(crate) mod wait_queue;

pub use promise::{Promise, Wait};
pub use semaphore::{
    Acquire, AcquireError, OwnedSemaphorePermit, Semaphore, SemaphorePermit, TryAcquireError,
};
pub use wait_group::{WaitGroup, WaitGroupWait};
