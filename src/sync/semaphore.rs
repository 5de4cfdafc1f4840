//! Counting semaphore with cancel-aware acquisition.
//!
//! A semaphore hands out at most `capacity` permits at a time. Acquisition
//! suspends while every permit is held and races the caller's
//! [`CancelToken`]: a cancelled wait gives up without taking a permit.
//! Permits are RAII guards, so they are returned on every exit path,
//! including a panic in the code holding them.
//!
//! # Example
//!
//! ```ignore
//! use pipewright::sync::Semaphore;
//!
//! let sem = Semaphore::new(2);
//! let permit = sem.acquire(&token).await?;
//! assert_eq!(sem.held(), 1);
//! drop(permit);
//! assert_eq!(sem.held(), 0);
//! ```

use super::wait_queue::{WaitQueue, wake_all};
use crate::cancel::{CancelToken, OrCancel};
use crate::error::Error;
use crate::types::CancelReason;
use parking_lot::Mutex;
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Error returned when semaphore acquisition fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    /// The semaphore was closed.
    #[error("semaphore closed")]
    Closed,
    /// The governing token finished while waiting.
    #[error("semaphore acquire cancelled: {0}")]
    Cancelled(CancelReason),
}

impl From<AcquireError> for Error {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Closed => Self::InvalidState {
                expected: "open semaphore",
                actual: "closed semaphore",
            },
            AcquireError::Cancelled(reason) => reason.into_error(),
        }
    }
}

/// Error returned when no permit is immediately available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("no semaphore permits available")]
pub struct TryAcquireError;

/// A counting semaphore for limiting concurrent access.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemaphoreState>,
    max_permits: usize,
}

#[derive(Debug)]
struct SemaphoreState {
    permits: usize,
    closed: bool,
    waiters: WaitQueue,
}

impl Semaphore {
    /// Creates a new semaphore with the given number of permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                closed: false,
                waiters: WaitQueue::new(),
            }),
            max_permits: permits,
        }
    }

    /// Returns the number of currently available permits.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Returns the number of permits currently held.
    #[must_use]
    pub fn held(&self) -> usize {
        self.max_permits - self.available_permits()
    }

    /// Returns the capacity.
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.max_permits
    }

    /// Returns true if the semaphore is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Closes the semaphore. Pending and future acquisitions fail with
    /// [`AcquireError::Closed`]; permits already held stay valid.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        let batch = state.waiters.take_all();
        drop(state);
        wake_all(batch);
    }

    /// Acquires one permit, waiting while all permits are held.
    pub fn acquire<'a>(&'a self, token: &'a CancelToken) -> Acquire<'a> {
        Acquire {
            inner: token.or_cancel(PermitWait {
                semaphore: self,
                key: None,
            }),
        }
    }

    /// Acquires one permit that owns a reference to the semaphore.
    pub async fn acquire_owned(
        self: Arc<Self>,
        token: &CancelToken,
    ) -> Result<OwnedSemaphorePermit, AcquireError> {
        let permit = self.acquire(token).await?;
        std::mem::forget(permit);
        Ok(OwnedSemaphorePermit { semaphore: self })
    }

    /// Tries to acquire one permit without waiting.
    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        let mut state = self.state.lock();
        if state.closed || state.permits == 0 {
            return Err(TryAcquireError);
        }
        state.permits -= 1;
        Ok(SemaphorePermit { semaphore: self })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.permits += 1;
        debug_assert!(state.permits <= self.max_permits);
        let batch = state.waiters.take_all();
        drop(state);
        wake_all(batch);
    }
}

/// Waits for a permit without regard to cancellation.
struct PermitWait<'a> {
    semaphore: &'a Semaphore,
    key: Option<usize>,
}

impl<'a> Future for PermitWait<'a> {
    type Output = Result<SemaphorePermit<'a>, AcquireError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        let semaphore = this.semaphore;
        let mut state = semaphore.state.lock();
        if state.closed {
            state.waiters.deregister(&mut this.key);
            return Poll::Ready(Err(AcquireError::Closed));
        }
        if state.permits > 0 {
            state.permits -= 1;
            state.waiters.deregister(&mut this.key);
            return Poll::Ready(Ok(SemaphorePermit { semaphore }));
        }
        state.waiters.register(&mut this.key, cx.waker());
        Poll::Pending
    }
}

impl Drop for PermitWait<'_> {
    fn drop(&mut self) {
        if self.key.is_some() {
            self.semaphore.state.lock().waiters.deregister(&mut self.key);
        }
    }
}

/// Future returned by [`Semaphore::acquire`].
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct Acquire<'a> {
    #[pin]
    inner: OrCancel<'a, PermitWait<'a>>,
}

impl<'a> Future for Acquire<'a> {
    type Output = Result<SemaphorePermit<'a>, AcquireError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().inner.poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(reason)) => Poll::Ready(Err(AcquireError::Cancelled(reason))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A permit from a semaphore, released on drop.
#[derive(Debug)]
#[must_use = "permit will be immediately released if not held"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// An owned permit from a semaphore, released on drop.
#[derive(Debug)]
#[must_use = "permit will be immediately released if not held"]
pub struct OwnedSemaphorePermit {
    semaphore: Arc<Semaphore>,
}

impl OwnedSemaphorePermit {
    /// The semaphore this permit belongs to.
    #[must_use]
    pub fn semaphore(&self) -> &Arc<Semaphore> {
        &self.semaphore
    }
}

impl Drop for OwnedSemaphorePermit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
