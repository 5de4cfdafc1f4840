//! Deadline wrapper for arbitrary futures.

use super::sleep::{Sleep, sleep};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// Error returned when a [`Timeout`] elapses first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("elapsed after {0:?}")]
pub struct Elapsed(pub Duration);

impl From<Elapsed> for crate::Error {
    fn from(elapsed: Elapsed) -> Self {
        Self::Timeout(elapsed.0)
    }
}

/// Future returned by [`timeout`].
#[pin_project]
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Timeout<F> {
    #[pin]
    future: F,
    sleep: Sleep,
    duration: Duration,
}

impl<F: Future> Future for Timeout<F> {
    type Output = Result<F::Output, Elapsed>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(value) = this.future.poll(cx) {
            return Poll::Ready(Ok(value));
        }
        match Pin::new(this.sleep).poll(cx) {
            Poll::Ready(()) => Poll::Ready(Err(Elapsed(*this.duration))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Requires `future` to complete within `duration`.
///
/// The inner future is polled first, so a future that is ready at the same
/// instant the deadline passes still wins.
pub fn timeout<F: Future>(duration: Duration, future: F) -> Timeout<F> {
    Timeout {
        future,
        sleep: sleep(duration),
        duration,
    }
}
