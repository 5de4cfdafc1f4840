//! Cooperative yielding.
//!
//! Workers are not preemptive. A task whose channels never run dry or full
//! would keep its worker forever, so the engine's long-running loops spend a
//! [`Budget`] and hand the worker back once a slice is used up.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Items a loop handles back to back before yielding.
pub(crate) const SLICE: u32 = 64;

/// Future returned by [`yield_now`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct YieldNow {
    rescheduled: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.rescheduled {
            return Poll::Ready(());
        }
        self.rescheduled = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Puts the current task back on the queue so others can run first.
pub fn yield_now() -> YieldNow {
    YieldNow { rescheduled: false }
}

/// Per-loop allowance of consecutive items between yields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Budget {
    left: u32,
    slice: u32,
}

impl Budget {
    pub(crate) const fn new(slice: u32) -> Self {
        let slice = if slice == 0 { 1 } else { slice };
        Self { left: slice, slice }
    }

    /// Accounts for one item; yields once the slice is exhausted.
    pub(crate) async fn spend(&mut self) {
        self.left -= 1;
        if self.left == 0 {
            self.left = self.slice;
            yield_now().await;
        }
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(SLICE)
    }
}
