//! Hierarchical cancellation tokens.

use crate::error::Error;
use crate::runtime::block_on;
use crate::runtime::timer::TimerKey;
use crate::sync::wait_queue::{WaitQueue, wake_all};
use crate::time::driver;
use crate::tracing_compat::debug;
use crate::types::CancelReason;
use parking_lot::Mutex;
use pin_project::pin_project;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll, Wake};
use std::time::{Duration, Instant};

struct Inner {
    id: u64,
    parent: Option<CancelToken>,
    reason: OnceLock<CancelReason>,
    /// Effective deadline: the earliest of this token's and its ancestors'.
    deadline: Option<Instant>,
    waiters: Mutex<WaitQueue>,
    children: Mutex<Vec<Weak<Inner>>>,
    /// Pending deadline registration with the timer driver.
    timer: Mutex<Option<TimerKey>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(key) = self.timer.get_mut().take() {
            driver::global().cancel(key);
        }
    }
}

/// A cancellation signal shared by every component of one scope.
///
/// Tokens form a tree. A token is *done* once it is cancelled, its deadline
/// passes, or any ancestor becomes done. The first transition fixes the
/// reason; later cancellations are no-ops. Propagation only flows downward:
/// cancelling a child never affects its parent or siblings.
///
/// Cloning is cheap and every clone observes the same state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("id", &self.inner.id)
            .field("reason", &self.inner.reason.get())
            .field("deadline", &self.inner.deadline)
            .finish_non_exhaustive()
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Wakes a token when its deadline passes so waiters do not depend on
/// someone polling `is_done`.
struct DeadlineWaker {
    token: Weak<Inner>,
}

impl Wake for DeadlineWaker {
    fn wake(self: Arc<Self>) {
        if let Some(inner) = self.token.upgrade() {
            CancelToken { inner }.is_done();
        }
    }
}

impl CancelToken {
    /// Creates a root token with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None, None)
    }

    /// Creates a root token that expires after `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(None, Some(deadline_after(timeout)))
    }

    /// Creates a root token that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(None, Some(deadline))
    }

    /// Creates a child token that inherits this token's deadline.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::build(Some(self.clone()), None)
    }

    /// Creates a child token that also expires after `timeout`.
    ///
    /// The child's effective deadline is the earlier of its own and the
    /// parent's.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        Self::build(Some(self.clone()), Some(deadline_after(timeout)))
    }

    /// Creates a child token that also expires at `deadline`.
    #[must_use]
    pub fn child_with_deadline(&self, deadline: Instant) -> Self {
        Self::build(Some(self.clone()), Some(deadline))
    }

    /// Creates a child token that is cancelled when the returned guard drops.
    #[must_use]
    pub fn child_guard(&self) -> CancelGuard {
        self.child().into_guard()
    }

    /// Wraps this token in a guard that cancels it when dropped.
    #[must_use]
    pub fn into_guard(self) -> CancelGuard {
        CancelGuard { token: Some(self) }
    }

    fn build(parent: Option<Self>, own_deadline: Option<Instant>) -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let inherited = parent.as_ref().and_then(|p| p.inner.deadline);
        let deadline = match (inherited, own_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        // Only a deadline stricter than the inherited one needs its own
        // timer; otherwise the ancestor's expiry cascades down.
        let needs_timer = own_deadline.is_some() && deadline != inherited;

        let token = Self {
            inner: Arc::new(Inner {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                parent,
                reason: OnceLock::new(),
                deadline,
                waiters: Mutex::new(WaitQueue::new()),
                children: Mutex::new(Vec::new()),
                timer: Mutex::new(None),
            }),
        };

        if let Some(parent) = &token.inner.parent {
            {
                let mut children = parent.inner.children.lock();
                children.retain(|child| child.strong_count() > 0);
                children.push(Arc::downgrade(&token.inner));
            }
            // Registered before checking, so a concurrent parent
            // cancellation either sees this child or is seen here.
            if let Some(reason) = parent.reason() {
                token.cancel_with(reason);
            }
        }

        if let Some(deadline) = deadline.filter(|_| needs_timer) {
            if Instant::now() >= deadline {
                token.cancel_with(CancelReason::timeout());
            } else {
                let waker = Arc::new(DeadlineWaker {
                    token: Arc::downgrade(&token.inner),
                });
                let key = driver::global().register(deadline, waker.into());
                *token.inner.timer.lock() = Some(key);
                // A cancellation racing the registration missed the key.
                if token.inner.reason.get().is_some() {
                    token.release_timer();
                }
            }
        }
        token
    }

    /// Cancels the token with a user reason. Returns true if this call
    /// performed the transition.
    pub fn cancel(&self) -> bool {
        self.cancel_with(CancelReason::default())
    }

    /// Cancels the token with `reason`. Returns true if this call performed
    /// the transition; an already-done token keeps its original reason.
    ///
    /// A token whose deadline has already passed records a timeout, even if
    /// the deadline has not been observed yet.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        let reason = if self.deadline_elapsed() {
            CancelReason::timeout()
        } else {
            reason
        };
        if self.inner.reason.set(reason.clone()).is_err() {
            return false;
        }
        debug!(token = self.inner.id, reason = %reason, "token cancelled");
        self.release_timer();

        let batch = self.inner.waiters.lock().take_all();
        wake_all(batch);

        let children = std::mem::take(&mut *self.inner.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            Self { inner: child }.cancel_with(reason.clone());
        }
        true
    }

    /// Returns true once the token is cancelled or its deadline has passed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        if self.inner.reason.get().is_some() {
            return true;
        }
        if self.deadline_elapsed() {
            self.cancel_with(CancelReason::timeout());
            return true;
        }
        false
    }

    /// The reason the token became done, if it is.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        if self.is_done() {
            self.inner.reason.get().cloned()
        } else {
            None
        }
    }

    /// The terminal error for this token: [`Error::DeadlineExceeded`] for an
    /// elapsed deadline, [`Error::Cancelled`] otherwise.
    #[must_use]
    pub fn error(&self) -> Option<Error> {
        self.reason().map(CancelReason::into_error)
    }

    /// Returns `Err` with the terminal error if the token is done.
    pub fn checkpoint(&self) -> Result<(), Error> {
        self.error().map_or(Ok(()), Err)
    }

    /// The effective deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Time left until the effective deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// The parent token, if this is a child.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.inner.parent.as_ref()
    }

    /// Returns true if both handles refer to the same token.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves once the token is done.
    pub fn cancelled(&self) -> Cancelled<'_> {
        Cancelled {
            token: self,
            key: None,
        }
    }

    /// Blocks the calling thread until the token is done.
    pub fn wait(&self) -> CancelReason {
        block_on(self.cancelled())
    }

    /// Races `future` against the token.
    ///
    /// The token is checked first on every poll, so an already-done token
    /// wins even if `future` is also ready.
    pub fn or_cancel<F: Future>(&self, future: F) -> OrCancel<'_, F> {
        OrCancel {
            future,
            cancelled: self.cancelled(),
        }
    }

    fn release_timer(&self) {
        let key = self.inner.timer.lock().take();
        if let Some(key) = key {
            driver::global().cancel(key);
        }
    }

    fn deadline_elapsed(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365))
}

/// Future returned by [`CancelToken::cancelled`].
#[must_use = "futures do nothing unless polled"]
pub struct Cancelled<'a> {
    token: &'a CancelToken,
    key: Option<usize>,
}

impl Cancelled<'_> {
    fn poll_done(&mut self, cx: &mut Context<'_>) -> Poll<CancelReason> {
        let inner = &self.token.inner;
        let mut waiters = inner.waiters.lock();
        if let Some(reason) = inner.reason.get() {
            waiters.deregister(&mut self.key);
            return Poll::Ready(reason.clone());
        }
        if self.token.deadline_elapsed() {
            waiters.deregister(&mut self.key);
            drop(waiters);
            self.token.is_done();
            let reason = inner.reason.get().cloned().unwrap_or_else(CancelReason::timeout);
            return Poll::Ready(reason);
        }
        waiters.register(&mut self.key, cx.waker());
        Poll::Pending
    }
}

impl Future for Cancelled<'_> {
    type Output = CancelReason;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<CancelReason> {
        self.poll_done(cx)
    }
}

impl Drop for Cancelled<'_> {
    fn drop(&mut self) {
        if self.key.is_some() {
            self.token.inner.waiters.lock().deregister(&mut self.key);
        }
    }
}

/// Future returned by [`CancelToken::or_cancel`].
#[pin_project]
#[must_use = "futures do nothing unless polled"]
pub struct OrCancel<'a, F> {
    #[pin]
    future: F,
    cancelled: Cancelled<'a>,
}

impl<F: Future> Future for OrCancel<'_, F> {
    type Output = Result<F::Output, CancelReason>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if let Poll::Ready(reason) = this.cancelled.poll_done(cx) {
            return Poll::Ready(Err(reason));
        }
        this.future.poll(cx).map(Ok)
    }
}

/// Scope guard owning a child token; dropping it cancels the child.
#[derive(Debug)]
pub struct CancelGuard {
    token: Option<CancelToken>,
}

impl CancelGuard {
    /// The guarded token.
    #[must_use]
    pub fn token(&self) -> &CancelToken {
        self.token
            .as_ref()
            .expect("guard holds its token until dropped or disarmed")
    }

    /// Releases the token without cancelling it.
    #[must_use]
    pub fn disarm(mut self) -> CancelToken {
        self.token
            .take()
            .expect("guard holds its token until dropped or disarmed")
    }
}

impl std::ops::Deref for CancelGuard {
    type Target = CancelToken;

    fn deref(&self) -> &CancelToken {
        self.token()
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel_with(CancelReason::user("scope exited"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CancelKind;
    use crate::ErrorKind;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn first_cancel_wins() {
        init_test("first_cancel_wins");
        let token = CancelToken::new();
        assert!(!token.is_done());
        assert!(token.cancel_with(CancelReason::user("first")));
        assert!(!token.cancel_with(CancelReason::shutdown()));
        let reason = token.reason().expect("done");
        crate::assert_with_log!(
            reason.kind() == CancelKind::User,
            "original reason kept",
            CancelKind::User,
            reason.kind()
        );
        assert_eq!(reason.message, Some("first"));
        crate::test_complete!("first_cancel_wins");
    }

    #[test]
    fn cancel_propagates_to_descendants_only() {
        init_test("cancel_propagates_to_descendants_only");
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();
        let sibling = root.child();

        child.cancel();
        assert!(child.is_done());
        assert!(grandchild.is_done());
        assert!(!root.is_done());
        assert!(!sibling.is_done());

        root.cancel_with(CancelReason::shutdown());
        assert!(sibling.is_done());
        assert_eq!(sibling.reason().map(|r| r.kind()), Some(CancelKind::Shutdown));
        // The grandchild keeps the reason it was first cancelled with.
        assert_eq!(grandchild.reason().map(|r| r.kind()), Some(CancelKind::User));
        crate::test_complete!("cancel_propagates_to_descendants_only");
    }

    #[test]
    fn child_of_done_parent_is_born_done() {
        let root = CancelToken::new();
        root.cancel_with(CancelReason::fail_fast());
        let child = root.child();
        assert!(child.is_done());
        assert_eq!(child.reason().map(|r| r.kind()), Some(CancelKind::FailFast));
    }

    #[test]
    fn deadline_reports_deadline_exceeded() {
        init_test("deadline_reports_deadline_exceeded");
        let token = CancelToken::with_timeout(Duration::from_millis(20));
        assert!(!token.is_done());
        let reason = token.wait();
        assert!(reason.is_deadline());
        assert_eq!(token.error().map(|e| e.kind()), Some(ErrorKind::DeadlineExceeded));
        crate::test_complete!("deadline_reports_deadline_exceeded");
    }

    #[test]
    fn elapsed_deadline_wins_over_later_cancel() {
        let token = CancelToken::with_timeout(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(15));
        token.cancel();
        assert!(token.reason().expect("done").is_deadline());
    }

    #[test]
    fn child_inherits_earlier_parent_deadline() {
        let parent = CancelToken::with_timeout(Duration::from_millis(20));
        let child = parent.child_with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
        let reason = child.wait();
        assert!(reason.is_deadline());
        assert!(parent.is_done());
    }

    #[test]
    fn child_deadline_does_not_touch_parent() {
        let parent = CancelToken::new();
        let child = parent.child_with_timeout(Duration::from_millis(10));
        child.wait();
        assert!(!parent.is_done());
    }

    #[test]
    fn waiters_on_other_threads_are_woken() {
        init_test("waiters_on_other_threads_are_woken");
        let token = CancelToken::new();
        let child = token.child();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let child = child.clone();
                std::thread::spawn(move || child.wait())
            })
            .collect();
        std::thread::sleep(Duration::from_millis(10));
        token.cancel_with(CancelReason::user("stop"));
        for waiter in waiters {
            let reason = waiter.join().expect("waiter thread");
            assert_eq!(reason.message, Some("stop"));
        }
        crate::test_complete!("waiters_on_other_threads_are_woken");
    }

    #[test]
    fn or_cancel_prefers_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        let raced = block_on(token.or_cancel(std::future::ready(7)));
        assert!(raced.is_err());

        let live = CancelToken::new();
        assert_eq!(block_on(live.or_cancel(std::future::ready(7))), Ok(7));
    }

    #[test]
    fn or_cancel_interrupts_pending_future() {
        let token = CancelToken::with_timeout(Duration::from_millis(15));
        let raced = block_on(token.or_cancel(std::future::pending::<()>()));
        assert!(raced.expect_err("deadline").is_deadline());
    }

    #[test]
    fn guard_cancels_on_drop_and_disarm_keeps_alive() {
        let root = CancelToken::new();
        let observed = {
            let guard = root.child_guard();
            guard.token().clone()
        };
        assert!(observed.is_done());
        assert!(!root.is_done());

        let kept = root.child_guard().disarm();
        assert!(!kept.is_done());
    }

    #[test]
    fn checkpoint_maps_reason_to_error() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());
        token.cancel();
        assert_eq!(
            token.checkpoint().expect_err("cancelled").kind(),
            ErrorKind::Cancelled
        );
    }
}
