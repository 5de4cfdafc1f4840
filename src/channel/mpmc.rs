//! Bounded multi-producer, multi-consumer channel.
//!
//! Every stream between pipeline components is one of these. Senders block
//! (asynchronously) while the buffer is full, which is what propagates
//! backpressure upstream. Each value is delivered to exactly one receiver.
//!
//! The channel closes when every [`Sender`] has been dropped or either side
//! calls `close`. Receivers keep draining buffered values after close and
//! then observe the end of the stream. Once every [`Receiver`] is gone,
//! sends fail and hand the value back.
//!
//! Blocking operations take the governing [`CancelToken`] and give up as
//! soon as it is done; the token is checked first, so a done token wins
//! even if the channel could make progress.

use crate::cancel::{CancelToken, Cancelled};
use crate::error::Error;
use crate::runtime::block_on;
use crate::stream::{Stream, StreamExt};
use crate::sync::wait_queue::{WaitQueue, wake_all};
use crate::types::CancelReason;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Error returned by [`Sender::send`]; carries the unsent value.
#[derive(PartialEq, Eq, thiserror::Error)]
pub enum SendError<T> {
    /// The channel is closed or has no receivers.
    #[error("sending on a closed channel")]
    Closed(T),
    /// The governing token finished before the value could be buffered.
    #[error("send cancelled: {reason}")]
    Cancelled {
        /// The value that was not sent.
        value: T,
        /// Why the token finished.
        reason: CancelReason,
    },
}

impl<T> SendError<T> {
    /// Recovers the value that was not sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Closed(value) | Self::Cancelled { value, .. } => value,
        }
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed(_) => f.write_str("Closed(..)"),
            Self::Cancelled { reason, .. } => {
                f.debug_struct("Cancelled").field("reason", reason).finish_non_exhaustive()
            }
        }
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(err: SendError<T>) -> Self {
        match err {
            SendError::Closed(_) => Self::ChannelClosed,
            SendError::Cancelled { reason, .. } => reason.into_error(),
        }
    }
}

/// Error returned by [`Receiver::recv`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecvError {
    /// The channel is closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
    /// The governing token finished while waiting.
    #[error("receive cancelled: {0}")]
    Cancelled(CancelReason),
}

impl From<RecvError> for Error {
    fn from(err: RecvError) -> Self {
        match err {
            RecvError::Closed => Self::ChannelClosed,
            RecvError::Cancelled(reason) => reason.into_error(),
        }
    }
}

/// Error returned by [`Sender::try_send`]; carries the unsent value.
#[derive(PartialEq, Eq, thiserror::Error)]
pub enum TrySendError<T> {
    /// The buffer is full.
    #[error("channel full")]
    Full(T),
    /// The channel is closed or has no receivers.
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recovers the value that was not sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("Full(..)"),
            Self::Closed(_) => f.write_str("Closed(..)"),
        }
    }
}

impl<T> From<TrySendError<T>> for Error {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => Self::InvalidState {
                expected: "channel with free capacity",
                actual: "full channel",
            },
            TrySendError::Closed(_) => Self::ChannelClosed,
        }
    }
}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TryRecvError {
    /// Nothing buffered right now.
    #[error("channel empty")]
    Empty,
    /// The channel is closed and drained.
    #[error("receiving on a closed channel")]
    Closed,
}

impl From<TryRecvError> for Error {
    fn from(err: TryRecvError) -> Self {
        match err {
            TryRecvError::Empty => Self::InvalidState {
                expected: "channel with buffered values",
                actual: "empty channel",
            },
            TryRecvError::Closed => Self::ChannelClosed,
        }
    }
}

struct State<T> {
    buffer: VecDeque<T>,
    senders: usize,
    receivers: usize,
    closed: bool,
    send_waiters: WaitQueue,
    recv_waiters: WaitQueue,
}

impl<T> State<T> {
    fn send_closed(&self) -> bool {
        self.closed || self.receivers == 0
    }

    fn recv_closed(&self) -> bool {
        self.closed || self.senders == 0
    }
}

struct Chan<T> {
    state: Mutex<State<T>>,
    capacity: usize,
}

impl<T> Chan<T> {
    fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        let mut batch = state.send_waiters.take_all();
        batch.extend(state.recv_waiters.take_all());
        drop(state);
        wake_all(batch);
        true
    }

    fn poll_send(
        &self,
        cx: &mut Context<'_>,
        key: &mut Option<usize>,
        value: &mut Option<T>,
    ) -> Poll<Result<(), T>> {
        let mut state = self.state.lock();
        let Some(item) = value.take() else {
            state.send_waiters.deregister(key);
            return Poll::Ready(Ok(()));
        };
        if state.send_closed() {
            state.send_waiters.deregister(key);
            return Poll::Ready(Err(item));
        }
        if state.buffer.len() < self.capacity {
            state.buffer.push_back(item);
            state.send_waiters.deregister(key);
            let batch = state.recv_waiters.take_all();
            drop(state);
            wake_all(batch);
            return Poll::Ready(Ok(()));
        }
        *value = Some(item);
        state.send_waiters.register(key, cx.waker());
        Poll::Pending
    }

    fn poll_recv(&self, cx: &mut Context<'_>, key: &mut Option<usize>) -> Poll<Option<T>> {
        let mut state = self.state.lock();
        if let Some(item) = state.buffer.pop_front() {
            state.recv_waiters.deregister(key);
            let batch = state.send_waiters.take_all();
            drop(state);
            wake_all(batch);
            return Poll::Ready(Some(item));
        }
        if state.recv_closed() {
            state.recv_waiters.deregister(key);
            return Poll::Ready(None);
        }
        state.recv_waiters.register(key, cx.waker());
        Poll::Pending
    }

    fn release_send(&self, key: &mut Option<usize>) {
        if key.is_some() {
            self.state.lock().send_waiters.deregister(key);
        }
    }

    fn release_recv(&self, key: &mut Option<usize>) {
        if key.is_some() {
            self.state.lock().recv_waiters.deregister(key);
        }
    }
}

/// Creates a bounded channel buffering at most `capacity` values.
///
/// A capacity of zero is treated as one: a send completes once the value is
/// buffered, not when a receiver takes it.
#[must_use]
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let capacity = capacity.max(1);
    let chan = Arc::new(Chan {
        state: Mutex::new(State {
            buffer: VecDeque::with_capacity(capacity.min(1024)),
            senders: 1,
            receivers: 1,
            closed: false,
            send_waiters: WaitQueue::new(),
            recv_waiters: WaitQueue::new(),
        }),
        capacity,
    });
    (
        Sender {
            chan: Arc::clone(&chan),
        },
        Receiver { chan, key: None },
    )
}

/// Sending half of a channel.
pub struct Sender<T> {
    chan: Arc<Chan<T>>,
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.chan.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.chan.state.lock().senders += 1;
        Self {
            chan: Arc::clone(&self.chan),
        }
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut state = self.chan.state.lock();
        state.senders -= 1;
        if state.senders == 0 {
            let batch = state.recv_waiters.take_all();
            drop(state);
            wake_all(batch);
        }
    }
}

impl<T> Sender<T> {
    /// Sends `value`, waiting for buffer space. Gives up when the token
    /// finishes or the channel closes, returning the value.
    pub fn send<'a>(&'a self, token: &'a CancelToken, value: T) -> SendFuture<'a, T> {
        SendFuture {
            chan: &self.chan,
            cancelled: token.cancelled(),
            value: Some(value),
            key: None,
        }
    }

    /// Blocking form of [`send`](Self::send) for use outside tasks.
    pub fn send_blocking(&self, token: &CancelToken, value: T) -> Result<(), SendError<T>> {
        block_on(self.send(token, value))
    }

    /// Buffers `value` if there is room, without waiting.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut state = self.chan.state.lock();
        if state.send_closed() {
            return Err(TrySendError::Closed(value));
        }
        if state.buffer.len() >= self.chan.capacity {
            return Err(TrySendError::Full(value));
        }
        state.buffer.push_back(value);
        let batch = state.recv_waiters.take_all();
        drop(state);
        wake_all(batch);
        Ok(())
    }

    /// Closes the channel. Returns false if it was already closed.
    pub fn close(&self) -> bool {
        self.chan.close()
    }

    /// Returns true once sends can no longer succeed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.chan.state.lock().send_closed()
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chan.capacity
    }
}

/// Receiving half of a channel. Clones share the same buffer; each value
/// goes to exactly one of them.
pub struct Receiver<T> {
    chan: Arc<Chan<T>>,
    key: Option<usize>,
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.chan.capacity)
            .field("buffered", &self.len())
            .finish()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.chan.state.lock().receivers += 1;
        Self {
            chan: Arc::clone(&self.chan),
            key: None,
        }
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        let mut state = self.chan.state.lock();
        state.recv_waiters.deregister(&mut self.key);
        state.receivers -= 1;
        if state.receivers == 0 {
            let batch = state.send_waiters.take_all();
            drop(state);
            wake_all(batch);
        }
    }
}

impl<T> Receiver<T> {
    /// Receives the next value, waiting while the buffer is empty. Fails
    /// with [`RecvError::Closed`] once the channel is closed and drained,
    /// or [`RecvError::Cancelled`] when the token finishes first.
    pub fn recv<'a>(&'a self, token: &'a CancelToken) -> RecvFuture<'a, T> {
        RecvFuture {
            chan: &self.chan,
            cancelled: token.cancelled(),
            key: None,
        }
    }

    /// Blocking form of [`recv`](Self::recv) for use outside tasks.
    pub fn recv_blocking(&self, token: &CancelToken) -> Result<T, RecvError> {
        block_on(self.recv(token))
    }

    /// Receives every remaining value until the channel closes, blocking
    /// the calling thread.
    pub fn collect_blocking(self) -> Vec<T> {
        block_on(self.collect_vec())
    }

    /// Takes a buffered value without waiting.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut state = self.chan.state.lock();
        if let Some(item) = state.buffer.pop_front() {
            let batch = state.send_waiters.take_all();
            drop(state);
            wake_all(batch);
            return Ok(item);
        }
        if state.recv_closed() {
            Err(TryRecvError::Closed)
        } else {
            Err(TryRecvError::Empty)
        }
    }

    /// Closes the channel. Buffered values can still be received.
    pub fn close(&self) -> bool {
        self.chan.close()
    }

    /// Returns true once the channel is closed (values may remain buffered).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.chan.state.lock().recv_closed()
    }

    /// Number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chan.state.lock().buffer.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffer capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.chan.capacity
    }
}

impl<T> Stream for Receiver<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = &mut *self;
        this.chan.poll_recv(cx, &mut this.key)
    }
}

/// Future returned by [`Sender::send`].
#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<'a, T> {
    chan: &'a Chan<T>,
    cancelled: Cancelled<'a>,
    value: Option<T>,
    key: Option<usize>,
}

impl<T> Unpin for SendFuture<'_, T> {}

impl<T> Future for SendFuture<'_, T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Poll::Ready(reason) = Pin::new(&mut this.cancelled).poll(cx) {
            this.chan.release_send(&mut this.key);
            return match this.value.take() {
                Some(value) => Poll::Ready(Err(SendError::Cancelled { value, reason })),
                None => Poll::Ready(Ok(())),
            };
        }
        this.chan
            .poll_send(cx, &mut this.key, &mut this.value)
            .map_err(SendError::Closed)
    }
}

impl<T> Drop for SendFuture<'_, T> {
    fn drop(&mut self) {
        self.chan.release_send(&mut self.key);
    }
}

/// Future returned by [`Receiver::recv`].
#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<'a, T> {
    chan: &'a Chan<T>,
    cancelled: Cancelled<'a>,
    key: Option<usize>,
}

impl<T> Future for RecvFuture<'_, T> {
    type Output = Result<T, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        if let Poll::Ready(reason) = Pin::new(&mut this.cancelled).poll(cx) {
            this.chan.release_recv(&mut this.key);
            return Poll::Ready(Err(RecvError::Cancelled(reason)));
        }
        this.chan
            .poll_recv(cx, &mut this.key)
            .map(|item| item.ok_or(RecvError::Closed))
    }
}

impl<T> Drop for RecvFuture<'_, T> {
    fn drop(&mut self) {
        self.chan.release_recv(&mut self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use std::task::Waker;
    use std::time::Duration;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn poll_once<F: Future + Unpin>(future: &mut F) -> Option<F::Output> {
        let mut cx = Context::from_waker(Waker::noop());
        match Pin::new(future).poll(&mut cx) {
            Poll::Ready(v) => Some(v),
            Poll::Pending => None,
        }
    }

    #[test]
    fn fifo_through_buffer() {
        init_test("fifo_through_buffer");
        let token = CancelToken::new();
        let (tx, rx) = channel(4);
        for i in 0..4 {
            tx.try_send(i).expect("room");
        }
        assert!(matches!(tx.try_send(9), Err(TrySendError::Full(9))));
        let drained: Vec<_> = (0..4).map(|_| rx.recv_blocking(&token).expect("value")).collect();
        crate::assert_with_log!(drained == vec![0, 1, 2, 3], "fifo", vec![0, 1, 2, 3], drained);
        crate::test_complete!("fifo_through_buffer");
    }

    #[test]
    fn zero_capacity_buffers_one() {
        let (tx, rx) = channel::<u8>(0);
        assert_eq!(tx.capacity(), 1);
        tx.try_send(1).expect("one slot");
        assert!(tx.try_send(2).is_err());
        assert_eq!(rx.try_recv(), Ok(1));
    }

    #[test]
    fn dropping_senders_closes_after_drain() {
        let token = CancelToken::new();
        let (tx, rx) = channel(2);
        let tx2 = tx.clone();
        tx.try_send("a").expect("room");
        drop(tx);
        assert!(!rx.is_closed());
        tx2.try_send("b").expect("room");
        drop(tx2);
        assert_eq!(rx.recv_blocking(&token), Ok("a"));
        assert_eq!(rx.recv_blocking(&token), Ok("b"));
        assert_eq!(rx.recv_blocking(&token), Err(RecvError::Closed));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn full_send_waits_for_space() {
        let token = CancelToken::new();
        let (tx, rx) = channel(1);
        tx.try_send(1).expect("room");
        let mut pending = tx.send(&token, 2);
        assert!(poll_once(&mut pending).is_none());
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(poll_once(&mut pending), Some(Ok(())));
        assert_eq!(rx.try_recv(), Ok(2));
    }

    #[test]
    fn cancelled_send_returns_value() {
        let token = CancelToken::with_timeout(Duration::from_millis(10));
        let (tx, _rx) = channel(1);
        tx.try_send(1).expect("room");
        let err = tx.send_blocking(&token, 2).expect_err("cancelled");
        assert!(matches!(err, SendError::Cancelled { ref reason, .. } if reason.is_deadline()));
        assert_eq!(err.into_inner(), 2);
    }

    #[test]
    fn cancelled_recv_maps_to_engine_error() {
        let token = CancelToken::new();
        let (_tx, rx) = channel::<u8>(1);
        token.cancel();
        let err = rx.recv_blocking(&token).expect_err("cancelled");
        assert_eq!(Error::from(err).kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn send_fails_without_receivers() {
        let token = CancelToken::new();
        let (tx, rx) = channel(1);
        drop(rx);
        assert!(tx.is_closed());
        let err = tx.send_blocking(&token, 5).expect_err("no receivers");
        assert!(matches!(err, SendError::Closed(5)));
        assert_eq!(Error::from(err).kind(), ErrorKind::ChannelClosed);
    }

    #[test]
    fn explicit_close_keeps_buffered_values() {
        let (tx, rx) = channel(2);
        tx.try_send(1).expect("room");
        assert!(rx.close());
        assert!(!tx.close());
        assert!(matches!(tx.try_send(2), Err(TrySendError::Closed(2))));
        assert_eq!(rx.try_recv(), Ok(1));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Closed));
    }

    #[test]
    fn each_value_goes_to_one_receiver() {
        init_test("each_value_goes_to_one_receiver");
        let token = CancelToken::new();
        let (tx, rx) = channel(8);
        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let rx = rx.clone();
                let token = token.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Ok(v) = rx.recv_blocking(&token) {
                        seen.push(v);
                    }
                    seen
                })
            })
            .collect();
        drop(rx);
        for i in 0..300 {
            tx.send_blocking(&token, i).expect("send");
        }
        drop(tx);
        let mut all: Vec<i32> = consumers
            .into_iter()
            .flat_map(|c| c.join().expect("consumer"))
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..300).collect::<Vec<_>>());
        crate::test_complete!("each_value_goes_to_one_receiver");
    }

    #[test]
    fn receiver_is_a_stream() {
        let (tx, mut rx) = channel(3);
        for i in 1..=3 {
            tx.try_send(i).expect("room");
        }
        drop(tx);
        let mut total = 0;
        block_on(async {
            while let Some(v) = rx.next().await {
                total += v;
            }
        });
        assert_eq!(total, 6);
    }
}
