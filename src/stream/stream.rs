//! The core Stream trait for asynchronous iteration.
//!
//! Channel receivers and merged receivers are streams; pipeline tasks
//! consume them with [`StreamExt::next`](super::StreamExt::next).

use std::ops::DerefMut;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Asynchronous iterator producing a sequence of values.
///
/// This is the async equivalent of `Iterator`. Each call to `poll_next`
/// attempts to pull out the next value, returning `Poll::Pending` if the
/// value is not yet ready, `Poll::Ready(Some(item))` if a value is available,
/// or `Poll::Ready(None)` if the stream has terminated.
///
/// # Examples
///
/// ```ignore
/// use pipewright::stream::{Stream, StreamExt};
///
/// async fn total<S: Stream<Item = u64> + Unpin>(mut stream: S) -> u64 {
///     let mut sum = 0;
///     while let Some(item) = stream.next().await {
///         sum += item;
///     }
///     sum
/// }
/// ```
pub trait Stream {
    /// The type of values yielded by the stream.
    type Item;

    /// Attempts to pull out the next value of this stream.
    ///
    /// Returning `Poll::Pending` never loses a value: the item is still
    /// available to a later poll.
    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>>;

    /// Returns the bounds on the remaining length of the stream.
    ///
    /// The default implementation returns `(0, None)` which is correct for any
    /// stream.
    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

impl<P> Stream for Pin<P>
where
    P: DerefMut + Unpin,
    P::Target: Stream,
{
    type Item = <P::Target as Stream>::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().as_mut().poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (**self).size_hint()
    }
}

impl<S: Stream + Unpin + ?Sized> Stream for Box<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut **self).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (**self).size_hint()
    }
}

impl<S: Stream + Unpin + ?Sized> Stream for &mut S {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut **self).poll_next(cx)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (**self).size_hint()
    }
}
