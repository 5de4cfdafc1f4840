//! Extension methods for [`Stream`].

use super::Stream;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Convenience methods available on every [`Stream`].
pub trait StreamExt: Stream {
    /// Resolves to the next item, or `None` once the stream has ended.
    fn next(&mut self) -> Next<'_, Self>
    where
        Self: Unpin,
    {
        Next { stream: self }
    }

    /// Drains the stream into a vector.
    fn collect_vec(self) -> CollectVec<Self>
    where
        Self: Sized + Unpin,
    {
        CollectVec {
            stream: self,
            items: Vec::new(),
        }
    }
}

impl<S: Stream + ?Sized> StreamExt for S {}

/// Future returned by [`StreamExt::next`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct Next<'a, S: ?Sized> {
    stream: &'a mut S,
}

impl<S: Stream + Unpin + ?Sized> Future for Next<'_, S> {
    type Output = Option<S::Item>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut *self.stream).poll_next(cx)
    }
}

/// Future returned by [`StreamExt::collect_vec`].
#[derive(Debug)]
#[must_use = "futures do nothing unless polled"]
pub struct CollectVec<S: Stream> {
    stream: S,
    items: Vec<S::Item>,
}

impl<S: Stream + Unpin> Unpin for CollectVec<S> {}

impl<S: Stream + Unpin> Future for CollectVec<S> {
    type Output = Vec<S::Item>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            match Pin::new(&mut this.stream).poll_next(cx) {
                Poll::Ready(Some(item)) => this.items.push(item),
                Poll::Ready(None) => return Poll::Ready(std::mem::take(&mut this.items)),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
