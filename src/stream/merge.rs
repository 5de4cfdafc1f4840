//! Merge combinator for streams.
//!
//! `Merge` interleaves items from several streams in first-available order,
//! polling them round-robin so no input starves the others. An input that
//! ends is dropped from the rotation; the merged stream ends only once
//! every input has ended.

use super::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};

/// A stream that interleaves several input streams.
#[derive(Debug)]
#[must_use = "streams do nothing unless polled"]
pub struct Merge<S> {
    inputs: Vec<S>,
    /// Input polled first on the next call.
    cursor: usize,
}

impl<S> Merge<S> {
    /// Creates a merged stream over `inputs`.
    pub fn new(inputs: impl IntoIterator<Item = S>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            cursor: 0,
        }
    }

    /// Adds another input to the rotation.
    pub fn push(&mut self, input: S) {
        self.inputs.push(input);
    }

    /// Number of inputs that have not ended yet.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// Returns true once every input has ended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Consumes the merge, returning the inputs that have not ended.
    #[must_use]
    pub fn into_inner(self) -> Vec<S> {
        self.inputs
    }
}

impl<S: Stream + Unpin> Stream for Merge<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        let this = &mut *self;
        let mut polled = 0;
        while polled < this.inputs.len() {
            let index = (this.cursor + polled) % this.inputs.len();
            match Pin::new(&mut this.inputs[index]).poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    this.cursor = (index + 1) % this.inputs.len();
                    return Poll::Ready(Some(item));
                }
                Poll::Ready(None) => {
                    // Later inputs shift down into `index`; keep the
                    // rotation anchored on the same neighbour.
                    this.inputs.remove(index);
                    if index < this.cursor {
                        this.cursor -= 1;
                    }
                    if this.inputs.is_empty() {
                        this.cursor = 0;
                    } else {
                        this.cursor %= this.inputs.len();
                    }
                }
                Poll::Pending => polled += 1,
            }
        }
        if this.inputs.is_empty() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inputs.iter().fold((0, Some(0)), |(lower, upper), input| {
            let (l, u) = input.size_hint();
            let upper = match (upper, u) {
                (Some(total), Some(v)) => total.checked_add(v),
                _ => None,
            };
            (lower.saturating_add(l), upper)
        })
    }
}

/// Merges several streams into one.
pub fn merge<S: Stream>(streams: impl IntoIterator<Item = S>) -> Merge<S> {
    Merge::new(streams)
}
