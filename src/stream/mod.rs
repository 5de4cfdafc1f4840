//! Asynchronous streams.
//!
//! - [`Stream`]: the async iterator trait, implemented by channel receivers
//! - [`StreamExt`]: `next` and `collect_vec`
//! - [`Merge`]: first-available interleaving of several streams

mod merge;
mod next;
mod stream;

pub use merge::{Merge, merge};
pub use next::{CollectVec, Next, StreamExt};
pub use stream::Stream;
