//! Concurrency combinators.
//!
//! - [`bounded`]: run a batch of jobs with a concurrency ceiling
//! - [`rate_limit`]: minimum-interval pacing of a stream

pub mod bounded;
pub mod rate_limit;

pub use bounded::{run_bounded, run_bounded_async};
pub use rate_limit::{RateLimiter, pace};
