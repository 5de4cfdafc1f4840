//! Sleep and timeout primitives for time-based operations.
//!
//! All timers share one process-wide driver thread (see [`driver`]).

pub mod driver;
mod sleep;
mod timeout;

pub use sleep::{Sleep, sleep, sleep_until};
pub use timeout::{Elapsed, Timeout, timeout};
