//! Optional tracing integration.
//!
//! With the `tracing-integration` feature enabled, the logging macros used
//! throughout the crate are the ones from [`tracing`]. Without it they expand
//! to nothing, so call sites never need their own `cfg` gates.
//!
//! ```ignore
//! use crate::tracing_compat::debug;
//!
//! debug!(stage = %name, processed, "stage finished");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    /// No-op replacement for `tracing::trace!`.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __pipewright_trace {
        ($($arg:tt)*) => {};
    }

    /// No-op replacement for `tracing::debug!`.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __pipewright_debug {
        ($($arg:tt)*) => {};
    }

    /// No-op replacement for `tracing::info!`.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __pipewright_info {
        ($($arg:tt)*) => {};
    }

    /// No-op replacement for `tracing::warn!`.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __pipewright_warn {
        ($($arg:tt)*) => {};
    }

    /// No-op replacement for `tracing::error!`.
    #[macro_export]
    #[doc(hidden)]
    macro_rules! __pipewright_error {
        ($($arg:tt)*) => {};
    }
}

#[cfg(not(feature = "tracing-integration"))]
pub use crate::{
    __pipewright_debug as debug, __pipewright_error as error, __pipewright_info as info,
    __pipewright_trace as trace, __pipewright_warn as warn,
};
