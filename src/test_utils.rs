//! Shared helpers for unit and integration tests.
//!
//! Enabled for `cfg(test)` and by the `test-internals` feature so that the
//! integration tests under `tests/` can use the same logging setup and
//! assertion macros as the unit tests.
//!
//! Logging honours `RUST_LOG`; without it, test output is limited to
//! `pipewright=debug`.

use std::sync::Once;
use std::time::{Duration, Instant};

#[doc(hidden)]
pub use tracing;

static INIT: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pipewright=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_thread_names(true)
            .try_init();
    });
}

/// Generous upper bound for waits that should finish almost immediately.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or [`SETTLE_TIMEOUT`] passes.
///
/// Task bookkeeping (for example the live-task count) settles just after a
/// join handle resolves, so assertions on it should go through here.
pub fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Logs the start of a test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_utils::tracing::info!(phase = %$name, "test phase");
    };
}

/// Logs successful completion of a test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_utils::tracing::info!(test = %$name, "test complete");
    };
}

/// Asserts a condition, logging expected and actual values on both paths.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {{
        let passed = $cond;
        $crate::test_utils::tracing::debug!(
            check = %$msg,
            expected = ?$expected,
            actual = ?$actual,
            passed,
            "assertion"
        );
        assert!(
            passed,
            "{}: expected {:?}, actual {:?}",
            $msg, $expected, $actual
        );
    }};
}
