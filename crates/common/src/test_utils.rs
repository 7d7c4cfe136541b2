//! Test utilities for usb-bridged
//!
//! Helpers for tests that coordinate threads, the event loop and the
//! mailbox without hanging when something goes wrong.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{wait_until, DEFAULT_TEST_TIMEOUT};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let flag = AtomicBool::new(true);
//! assert!(wait_until(DEFAULT_TEST_TIMEOUT, || flag.load(Ordering::SeqCst)));
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between checks in [`wait_until`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
///
/// # Arguments
/// * `duration` - Maximum time to wait
/// * `future` - The async operation to run
///
/// # Returns
/// Result containing the operation result or a timeout error
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Block the current thread until `condition` holds or `timeout` elapses
///
/// Returns whether the condition was observed.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
