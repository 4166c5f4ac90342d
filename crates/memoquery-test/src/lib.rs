//! Helpers for testing query executors.
//!
//! Call [`setup`] at the start of every test to get log output captured by the test runner.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::fmt;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `memoquery` crate and mutes all
///    other logs (such as moka or tokio).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("memoquery=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Awaits `future`, and returns its output along with how long that took.
///
/// This uses the tokio clock, so it measures virtual time when the clock is paused.
pub async fn measure<F: Future>(future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_measure_virtual_time() {
        let (value, elapsed) = measure(async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            7
        })
        .await;

        assert_eq!(value, 7);
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(260));
    }
}
