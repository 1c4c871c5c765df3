//! Polling assertions over resource state
//!
//! A condition is an async closure returning `Result<T, E>`. [`eventually`]
//! polls until the condition succeeds. The failure report carries the
//! condition's last error message, so a subset mismatch stays readable.
//!
//! # Example
//!
//! ```ignore
//! use kubestep::eventually::eventually;
//! use std::time::Duration;
//!
//! let live = eventually(|| async {
//!     let cm = handle.get("demo", Some("team")).await?;
//!     contains_strict(&cm.to_value(), &expected).map(|()| cm)
//! })
//! .timeout(Duration::from_secs(10))
//! .run()
//! .await?;
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::trace;

/// Error type for eventually checks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConditionError {
    #[error("condition failed after {attempts} attempts over {elapsed:?}: {last_error}")]
    EventuallyFailed {
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },
}

/// Builder for eventually checks
pub struct Eventually<F> {
    condition: F,
    timeout: Duration,
    interval: Duration,
}

/// Poll `condition` until it returns `Ok`
///
/// Default timeout: 30 seconds
/// Default interval: 250ms
pub fn eventually<F, Fut, T, E>(condition: F) -> Eventually<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    Eventually {
        condition,
        timeout: Duration::from_secs(30),
        interval: Duration::from_millis(250),
    }
}

impl<F> Eventually<F> {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until success or timeout, returning the first successful value
    ///
    /// The condition always runs at least once.
    pub async fn run<Fut, T, E>(self) -> Result<T, ConditionError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let last_error = match (self.condition)().await {
                Ok(value) => return Ok(value),
                Err(err) => err.to_string(),
            };

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(ConditionError::EventuallyFailed {
                    attempts,
                    elapsed,
                    last_error,
                });
            }

            trace!(attempts, error = %last_error, "Condition not met yet");
            sleep(self.interval).await;
        }
    }
}
