//! Sleep abstraction for retry backoff
//!
//! Retry code sleeps through a [`Sleeper`] so tests can observe the
//! requested delays without waiting for them.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Something that can wait for a duration
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Records requested delays and returns immediately
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSleeper {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every delay requested so far, in order
    #[must_use]
    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of requested delays
    #[must_use]
    pub fn total(&self) -> Duration {
        self.calls().into_iter().sum()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_sleeper_records_in_order() {
        let sleeper = RecordingSleeper::new();
        let shared = sleeper.clone();

        sleeper.sleep(Duration::from_secs(2)).await;
        shared.sleep(Duration::from_millis(500)).await;

        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_secs(2), Duration::from_millis(500)]
        );
        assert_eq!(sleeper.total(), Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn test_recording_sleeper_survives_poisoned_lock() {
        let sleeper = RecordingSleeper::new();
        let calls = Arc::clone(&sleeper.calls);
        std::thread::spawn(move || {
            let _guard = calls.lock().unwrap();
            panic!("recorder died");
        })
        .join()
        .unwrap_err();

        sleeper.sleep(Duration::from_secs(1)).await;

        assert_eq!(sleeper.calls(), vec![Duration::from_secs(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_sleeper_advances_clock() {
        let start = tokio::time::Instant::now();
        TokioSleeper.sleep(Duration::from_secs(3)).await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
