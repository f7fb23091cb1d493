//! Sleep abstraction shared by every retry and pacing path.
//!
//! The fetcher, the database sink and the walker never call
//! `tokio::time::sleep` directly; they wait through a [`Sleeper`] so the
//! exact delays can be observed without waiting for them.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

/// Something that can wait for a duration.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        trace!(delay_ms = duration.as_millis(), "sleeping");
        tokio::time::sleep(duration).await;
    }
}

/// Sleeper that returns immediately and records every requested duration.
///
/// Useful for dry runs against a local API and for asserting on backoff
/// sequences.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    calls: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates a recorder with no calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every duration requested so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(duration);
        }
    }
}
