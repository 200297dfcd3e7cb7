//! Politeness limiter shared by all page fetches of one request.

use governor::{Quota, RateLimiter};
use researchpipe_core::{Error, Result};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// One permit per `min_interval`, plus a random extra pause in `[0, min_interval)`.
///
/// Global rather than per host. Cloning shares the underlying bucket.
#[derive(Clone)]
pub struct PoliteLimiter {
    limiter: Option<Arc<DirectLimiter>>,
    min_interval: Duration,
}

impl std::fmt::Debug for PoliteLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoliteLimiter")
            .field("min_interval", &self.min_interval)
            .field("enabled", &self.limiter.is_some())
            .finish()
    }
}

impl PoliteLimiter {
    /// A zero interval disables limiting entirely.
    pub fn new(min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval).map(|q| {
            let q = q.allow_burst(NonZeroU32::MIN);
            Arc::new(RateLimiter::direct(q))
        });
        Self {
            limiter,
            min_interval,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.min_interval.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(fastrand::u64(0..max_ms))
    }

    /// Wait for a permit. Returns `Error::Cancelled` if the token fires first.
    ///
    /// The jitter is slept before the permit is taken, so the caller's fetch starts
    /// when the permit is granted and consecutive fetches are at least `min_interval` apart.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        let jitter = self.jitter();
        tracing::debug!(jitter_ms = jitter.as_millis() as u64, "rate limiter jitter");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(jitter) => {}
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            _ = limiter.until_ready() => Ok(()),
        }
    }
}
