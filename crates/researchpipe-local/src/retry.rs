//! Bounded retry with a pause between attempts, shared by page extraction and generation.

use researchpipe_core::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Multiplier applied to the pause after each failed attempt. `1.0` gives a fixed pause.
    pub factor: f64,
}

impl BackoffPolicy {
    pub fn fixed(max_attempts: u32, pause: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: pause,
            factor: 1.0,
        }
    }

    /// Pause before attempt `attempt + 1` (attempts are 1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let mult = self.factor.max(1.0).powi(exp);
        self.base_delay.mul_f64(mult.min(1_000.0))
    }

    /// Run `op` until it succeeds, fails with an error `retryable` rejects, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    ///
    /// Cancellation aborts the in-flight attempt and skips any remaining ones.
    pub async fn run<T, F, Fut, P>(
        &self,
        cancel: &CancellationToken,
        retryable: P,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let max = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                r = op(attempt) => r,
            };
            match res {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max && retryable(&e) => {
                    let pause = self.delay_after(attempt);
                    tracing::debug!(attempt, max, error = %e, pause_ms = pause.as_millis() as u64, "retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                        _ = tokio::time::sleep(pause) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(1))
    }
}
