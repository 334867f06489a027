//! Retry policy: exponential backoff with jitter and a bounded attempt count.
//!
//! Used around executor invocations in the worker and around collaborator
//! connection setup at startup.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_interval: Duration,
    /// Growth factor applied per failed attempt.
    pub multiplier: f64,
    /// Upper bound on any single delay.
    pub max_interval: Duration,
    /// Randomization factor in `[0.0, 1.0]`; 0.5 means +/-50%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(60),
            jitter: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Same delay between every attempt, no jitter.
    pub fn constant(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: delay,
            multiplier: 1.0,
            max_interval: delay,
            jitter: 0.0,
        }
    }

    /// Retry immediately. Mostly useful in tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::constant(Duration::ZERO, max_attempts)
    }

    /// Delay before the retry that follows failed attempt number `attempt` (1-indexed),
    /// before jitter: `initial * multiplier^(attempt - 1)`, capped at `max_interval`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped > 0.0 {
            self.max_interval
        } else {
            Duration::ZERO
        }
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.next_delay(attempt);
        // NaN would survive the clamp and panic the range sampler.
        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds or the policy's attempts are exhausted.
///
/// `op` receives the 1-indexed attempt number. The last error is returned on
/// exhaustion.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts();
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.jittered_delay(attempt);
                warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, backing off"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}
