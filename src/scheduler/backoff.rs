//! Adaptive delay shared by every caller of one client.
//!
//! Failures grow the delay (multiplier, or the server's Retry-After hint),
//! successes decay it toward the floor. One value for the whole process: a
//! 429 seen by one caller slows down all of them, since the quota is global.

use std::sync::Mutex;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::scheduler::lock;

/// Multiplicative decay applied on every success.
pub const SUCCESS_DECAY: f64 = 0.9;

/// Starting point for growth when the current delay is zero.
pub const GROWTH_SEED: Duration = Duration::from_millis(100);

/// Bounds and growth parameters for the adaptive delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the base delay, applied in both directions.
    pub jitter_fraction: f64,
    pub decay: f64,
}

impl BackoffPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            min_delay: config.min_delay(),
            max_delay: config.max_delay(),
            multiplier: config.backoff_multiplier,
            jitter_fraction: config.jitter_fraction,
            decay: SUCCESS_DECAY,
        }
    }

    // max_delay wins if the bounds are inverted
    fn clamp(&self, delay: Duration) -> Duration {
        delay.max(self.min_delay).min(self.max_delay)
    }
}

/// Owner of the shared adaptive delay.
#[derive(Debug)]
pub struct BackoffController {
    policy: BackoffPolicy,
    current: Mutex<Duration>,
}

impl BackoffController {
    pub fn new(policy: BackoffPolicy, start_delay: Duration) -> Self {
        Self {
            current: Mutex::new(policy.clamp(start_delay)),
            policy,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(BackoffPolicy::from_config(config), config.start_delay())
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// The delay every admitted call currently waits out.
    pub fn current_delay(&self) -> Duration {
        *lock(&self.current)
    }

    /// Grow the delay after a failure and return how long to sleep.
    ///
    /// The stored delay is the clamped base; jitter only affects the
    /// returned sleep. With a hint, the sleep never drops below the hint
    /// (capped at `max_delay`).
    pub fn penalize(&self, retry_after: Option<Duration>) -> Duration {
        let retry_after = retry_after.map(|hint| hint.min(self.policy.max_delay));
        let base = {
            let mut current = lock(&self.current);
            let grown = match retry_after {
                Some(hint) => hint.max(*current),
                // a zero delay would never grow
                None => scale(current.max(GROWTH_SEED), self.policy.multiplier).unwrap_or(self.policy.max_delay),
            };
            let base = self.policy.clamp(grown);
            *current = base;
            base
        };

        let mut sleep = self.jittered(base);
        if let Some(hint) = retry_after {
            sleep = sleep.max(hint);
        }

        tracing::warn!(
            base_ms = base.as_millis() as u64,
            sleep_ms = sleep.as_millis() as u64,
            retry_after_ms = retry_after.map(|h| h.as_millis() as u64),
            "Backing off after failed LLM call"
        );
        sleep
    }

    /// Record a failure, then sleep the penalty. Returns the time slept.
    pub async fn on_failure(&self, retry_after: Option<Duration>) -> Duration {
        let sleep = self.penalize(retry_after);
        tokio::time::sleep(sleep).await;
        sleep
    }

    /// Decay the delay after a success. Returns the new delay.
    pub fn on_success(&self) -> Duration {
        let mut current = lock(&self.current);
        let decayed = scale(*current, self.policy.decay)
            .unwrap_or(*current)
            .max(self.policy.min_delay);
        *current = decayed;
        tracing::debug!(delay_ms = decayed.as_millis() as u64, "LLM call succeeded, delay decayed");
        decayed
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.policy.jitter_fraction <= 0.0 {
            return base;
        }
        // uniform in [-jitter, +jitter] * base
        let spread = (fastrand::f64() * 2.0 - 1.0) * self.policy.jitter_fraction;
        let secs = base.as_secs_f64() * (1.0 + spread);
        let bounded = secs
            .max(self.policy.min_delay.as_secs_f64())
            .min(self.policy.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(bounded).unwrap_or(base)
    }
}

/// `delay * factor`, or None when the product is not a valid Duration.
fn scale(delay: Duration, factor: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).ok()
}
