//! Admission control for outbound LLM calls.
//!
//! A caller gets an [`AdmissionPermit`] once both the per-minute window and
//! the concurrency ceiling have room, and after it has waited out the
//! current adaptive delay. Dropping the permit releases the concurrency
//! slot, so every exit path (success, error, panic, cancelled future)
//! gives the slot back exactly once.
//!
//! Admission is polling, not queued: whichever caller next sees free quota
//! under the lock wins. There is no FIFO guarantee.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::scheduler::backoff::BackoffController;
use crate::scheduler::lock;
use crate::scheduler::rate_limit::RateLimitWindow;

/// Point-in-time view of the governor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorSnapshot {
    pub in_flight: u32,
    pub requests_in_window: u32,
    pub current_delay: Duration,
}

/// Gatekeeper for the rate and concurrency quotas.
///
/// The window counter and the in-flight counter sit behind separate locks.
/// Admission takes window then in-flight, release takes in-flight only.
/// Neither lock is held across a sleep or a network call.
#[derive(Debug)]
pub struct AdmissionGovernor {
    max_requests_per_window: u32,
    max_concurrent: u32,
    poll_interval: Duration,
    window: Mutex<RateLimitWindow>,
    in_flight: Mutex<u32>,
    backoff: Arc<BackoffController>,
}

impl AdmissionGovernor {
    pub fn new(
        max_requests_per_window: u32,
        window_length: Duration,
        max_concurrent: u32,
        poll_interval: Duration,
        backoff: Arc<BackoffController>,
    ) -> Self {
        Self {
            max_requests_per_window,
            max_concurrent,
            poll_interval,
            window: Mutex::new(RateLimitWindow::new(window_length)),
            in_flight: Mutex::new(0),
            backoff,
        }
    }

    pub fn from_config(config: &ClientConfig, backoff: Arc<BackoffController>) -> Self {
        Self::new(
            config.max_requests_per_minute,
            config.rate_window(),
            config.max_concurrent_requests,
            config.admission_poll_interval(),
            backoff,
        )
    }

    /// Wait until the call may proceed.
    ///
    /// Blocks (by sleeping) while either quota is exhausted, then sleeps the
    /// current adaptive delay. The returned permit must be held for the
    /// duration of the call.
    pub async fn acquire(&self) -> AdmissionPermit<'_> {
        let mut waited = false;
        while !self.try_admit() {
            if !waited {
                let window_resets_in = lock(&self.window).remaining(Instant::now());
                tracing::debug!(
                    in_flight = self.in_flight(),
                    max_concurrent = self.max_concurrent,
                    window_resets_in_ms = window_resets_in.as_millis() as u64,
                    "Quota exhausted, waiting for admission"
                );
                waited = true;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        // Built before the spacing sleep so a dropped future still releases.
        let permit = AdmissionPermit { governor: self };

        let delay = self.backoff.current_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        permit
    }

    /// Non-blocking admission check. Counts the call when it returns a permit.
    pub fn try_acquire(&self) -> Option<AdmissionPermit<'_>> {
        self.try_admit().then(|| AdmissionPermit { governor: self })
    }

    fn try_admit(&self) -> bool {
        let mut window = lock(&self.window);
        window.roll(Instant::now());
        if !window.has_room(self.max_requests_per_window) {
            return false;
        }

        let mut in_flight = lock(&self.in_flight);
        if *in_flight >= self.max_concurrent {
            return false;
        }

        window.record();
        *in_flight += 1;
        true
    }

    fn release(&self) {
        let mut in_flight = lock(&self.in_flight);
        *in_flight = in_flight.saturating_sub(1);
    }

    pub fn in_flight(&self) -> u32 {
        *lock(&self.in_flight)
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        let requests_in_window = {
            let mut window = lock(&self.window);
            window.roll(Instant::now());
            window.requests
        };
        GovernorSnapshot {
            in_flight: self.in_flight(),
            requests_in_window,
            current_delay: self.backoff.current_delay(),
        }
    }
}

/// Proof of admission. Releases its concurrency slot on drop.
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct AdmissionPermit<'a> {
    governor: &'a AdmissionGovernor,
}

impl AdmissionPermit<'_> {
    /// Release the slot now rather than at end of scope.
    pub fn release(self) {}
}

impl Drop for AdmissionPermit<'_> {
    fn drop(&mut self) {
        self.governor.release();
    }
}
