//! Rolling request window for the per-minute quota.
//!
//! Counts admitted requests since `window_start`. When the window length has
//! elapsed the count resets, so at most `max_requests` calls are admitted per
//! window.

use std::time::Duration;
use tokio::time::Instant;

/// Request counter for the current window.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    /// When the current window opened.
    pub window_start: Instant,
    /// Requests admitted since `window_start`.
    pub requests: u32,
    /// Window length (60s in production).
    pub length: Duration,
}

impl RateLimitWindow {
    /// Create a window that opens now.
    pub fn new(length: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            requests: 0,
            length,
        }
    }

    /// Reset the counter if the window has elapsed at `now`.
    ///
    /// Returns true when a reset happened.
    pub fn roll(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.window_start) >= self.length {
            self.window_start = now;
            self.requests = 0;
            true
        } else {
            false
        }
    }

    /// Whether another request fits under `max_requests`.
    pub fn has_room(&self, max_requests: u32) -> bool {
        self.requests < max_requests
    }

    /// Count one admitted request.
    pub fn record(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    /// Time until the window resets, measured from `now`.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.length.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_new_window_is_empty() {
        let window = RateLimitWindow::new(Duration::from_secs(60));
        assert_eq!(window.requests, 0);
        assert!(window.has_room(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_fills_window() {
        let mut window = RateLimitWindow::new(Duration::from_secs(60));
        for _ in 0..5 {
            assert!(window.has_room(5));
            window.record();
        }
        assert!(!window.has_room(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_roll_before_expiry_keeps_count() {
        let mut window = RateLimitWindow::new(Duration::from_secs(60));
        window.record();
        tokio::time::advance(Duration::from_secs(59)).await;

        assert!(!window.roll(Instant::now()));
        assert_eq!(window.requests, 1);
        assert_eq!(window.remaining(Instant::now()), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_roll_after_expiry_resets() {
        let mut window = RateLimitWindow::new(Duration::from_secs(60));
        window.record();
        window.record();
        tokio::time::advance(Duration::from_secs(60)).await;

        let now = Instant::now();
        assert!(window.roll(now));
        assert_eq!(window.requests, 0);
        assert_eq!(window.window_start, now);
        assert_eq!(window.remaining(now), Duration::from_secs(60));
    }
}
