//! Scheduling primitives shared by every LLM call.
//!
//! This module provides:
//! - **Rate window**: per-minute request counter.
//! - **Backoff**: the single adaptive delay, grown on failure and decayed on success.
//! - **Governor**: admission gate combining the window, the concurrency
//!   ceiling, and the adaptive delay.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use triagr::config::ClientConfig;
//! use triagr::scheduler::{AdmissionGovernor, BackoffController};
//!
//! let config = ClientConfig::default();
//! let backoff = Arc::new(BackoffController::from_config(&config));
//! let governor = AdmissionGovernor::from_config(&config, Arc::clone(&backoff));
//!
//! let permit = governor.acquire().await;
//! // ... network call ...
//! drop(permit);
//! ```

mod backoff;
mod governor;
mod rate_limit;

pub use backoff::{BackoffController, BackoffPolicy, SUCCESS_DECAY};
pub use governor::{AdmissionGovernor, AdmissionPermit, GovernorSnapshot};
pub use rate_limit::RateLimitWindow;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock ignoring poison; the guarded counters stay valid even if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
