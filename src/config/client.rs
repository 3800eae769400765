//! LLM client configuration.
//!
//! Every field parameterizes one of the governor, backoff, or executor
//! components. Durations are stored as seconds so the YAML stays readable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, TriageError};

pub const ENV_API_KEY: &str = "MISTRAL_API_KEY";
pub const ENV_API_URL: &str = "MISTRAL_API_URL";
pub const ENV_MODEL: &str = "MISTRAL_MODEL";
pub const ENV_MAX_RPM: &str = "LLM_MAX_RPM";
pub const ENV_MAX_CONCURRENT: &str = "LLM_MAX_CONCURRENT";
pub const ENV_MIN_DELAY: &str = "LLM_MIN_DELAY_SECS";
pub const ENV_MAX_DELAY: &str = "LLM_MAX_DELAY_SECS";
pub const ENV_START_DELAY: &str = "LLM_START_DELAY_SECS";
pub const ENV_BACKOFF_MULTIPLIER: &str = "LLM_BACKOFF_MULTIPLIER";
pub const ENV_JITTER: &str = "LLM_JITTER";
pub const ENV_MAX_RETRIES: &str = "LLM_MAX_RETRIES";
pub const ENV_TIMEOUT: &str = "LLM_TIMEOUT_SECS";
pub const ENV_TEMPERATURE: &str = "LLM_TEMPERATURE";

/// Immutable settings for the LLM client, loaded once at startup.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub max_requests_per_minute: u32,
    pub max_concurrent_requests: u32,
    pub min_delay_secs: f64,
    pub max_delay_secs: f64,
    pub start_delay_secs: f64,
    pub backoff_multiplier: f64,
    pub jitter_fraction: f64,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub default_max_tokens: u32,
    /// Length of the request-counting window. 60 in production.
    pub rate_window_secs: u64,
    /// How often a blocked caller re-checks the quotas.
    pub admission_poll_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mistral.ai/v1".to_string(),
            model: "mistral-small-latest".to_string(),
            api_key: String::new(),
            max_requests_per_minute: 5,
            max_concurrent_requests: 2,
            min_delay_secs: 1.0,
            max_delay_secs: 60.0,
            start_delay_secs: 2.0,
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            max_retries: 3,
            timeout_secs: 30,
            temperature: 0.7,
            default_max_tokens: 500,
            rate_window_secs: 60,
            admission_poll_ms: 100,
        }
    }
}

impl ClientConfig {
    /// Create a config with explicit credentials and default tuning
    pub fn with_credentials(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    /// Overlay values from the environment.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    /// Unparseable numbers are logged and the previous value is kept.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_API_KEY) {
            self.api_key = v;
        }
        if let Some(v) = lookup(ENV_API_URL) {
            self.base_url = v;
        }
        if let Some(v) = lookup(ENV_MODEL) {
            self.model = v;
        }
        override_parsed(&lookup, ENV_MAX_RPM, &mut self.max_requests_per_minute);
        override_parsed(&lookup, ENV_MAX_CONCURRENT, &mut self.max_concurrent_requests);
        override_parsed(&lookup, ENV_MIN_DELAY, &mut self.min_delay_secs);
        override_parsed(&lookup, ENV_MAX_DELAY, &mut self.max_delay_secs);
        override_parsed(&lookup, ENV_START_DELAY, &mut self.start_delay_secs);
        override_parsed(&lookup, ENV_BACKOFF_MULTIPLIER, &mut self.backoff_multiplier);
        override_parsed(&lookup, ENV_JITTER, &mut self.jitter_fraction);
        override_parsed(&lookup, ENV_MAX_RETRIES, &mut self.max_retries);
        override_parsed(&lookup, ENV_TIMEOUT, &mut self.timeout_secs);
        override_parsed(&lookup, ENV_TEMPERATURE, &mut self.temperature);
    }

    /// Check numeric bounds. Missing credentials are not an error here;
    /// see [`ClientConfig::missing_fields`].
    pub fn validate(&self) -> Result<()> {
        let delays = [
            ("min_delay_secs", self.min_delay_secs),
            ("max_delay_secs", self.max_delay_secs),
            ("start_delay_secs", self.start_delay_secs),
        ];
        for (name, value) in delays {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(TriageError::Config(format!(
                    "{} must be a non-negative number of seconds that fits a duration",
                    name
                )));
            }
        }
        if self.max_delay_secs < self.min_delay_secs {
            return Err(TriageError::Config("max_delay_secs must be >= min_delay_secs".to_string()));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(TriageError::Config("backoff_multiplier must be >= 1.0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(TriageError::Config("jitter_fraction must be within [0, 1]".to_string()));
        }
        if self.max_requests_per_minute == 0 {
            return Err(TriageError::Config("max_requests_per_minute must be > 0".to_string()));
        }
        if self.max_concurrent_requests == 0 {
            return Err(TriageError::Config("max_concurrent_requests must be > 0".to_string()));
        }
        if self.rate_window_secs == 0 {
            return Err(TriageError::Config("rate_window_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Names of required connection settings that are empty.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.api_key.trim().is_empty() {
            missing.push("api_key");
        }
        if self.base_url.trim().is_empty() {
            missing.push("base_url");
        }
        if self.model.trim().is_empty() {
            missing.push("model");
        }
        missing
    }

    pub fn is_configured(&self) -> bool {
        self.missing_fields().is_empty()
    }

    pub fn min_delay(&self) -> Duration {
        seconds(self.min_delay_secs)
    }

    pub fn max_delay(&self) -> Duration {
        seconds(self.max_delay_secs)
    }

    /// Starting delay, clamped into the configured bounds
    pub fn start_delay(&self) -> Duration {
        seconds(self.start_delay_secs).max(self.min_delay()).min(self.max_delay())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn admission_poll_interval(&self) -> Duration {
        Duration::from_millis(self.admission_poll_ms.max(1))
    }

    /// Total attempts per call, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

// Unvalidated values saturate: too large becomes Duration::MAX, negative or NaN becomes zero.
fn seconds(value: f64) -> Duration {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) => duration,
        Err(_) if value > 0.0 => Duration::MAX,
        Err(_) => Duration::ZERO,
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => log::warn!("Ignoring {}={:?}: not a valid value", key, raw),
        }
    }
}

// Keep the credential out of logs
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("max_requests_per_minute", &self.max_requests_per_minute)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("min_delay_secs", &self.min_delay_secs)
            .field("max_delay_secs", &self.max_delay_secs)
            .field("start_delay_secs", &self.start_delay_secs)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_fraction", &self.jitter_fraction)
            .field("max_retries", &self.max_retries)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
