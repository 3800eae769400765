//! Transport layer: one HTTP attempt in, one classified outcome out
//!
//! The [`Transport`] trait is the seam between the retry loop and the
//! network. It never returns a Rust error; every failure is classified into
//! a [`TransportOutcome`] variant so the executor can decide what to do.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};

use crate::config::ClientConfig;
use crate::error::{Result, TriageError};
use crate::llm::types::{ChatRequest, TransportOutcome};
use crate::scheduler::lock;

/// One network attempt against the completion endpoint
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> TransportOutcome;
}

/// Classify a finished HTTP exchange
pub fn classify_response(
    status: u16,
    retry_after: Option<Duration>,
    content_type: Option<String>,
    body: String,
) -> TransportOutcome {
    match status {
        200..=299 => TransportOutcome::Success { body, content_type },
        429 => TransportOutcome::RateLimited { retry_after },
        500..=599 => TransportOutcome::ServerError { status, body },
        _ => TransportOutcome::ClientError { status, body },
    }
}

/// Parse a `Retry-After` header given in (possibly fractional) seconds.
/// HTTP-date values and values no Duration can hold yield None.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// reqwest-backed transport for OpenAI-compatible `/chat/completions`
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| TriageError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &ChatRequest) -> TransportOutcome {
        let response = match self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return TransportOutcome::NetworkFailure(format!("Request failed: {}", e)),
        };

        let status = response.status().as_u16();
        let headers = response.headers();
        let retry_after = headers
            .get(RETRY_AFTER)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_retry_after);
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);

        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => return TransportOutcome::NetworkFailure(format!("Failed to read response body: {}", e)),
        };

        classify_response(status, retry_after, content_type, body)
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").field("endpoint", &self.endpoint).finish()
    }
}

/// Scripted transport for tests and offline runs.
///
/// Returns queued outcomes in order, then `fallback` once the queue is empty.
/// Tracks call count and peak concurrency.
#[derive(Debug)]
pub struct MockTransport {
    script: Mutex<VecDeque<TransportOutcome>>,
    fallback: TransportOutcome,
    latency: Duration,
    calls: AtomicU32,
    active: AtomicU32,
    peak_active: AtomicU32,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockTransport {
    pub fn new(script: Vec<TransportOutcome>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: TransportOutcome::NetworkFailure("mock script exhausted".to_string()),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            active: AtomicU32::new(0),
            peak_active: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `outcome`
    pub fn always(outcome: TransportOutcome) -> Self {
        Self::new(Vec::new()).with_fallback(outcome)
    }

    pub fn with_fallback(mut self, outcome: TransportOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Simulated network time per call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `send` calls observed
    pub fn peak_concurrency(&self) -> u32 {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ChatRequest) -> TransportOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request.clone());

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let next = lock(&self.script).pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
