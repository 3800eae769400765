//! Request executor: the resilient LLM client
//!
//! Every pipeline stage calls through one shared [`LlmClient`]. Each call
//! runs a bounded retry loop:
//! 1. wait for admission (rate window, concurrency ceiling, adaptive delay)
//! 2. make one transport attempt, holding the permit only for that attempt
//! 3. on success decay the delay and parse the body, with no further retries
//! 4. on 429/5xx/network failure grow the delay and try again
//! 5. on any other 4xx give up immediately
//!
//! Errors come back as values; nothing here panics on a bad response.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::llm::error::LlmError;
use crate::llm::extract::extract_structured;
use crate::llm::response::parse_response;
use crate::llm::transport::{HttpTransport, Transport};
use crate::llm::types::{ChatRequest, ParsedResult, TransportOutcome, Usage};
use crate::scheduler::{AdmissionGovernor, BackoffController, GovernorSnapshot, lock};

/// Text returned by `generate_text` when the client has no credentials.
pub const PLACEHOLDER_RESPONSE: &str = "Mock response - LLM not configured";

/// Bookkeeping for one `execute` call
#[derive(Debug, Clone)]
pub struct CallAttempt {
    pub prompt: String,
    pub max_tokens: u32,
    /// 1-based number of the current attempt (0 before the first)
    pub attempt: u32,
    started: Instant,
}

impl CallAttempt {
    pub fn new(prompt: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            attempt: 0,
            started: Instant::now(),
        }
    }

    /// Advance to the next attempt
    pub fn begin(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Shared, rate-governed client for one completion endpoint
pub struct LlmClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    governor: AdmissionGovernor,
    backoff: Arc<BackoffController>,
    usage: Mutex<Usage>,
}

impl LlmClient {
    /// Create a client that talks HTTP to `config.base_url`
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over any transport
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let missing = config.missing_fields();
        if missing.is_empty() {
            tracing::info!(base_url = %config.base_url, model = %config.model, "LLM client configured");
        } else {
            tracing::warn!(missing = ?missing, "LLM client not configured, calls return placeholder responses");
        }

        let backoff = Arc::new(BackoffController::from_config(&config));
        let governor = AdmissionGovernor::from_config(&config, Arc::clone(&backoff));
        Self {
            config,
            transport,
            governor,
            backoff,
            usage: Mutex::new(Usage::default()),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn is_ready(&self) -> bool {
        self.config.is_configured()
    }

    pub fn governor(&self) -> &AdmissionGovernor {
        &self.governor
    }

    pub fn snapshot(&self) -> GovernorSnapshot {
        self.governor.snapshot()
    }

    /// Get cumulative token usage
    pub fn total_usage(&self) -> Usage {
        *lock(&self.usage)
    }

    /// Run one prompt through the retry loop and return the response text.
    pub async fn execute(&self, prompt: &str, max_tokens: u32) -> ParsedResult<String> {
        let missing = self.config.missing_fields();
        if !missing.is_empty() {
            return Err(LlmError::Misconfigured { missing });
        }

        let request = ChatRequest::new(&self.config.model, prompt, max_tokens, self.config.temperature);
        let max_attempts = self.config.max_attempts();
        let mut call = CallAttempt::new(prompt, max_tokens);

        loop {
            let attempt = call.begin();
            let outcome = {
                let _permit = self.governor.acquire().await;
                tracing::debug!(attempt, in_flight = self.governor.in_flight(), "Sending LLM request");
                self.transport.send(&request).await
            };

            let (error, retry_after) = match outcome {
                TransportOutcome::Success { body, content_type } => {
                    self.backoff.on_success();
                    let payload = parse_response(&body, content_type.as_deref())?;
                    if let Some(usage) = payload.usage {
                        lock(&self.usage).add(&usage);
                    }
                    tracing::debug!(
                        attempt,
                        elapsed_ms = call.elapsed().as_millis() as u64,
                        "LLM request succeeded"
                    );
                    return Ok(payload.text);
                }
                TransportOutcome::ClientError { status, body } => {
                    tracing::error!(status, attempt, "LLM request rejected, not retrying");
                    return Err(LlmError::ClientError { status, body });
                }
                TransportOutcome::RateLimited { retry_after } => (LlmError::RateLimited { retry_after }, retry_after),
                TransportOutcome::ServerError { status, body } => (LlmError::ServerError { status, body }, None),
                TransportOutcome::NetworkFailure(cause) => (LlmError::NetworkFailure(cause), None),
            };

            if attempt >= max_attempts {
                self.backoff.penalize(retry_after);
                tracing::error!(
                    attempts = attempt,
                    elapsed_ms = call.elapsed().as_millis() as u64,
                    error = %error,
                    "LLM request failed, retries exhausted"
                );
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            tracing::warn!(attempt, max_attempts, error = %error, "LLM request failed, retrying");
            self.backoff.on_failure(retry_after).await;
        }
    }

    /// Best-effort text generation for callers that tolerate a blank result.
    ///
    /// Returns the placeholder text when unconfigured and an empty string on
    /// any other failure (the error is logged).
    pub async fn generate_text(&self, prompt: &str, max_tokens: u32) -> String {
        match self.execute(prompt, max_tokens).await {
            Ok(text) => text,
            Err(LlmError::Misconfigured { .. }) => PLACEHOLDER_RESPONSE.to_string(),
            Err(e) => {
                tracing::error!(kind = %e.kind(), error = %e, "Text generation failed");
                String::new()
            }
        }
    }

    /// Generate and parse a JSON object.
    ///
    /// Errors carry the raw model text when there was one.
    pub async fn generate_structured(&self, prompt: &str, max_tokens: u32) -> ParsedResult<Map<String, Value>> {
        let text = self.execute(prompt, max_tokens).await?;
        extract_structured(&text).inspect_err(|e| {
            tracing::warn!(kind = %e.kind(), "Model output did not contain a usable JSON object");
        })
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.config.model)
            .field("base_url", &self.config.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::error::ErrorKind;
    use crate::llm::transport::MockTransport;
    use async_trait::async_trait;
    use serde_json::json;

    fn test_config() -> ClientConfig {
        let mut config = ClientConfig::with_credentials("http://llm.test/v1", "test-model", "test-key");
        config.min_delay_secs = 0.5;
        config.start_delay_secs = 1.0;
        config.max_delay_secs = 30.0;
        config.jitter_fraction = 0.0;
        config.max_retries = 2;
        config
    }

    fn chat(content: &str) -> TransportOutcome {
        TransportOutcome::json(
            json!({
                "choices": [{ "message": { "role": "assistant", "content": content } }],
                "usage": { "prompt_tokens": 10, "completion_tokens": 5 }
            })
            .to_string(),
        )
    }

    fn client_with(config: ClientConfig, mock: &Arc<MockTransport>) -> LlmClient {
        LlmClient::with_transport(config, mock.clone())
    }

    struct PanickingTransport;

    #[async_trait]
    impl Transport for PanickingTransport {
        async fn send(&self, _request: &ChatRequest) -> TransportOutcome {
            panic!("transport exploded")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_returns_content() {
        let mock = Arc::new(MockTransport::always(chat("hello")));
        let client = client_with(test_config(), &mock);

        assert_eq!(client.execute("say hi", 50).await.unwrap(), "hello");
        assert_eq!(mock.calls(), 1);
        assert_eq!(mock.requests()[0].prompt(), Some("say hi"));
        assert_eq!(mock.requests()[0].max_tokens, 50);
        assert_eq!(client.governor().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_decays_delay() {
        let mock = Arc::new(MockTransport::always(chat("ok")));
        let client = client_with(test_config(), &mock);

        client.execute("p", 10).await.unwrap();
        assert_eq!(client.snapshot().current_delay, Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_usage_accumulates() {
        let mock = Arc::new(MockTransport::always(chat("ok")));
        let client = client_with(test_config(), &mock);

        client.execute("a", 10).await.unwrap();
        client.execute("b", 10).await.unwrap();
        assert_eq!(client.total_usage(), Usage::new(20, 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_not_retried() {
        let mock = Arc::new(MockTransport::always(TransportOutcome::ClientError {
            status: 404,
            body: "Not Found".to_string(),
        }));
        let client = client_with(test_config(), &mock);

        let err = client.execute("p", 10).await.unwrap_err();
        assert_eq!(
            err,
            LlmError::ClientError {
                status: 404,
                body: "Not Found".to_string()
            }
        );
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_honors_retry_after() {
        let mock = Arc::new(MockTransport::new(vec![TransportOutcome::RateLimited {
            retry_after: Some(Duration::from_secs(2)),
        }]).with_fallback(chat("recovered")));
        let client = client_with(test_config(), &mock);

        let started = Instant::now();
        let text = client.execute("p", 10).await.unwrap();

        assert_eq!(text, "recovered");
        assert_eq!(mock.calls(), 2);
        // start delay, then the 2s penalty, then the raised spacing delay
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(client.snapshot().current_delay, Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_exhaust_retries() {
        let mock = Arc::new(MockTransport::always(TransportOutcome::ServerError {
            status: 503,
            body: "overloaded".to_string(),
        }));
        let client = client_with(test_config(), &mock);

        let err = client.execute("p", 10).await.unwrap_err();
        assert_eq!(mock.calls(), 3);
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        match err {
            LlmError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert_eq!(
                    *last,
                    LlmError::ServerError {
                        status: 503,
                        body: "overloaded".to_string()
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // 1 -> 2 -> 4 -> 8, the last penalty is recorded without sleeping
        assert_eq!(client.snapshot().current_delay, Duration::from_secs(8));
        assert_eq!(client.governor().in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_kept_as_last_error() {
        let mock = Arc::new(MockTransport::always(TransportOutcome::NetworkFailure(
            "connection reset".to_string(),
        )));
        let mut config = test_config();
        config.max_retries = 0;
        let client = client_with(config, &mock);

        let err = client.execute("p", 10).await.unwrap_err();
        assert_eq!(mock.calls(), 1);
        assert_eq!(
            err,
            LlmError::RetriesExhausted {
                attempts: 1,
                last: Box::new(LlmError::NetworkFailure("connection reset".to_string())),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_html_success_not_retried() {
        let mock = Arc::new(MockTransport::always(TransportOutcome::Success {
            body: "<html><body>Gateway login</body></html>".to_string(),
            content_type: Some("text/html".to_string()),
        }));
        let client = client_with(test_config(), &mock);

        let err = client.execute("p", 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedContentType);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_misconfigured_makes_no_calls() {
        let mock = Arc::new(MockTransport::always(chat("never")));
        let mut config = test_config();
        config.api_key = String::new();
        let client = client_with(config, &mock);

        assert!(!client.is_ready());
        let err = client.execute("p", 10).await.unwrap_err();
        assert_eq!(err, LlmError::Misconfigured { missing: vec!["api_key"] });
        assert_eq!(client.generate_text("p", 10).await, PLACEHOLDER_RESPONSE);
        assert_eq!(
            client.generate_structured("p", 10).await.unwrap_err().kind(),
            ErrorKind::Misconfigured
        );
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_text_blank_on_failure() {
        let mock = Arc::new(MockTransport::always(TransportOutcome::ClientError {
            status: 401,
            body: "Unauthorized".to_string(),
        }));
        let client = client_with(test_config(), &mock);

        assert_eq!(client.generate_text("p", 10).await, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_structured_from_prose() {
        let mock = Arc::new(MockTransport::always(chat(
            "Here is the triage: {\"priority\": \"high\", \"estimate\": 3,} Let me know!",
        )));
        let client = client_with(test_config(), &mock);

        let value = client.generate_structured("triage", 100).await.unwrap();
        assert_eq!(value["priority"], "high");
        assert_eq!(value["estimate"], 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_structured_keeps_raw_text() {
        let mock = Arc::new(MockTransport::always(chat("I cannot answer that.")));
        let client = client_with(test_config(), &mock);

        let err = client.generate_structured("triage", 100).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoStructureDetected);
        assert_eq!(err.raw_text(), Some("I cannot answer that."));
    }

    #[tokio::test(start_paused = true)]
    async fn test_null_content_is_not_mistaken_for_an_answer() {
        let body = json!({ "choices": [{ "message": { "role": "assistant", "content": null } }] }).to_string();
        let mock = Arc::new(MockTransport::always(TransportOutcome::json(body)));
        let client = client_with(test_config(), &mock);

        let err = client.generate_structured("triage", 100).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoStructureDetected);
        assert_eq!(err.raw_text(), Some(""));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_transport_releases_slot() {
        let client = Arc::new(LlmClient::with_transport(test_config(), Arc::new(PanickingTransport)));

        let task = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.execute("p", 10).await })
        };
        assert!(task.await.unwrap_err().is_panic());
        assert_eq!(client.governor().in_flight(), 0);
    }

    #[test]
    fn test_call_attempt_counts() {
        let mut call = CallAttempt::new("p", 5);
        assert_eq!(call.attempt, 0);
        assert_eq!(call.begin(), 1);
        assert_eq!(call.begin(), 2);
    }

    #[test]
    fn test_debug_hides_key() {
        let mock = Arc::new(MockTransport::always(chat("x")));
        let client = client_with(test_config(), &mock);
        assert!(!format!("{:?}", client).contains("test-key"));
    }
}
