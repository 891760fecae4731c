use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider::{RequestContext, SourceError};
use crate::retry::RetryConfig;
use crate::ProviderId;

/// Per-adapter timeout and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSettings {
    pub timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

/// HTTP plumbing shared by the adapters: a circuit breaker in front of the
/// upstream, retries with backoff on retryable failures, and a request
/// timeout that never outlives the caller's deadline.
#[derive(Clone)]
pub struct AdapterTransport {
    provider_id: ProviderId,
    http_client: Arc<dyn HttpClient>,
    settings: TransportSettings,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl AdapterTransport {
    pub fn new(
        provider_id: ProviderId,
        http_client: Arc<dyn HttpClient>,
        settings: TransportSettings,
    ) -> Self {
        Self {
            provider_id,
            http_client,
            settings,
            circuit_breaker: Arc::new(CircuitBreaker::new(
                provider_id.as_str(),
                CircuitBreakerConfig::default(),
            )),
        }
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub const fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.circuit_breaker
    }

    /// False while the breaker is open and still cooling down.
    pub fn is_available(&self) -> bool {
        self.circuit_breaker.is_accepting()
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        ctx: &RequestContext,
    ) -> Result<T, SourceError> {
        let body = self.get_text(request, ctx).await?;
        serde_json::from_str(&body).map_err(|error| {
            SourceError::invalid_response(format!(
                "{} returned malformed JSON: {error}",
                self.provider_id
            ))
        })
    }

    pub async fn get_text(
        &self,
        request: HttpRequest,
        ctx: &RequestContext,
    ) -> Result<String, SourceError> {
        let provider = self.provider_id;
        if !self.circuit_breaker.allow_request() {
            return Err(SourceError::unavailable(format!(
                "{provider} circuit breaker is open; skipping upstream call"
            )));
        }

        let retry = &self.settings.retry;
        let mut attempt = 0_u32;
        loop {
            if ctx.is_expired() {
                return Err(SourceError::deadline_exceeded());
            }

            let outgoing = request
                .clone()
                .with_timeout(Duration::from_millis(self.settings.timeout_ms))
                .clamp_timeout(ctx.remaining());
            let (error, retryable) = match self.http_client.get(outgoing).await {
                Ok(response) if response.is_success() => {
                    self.circuit_breaker.record_success();
                    return Ok(response.body);
                }
                Ok(response) => {
                    let retryable = retry.should_retry_status(response.status);
                    if !retryable && (400..500).contains(&response.status) {
                        // The upstream answered; a client error says nothing about its health.
                        self.circuit_breaker.record_success();
                        return Err(status_error(provider, response.status));
                    }
                    (status_error(provider, response.status), retryable)
                }
                Err(error) => (
                    SourceError::unavailable(format!("{provider} transport error: {error}")),
                    error.is_retryable(),
                ),
            };

            if !retryable || attempt >= retry.max_retries {
                self.circuit_breaker.record_failure();
                return Err(error);
            }

            let delay = retry.delay_for_attempt(attempt);
            if ctx.remaining().is_some_and(|remaining| delay >= remaining) {
                self.circuit_breaker.record_failure();
                return Err(error);
            }
            tracing::debug!(
                provider = %provider,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                code = error.code(),
                "retrying upstream call"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn status_error(provider: ProviderId, status: u16) -> SourceError {
    match status {
        429 => SourceError::rate_limited(format!("{provider} rate limited the request")),
        404 => SourceError::not_found(format!("{provider} has no data for the request")),
        _ => SourceError::unavailable(format!("{provider} upstream returned status {status}")),
    }
}
