//! Upstream HTTP transport for provider adapters.
//!
//! Adapters only ever issue GET requests with a handful of headers, so the
//! envelope carries just the URL, headers and a timeout that the transport
//! clamps to the caller's remaining deadline.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Boxed future returned by [`HttpClient::get`].
pub type HttpFuture<'a> = Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;

/// Authentication applied to outgoing requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpAuth {
    None,
    /// A static API-key header, e.g. a subscription key.
    Header { name: String, value: String },
}

/// Outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_auth(self, auth: &HttpAuth) -> Self {
        match auth {
            HttpAuth::None => self,
            HttpAuth::Header { name, value } => self.with_header(name.as_str(), value.as_str()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shrink the timeout so the call ends no later than `remaining`.
    pub fn clamp_timeout(mut self, remaining: Option<Duration>) -> Self {
        if let Some(remaining) = remaining {
            self.timeout = self.timeout.min(remaining.max(Duration::from_millis(1)));
        }
        self
    }
}

/// Status and body of an answered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self::with_status(200, body)
    }

    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// A request that never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("failed to read response body: {0}")]
    Body(String),
    /// The client refuses to reach the network; retrying cannot help.
    #[error("network access is disabled")]
    Offline,
}

impl HttpError {
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// Async transport used by adapters.
pub trait HttpClient: Send + Sync {
    fn get(&self, request: HttpRequest) -> HttpFuture<'_>;
}

/// Production transport backed by reqwest.
#[derive(Debug, Clone, Default)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("aurum/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpClient for ReqwestHttpClient {
    fn get(&self, request: HttpRequest) -> HttpFuture<'_> {
        Box::pin(async move {
            let mut builder = self.client.get(&request.url).timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }

            let response = builder.send().await.map_err(|error| {
                if error.is_timeout() {
                    HttpError::Timeout(error.to_string())
                } else if error.is_connect() {
                    HttpError::Connect(error.to_string())
                } else {
                    HttpError::Request(error.to_string())
                }
            })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| HttpError::Body(error.to_string()))?;
            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_auth_is_lowercased() {
        let request = HttpRequest::get("https://example.test/data").with_auth(&HttpAuth::Header {
            name: String::from("Ocp-Apim-Subscription-Key"),
            value: String::from("demo"),
        });

        assert_eq!(
            request
                .headers
                .get("ocp-apim-subscription-key")
                .map(String::as_str),
            Some("demo")
        );
    }

    #[test]
    fn timeout_is_clamped_to_remaining_budget() {
        let request =
            HttpRequest::get("https://example.test/data").with_timeout(Duration::from_secs(10));

        assert_eq!(request.clone().clamp_timeout(None).timeout, Duration::from_secs(10));
        assert_eq!(
            request
                .clone()
                .clamp_timeout(Some(Duration::from_millis(250)))
                .timeout,
            Duration::from_millis(250)
        );
        assert_eq!(
            request.clamp_timeout(Some(Duration::ZERO)).timeout,
            Duration::from_millis(1)
        );
    }

    #[test]
    fn only_an_offline_client_is_final() {
        assert!(HttpError::Connect(String::from("refused")).is_retryable());
        assert!(HttpError::Timeout(String::from("slow")).is_retryable());
        assert!(!HttpError::Offline.is_retryable());
    }
}
