//! Outbound HTTP for modules.
//!
//! Every response body is parsed as JSON. A request that outlives its timeout
//! is aborted and reported as [`FetchError::Timeout`].

use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("response body is not valid JSON: {0}")]
    InvalidResponseBody(String),
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// HTTP verb, case-insensitive. `GET` when absent.
    pub method: Option<String>,
    pub headers: Vec<(String, String)>,
    /// Serialized as a JSON request body.
    pub body: Option<Value>,
    /// Overrides the host's default fetch timeout.
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Some("POST".into()),
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Value,
}

impl FetchResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl Fetcher {
    pub fn new(default_timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("lxbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            client,
            default_timeout,
        })
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<FetchResponse, FetchError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        let verb = options.method.as_deref().unwrap_or("GET").to_ascii_uppercase();
        let method = reqwest::Method::from_bytes(verb.as_bytes())
            .map_err(|_| FetchError::InvalidRequest(format!("unsupported method {verb}")))?;

        let mut request = self.client.request(method, url).timeout(timeout);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        tracing::debug!(url, method = %verb, timeout_ms = timeout.as_millis() as u64, "module fetch");
        let response = request.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| classify(e, timeout))?;
        let body = serde_json::from_slice(&bytes)
            .map_err(|e| FetchError::InvalidResponseBody(e.to_string()))?;

        Ok(FetchResponse { status, body })
    }
}

fn classify(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else if err.is_builder() {
        FetchError::InvalidRequest(err.to_string())
    } else {
        FetchError::Network(err.to_string())
    }
}
