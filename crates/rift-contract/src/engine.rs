//! Execution engine: one round trip per request, plus one transparent retry on
//! connection-level failure.
//!
//! HTTP error statuses are response data, never a reason to retry.

use crate::builder::RequestSpec;
use crate::error::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Raw response as received from the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    /// Lower-cased names; repeated headers joined with `, `.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

/// Sends a single request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestSpec) -> Result<RawResponse, TransportError>;
}

/// Production transport backed by a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("rift-contract/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &RequestSpec) -> Result<RawResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method.as_str().as_bytes())
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let to_transport_error = |e: reqwest::Error| classify(e, self.timeout);
        let response = builder.send().await.map_err(to_transport_error)?;
        let status = response.status().as_u16();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_lowercase())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let body = response.bytes().await.map_err(to_transport_error)?;

        Ok(RawResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(timeout.as_millis() as u64)
    } else if error.is_connect() {
        TransportError::Connect(error_chain(&error))
    } else {
        TransportError::Request(error_chain(&error))
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Everything observed about one request. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// `None` when the request failed at transport level.
    pub status: Option<u16>,
    pub headers: BTreeMap<String, String>,
    /// Body bytes exactly as received.
    pub raw_body: Vec<u8>,
    /// `None` for empty or non-JSON bodies.
    pub parsed_body: Option<Value>,
    pub parse_error: Option<String>,
    pub elapsed: Duration,
    /// 1, or 2 when the transparent retry was used.
    pub attempts: u8,
    pub error: Option<TransportError>,
}

impl ExecutionResult {
    pub fn from_response(raw: RawResponse, elapsed: Duration, attempts: u8) -> Self {
        let raw_body = raw.body;
        let (parsed_body, parse_error) = if raw_body.iter().all(u8::is_ascii_whitespace) {
            (None, None)
        } else {
            match serde_json::from_slice::<Value>(&raw_body) {
                Ok(value) => (Some(value), None),
                Err(e) => (None, Some(e.to_string())),
            }
        };

        Self {
            status: Some(raw.status),
            headers: raw.headers,
            raw_body,
            parsed_body,
            parse_error,
            elapsed,
            attempts,
            error: None,
        }
    }

    /// Body decoded for display; invalid UTF-8 is replaced, `raw_body` is not.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.raw_body)
    }

    pub fn from_error(error: TransportError, elapsed: Duration, attempts: u8) -> Self {
        Self {
            status: None,
            headers: BTreeMap::new(),
            raw_body: Vec::new(),
            parsed_body: None,
            parse_error: None,
            elapsed,
            attempts,
            error: Some(error),
        }
    }
}

/// Applies the timeout and retry policy around a [`Transport`].
#[derive(Clone)]
pub struct ExecutionEngine {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    retry_connect_failures: bool,
}

impl ExecutionEngine {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration, retry_connect_failures: bool) -> Self {
        Self {
            transport,
            timeout,
            retry_connect_failures,
        }
    }

    pub async fn execute(&self, request: &RequestSpec) -> ExecutionResult {
        let start = Instant::now();
        debug!("{} {} (attempt 1)", request.method, request.url);
        let mut attempts = 1;
        let mut outcome = self.attempt(request).await;

        if let Err(error) = &outcome {
            if self.retry_connect_failures && error.is_retryable() {
                warn!(
                    "{} {} failed ({}), retrying once",
                    request.method, request.url, error
                );
                attempts = 2;
                outcome = self.attempt(request).await;
            }
        }

        let elapsed = start.elapsed();
        match outcome {
            Ok(raw) => {
                debug!(
                    "{} {} -> {} in {}ms",
                    request.method,
                    request.url,
                    raw.status,
                    elapsed.as_millis()
                );
                ExecutionResult::from_response(raw, elapsed, attempts)
            }
            Err(error) => {
                debug!("{} {} -> {}", request.method, request.url, error);
                ExecutionResult::from_error(error, elapsed, attempts)
            }
        }
    }

    async fn attempt(&self, request: &RequestSpec) -> Result<RawResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.transport.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}
