//! HTTP transport and retry executor
//!
//! Every backend call goes through the same pipeline: build an [`HttpRequest`],
//! hand it to an [`HttpTransport`], log, and retry transient failures.
//!
//! # design principles
//! - **The transport is a seam** - production uses [`ReqwestTransport`], tests script responses
//! - **Requests are rebuilt per attempt** - multipart bodies are consumed when sent, so the
//!   executor calls the builder again instead of resending an old request
//! - **Only transport failures are retried** - plus 5xx for backends without a status envelope;
//!   401, other 4xx and unparsable bodies are returned as-is
//! - **Cancellation is observed everywhere** - in-flight sends and backoff sleeps race the token

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, Result};
use crate::utils::log_sanitizer::truncate_for_log;

/// 默认连接超时（秒）
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Upper bound for the backoff exponent, keeps `2^n` from overflowing.
const MAX_BACKOFF_EXPONENT: u32 = 16;

// ============ Request / response model ============

/// One part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormPart {
    Text {
        name: String,
        value: String,
        content_type: Option<String>,
    },
    File {
        name: String,
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

impl FormPart {
    pub fn name(&self) -> &str {
        match self {
            Self::Text { name, .. } | Self::File { name, .. } => name,
        }
    }
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    Empty,
    /// Serialized JSON document.
    Json(Vec<u8>),
    Multipart(Vec<FormPart>),
}

/// A fully built POST request, ready for one send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
            timeout,
        }
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<B: serde::Serialize>(mut self, body: &B, backend: &str) -> Result<Self> {
        let bytes = serde_json::to_vec(body).map_err(|e| BackendError::SerializationError {
            backend: backend.to_string(),
            detail: e.to_string(),
        })?;
        self.body = RequestBody::Json(bytes);
        Ok(self)
    }

    #[must_use]
    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Attach `Authorization: Bearer <token>`.
    #[must_use]
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    /// Header value by case-insensitive name.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A received response. The round trip completed; the status may still be an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            reason: None,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

// ============ Transport ============

/// Sends one request and reads the whole response body.
///
/// Implementations map connection failures to [`BackendError::NetworkError`] and
/// timeouts to [`BackendError::Timeout`]; any HTTP status is a successful send.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, backend: &str, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpTransport`] over a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| BackendError::ConfigError {
                backend: "transport".to_string(),
                detail: format!("failed to create HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build_form(backend: &str, parts: Vec<FormPart>) -> Result<Form> {
        let mut form = Form::new();
        for part in parts {
            form = match part {
                FormPart::Text {
                    name,
                    value,
                    content_type,
                } => {
                    let mut text = Part::text(value);
                    if let Some(content_type) = content_type {
                        text = text
                            .mime_str(&content_type)
                            .map_err(|e| serialization_error(backend, &e))?;
                    }
                    form.part(name, text)
                }
                FormPart::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => {
                    let file = Part::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(&content_type)
                        .map_err(|e| serialization_error(backend, &e))?;
                    form.part(name, file)
                }
            };
        }
        Ok(form)
    }
}

fn serialization_error(backend: &str, e: &reqwest::Error) -> BackendError {
    BackendError::SerializationError {
        backend: backend.to_string(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, backend: &str, request: HttpRequest) -> Result<HttpResponse> {
        let mut builder = self.client.post(&request.url).timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(bytes) => builder
                .header("Content-Type", "application/json; charset=utf-8")
                .body(bytes),
            RequestBody::Multipart(parts) => builder.multipart(Self::build_form(backend, parts)?),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout {
                    backend: backend.to_string(),
                    detail: e.to_string(),
                }
            } else {
                BackendError::NetworkError {
                    backend: backend.to_string(),
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        let reason = status.canonical_reason().map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| BackendError::NetworkError {
                backend: backend.to_string(),
                detail: format!("Failed to read response body: {e}"),
            })?;

        Ok(HttpResponse {
            status: status.as_u16(),
            reason,
            body,
        })
    }
}

// ============ Retry executor ============

/// Retry settings for one backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 disables retry).
    pub retry_count: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_delay: Duration,
    /// Treat HTTP 5xx as transient. Off for backends whose body carries a status.
    pub retry_server_errors: bool,
}

impl RetryPolicy {
    /// `base_delay_secs` falls back to 1 second when non-positive or not representable.
    pub fn new(retry_count: u32, base_delay_secs: f64, retry_server_errors: bool) -> Self {
        let base_delay = Some(base_delay_secs)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .unwrap_or(Duration::from_secs(1));
        Self {
            retry_count,
            base_delay,
            retry_server_errors,
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Delay before attempt `attempt` (1-based): `base × 2^(attempt-2)`, zero for the first.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 1.0, true)
    }
}

/// HTTP tool function set
pub struct HttpUtils;

impl HttpUtils {
    /// Sends one request, racing it against `cancel`.
    pub async fn execute_request(
        transport: &dyn HttpTransport,
        backend: &str,
        request: HttpRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        log::debug!("[{backend}] POST {}", request.url);

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(BackendError::Cancelled { backend: backend.to_string() });
            }
            result = transport.send(backend, request) => result?,
        };

        log::debug!("[{backend}] Response Status: {}", response.status);
        log::debug!(
            "[{backend}] Response Body: {}",
            truncate_for_log(&response.body)
        );

        Ok(response)
    }

    /// Performs a request with retries
    ///
    /// `build` is invoked once per attempt, so every attempt sends a freshly
    /// constructed request.
    ///
    /// # Returns
    /// * `Ok(response)` - any received response, including the last 5xx once retries run out
    /// * `Err(BackendError)` - build failure, cancellation, or the last transport error
    ///
    /// # Retry strategy
    /// - Retries `NetworkError` / `Timeout`, and 5xx when `policy.retry_server_errors`
    /// - Delay before attempt `n` is `base_delay × 2^(n-2)`
    /// - Never retries 4xx (401 included) or parse problems
    pub async fn execute_with_retry<F>(
        transport: &dyn HttpTransport,
        backend: &str,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
        mut build: F,
    ) -> Result<HttpResponse>
    where
        F: FnMut() -> Result<HttpRequest> + Send,
    {
        let max_attempts = policy.max_attempts();
        let mut attempt = 1;

        loop {
            let request = build()?;
            let outcome = Self::execute_request(transport, backend, request, cancel).await;
            let has_next = attempt < max_attempts;

            match outcome {
                Ok(response) if has_next && policy.retry_server_errors && response.is_server_error() => {
                    log::warn!(
                        "[{backend}] HTTP {} on attempt {attempt}/{max_attempts}, retrying in {:.1}s",
                        response.status,
                        policy.delay_before(attempt + 1).as_secs_f32()
                    );
                }
                Ok(response) => return Ok(response),
                Err(e) if has_next && e.is_retryable() => {
                    log::warn!(
                        "[{backend}] Request failed (attempt {attempt}/{max_attempts}), retrying in {:.1}s: {e}",
                        policy.delay_before(attempt + 1).as_secs_f32()
                    );
                }
                Err(e) => return Err(e),
            }

            attempt += 1;
            Self::sleep_or_cancel(backend, policy.delay_before(attempt), cancel).await?;
        }
    }

    async fn sleep_or_cancel(
        backend: &str,
        delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(BackendError::Cancelled { backend: backend.to_string() }),
            () = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Parse a JSON body into a generic value, mapping failures to `ParseError`.
    pub fn parse_json(response_text: &str, backend: &str) -> Result<serde_json::Value> {
        serde_json::from_str(response_text).map_err(|e| {
            log::error!("[{backend}] JSON parse failed: {e}");
            log::error!(
                "[{backend}] Raw response: {}",
                truncate_for_log(response_text)
            );
            BackendError::ParseError {
                backend: backend.to_string(),
                detail: e.to_string(),
            }
        })
    }
}
