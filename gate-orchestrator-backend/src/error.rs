use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for all backend operations.
///
/// Each variant carries the name of the backend that produced it (where one was
/// selected), plus variant-specific context. All variants are serializable for
/// structured error reporting.
///
/// # Retryable Errors
///
/// Only transport-level failures are transient:
/// - [`NetworkError`](Self::NetworkError): connection refused, DNS failure, broken body
/// - [`Timeout`](Self::Timeout): request timed out
///
/// The retry executor retries these with exponential backoff. HTTP 401 is handled
/// separately by the token manager and never by the retry loop.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "code")]
pub enum BackendError {
    /// Invalid or incomplete configuration (missing base URL, incomplete login
    /// credentials, no endpoint for the requested direction).
    ///
    /// Never retried.
    #[error("[{backend}] Configuration error: {detail}")]
    ConfigError {
        /// Backend that produced the error.
        backend: String,
        /// What is wrong with the configuration.
        detail: String,
    },

    /// The QR code could not be mapped to a configured backend.
    #[error("Routing error: {detail}")]
    RoutingError {
        /// The scanned code that failed to route.
        qr_code: String,
        /// Why no backend was selected.
        detail: String,
    },

    /// A network-level error occurred (connection refused, DNS failure, etc.).
    ///
    /// This is a transient error and is automatically retried.
    #[error("[{backend}] Network error: {detail}")]
    NetworkError {
        /// Backend that produced the error.
        backend: String,
        /// Error details.
        detail: String,
    },

    /// The HTTP request timed out.
    ///
    /// This is a transient error and is automatically retried.
    #[error("[{backend}] Request timeout: {detail}")]
    Timeout {
        /// Backend that produced the error.
        backend: String,
        /// Error details.
        detail: String,
    },

    /// The caller cancelled the operation while it was in flight or waiting to retry.
    #[error("[{backend}] Operation cancelled")]
    Cancelled {
        /// Backend the cancelled operation was addressed to.
        backend: String,
    },

    /// The backend answered HTTP 401 and the one-shot re-authentication did not help.
    #[error("[{backend}] Unauthorized{}", .raw_message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Unauthorized {
        /// Backend that produced the error.
        backend: String,
        /// Original error message from the backend, if available.
        raw_message: Option<String>,
    },

    /// Login was rejected or the login response carried no token.
    #[error("[{backend}] Authentication failed: {detail}")]
    AuthError {
        /// Backend that produced the error.
        backend: String,
        /// Error details.
        detail: String,
    },

    /// The response body was malformed or structurally unexpected.
    ///
    /// Never retried: the round trip itself succeeded.
    #[error("[{backend}] Parse error: {detail}")]
    ParseError {
        /// Backend that produced the error.
        backend: String,
        /// Details about the parse failure.
        detail: String,
    },

    /// The backend answered with a non-success HTTP status.
    #[error("[{backend}] HTTP {status}: {raw_message}")]
    UpstreamError {
        /// Backend that produced the error.
        backend: String,
        /// HTTP status code.
        status: u16,
        /// Message supplied by the backend (or the reason phrase).
        raw_message: String,
    },

    /// Failed to serialize a request body.
    #[error("[{backend}] Serialization error: {detail}")]
    SerializationError {
        /// Backend that produced the error.
        backend: String,
        /// Details about the serialization failure.
        detail: String,
    },
}

impl BackendError {
    /// Transport-level failures worth another attempt.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NetworkError { .. } | Self::Timeout { .. })
    }

    /// 是否为预期行为（拒绝、路由失败、取消等），用于日志分级。
    ///
    /// 返回 `true` 时应使用 `warn` 级别，`false` 时使用 `error` 级别。
    /// **新增变体时请同步更新此方法。**
    #[must_use]
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::RoutingError { .. }
                | Self::Cancelled { .. }
                | Self::Unauthorized { .. }
                | Self::AuthError { .. }
                | Self::UpstreamError { .. }
        )
    }

    /// Human-facing message, without the `[backend]` prefix.
    ///
    /// Used as the `message` of a failed canonical result.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::UpstreamError { raw_message, .. } => raw_message.clone(),
            Self::Unauthorized {
                raw_message: Some(msg),
                ..
            } => msg.clone(),
            Self::ConfigError { detail, .. }
            | Self::RoutingError { detail, .. }
            | Self::NetworkError { detail, .. }
            | Self::Timeout { detail, .. }
            | Self::AuthError { detail, .. }
            | Self::SerializationError { detail, .. } => detail.clone(),
            Self::ParseError { detail, .. } => format!("Invalid response from backend: {detail}"),
            Self::Unauthorized { .. } => "Unauthorized".to_string(),
            Self::Cancelled { .. } => "Operation cancelled".to_string(),
        }
    }
}

/// Convenience type alias for `Result<T, BackendError>`.
pub type Result<T> = std::result::Result<T, BackendError>;
