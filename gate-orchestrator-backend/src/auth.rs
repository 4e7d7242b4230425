//! Token manager: login, caching and refresh for one backend.
//!
//! State per backend: `Unauthenticated → Authenticating → Valid → (Expired → Authenticating)`.
//! Refreshes are serialized by the backend's `refresh_lock`; validity is
//! re-checked after the lock is taken so N racing callers produce one login.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::config::LoginCredentials;
use crate::dialects::common::{first_data_record, get_ci, non_blank_str, param_body, parse_object};
use crate::dialects::{is_success_status, upstream_message};
use crate::error::{BackendError, Result};
use crate::http_client::{HttpRequest, HttpTransport, HttpUtils};
use crate::registry::Backend;
use crate::token::decode_token_expiry;
use crate::utils::log_sanitizer::mask_secret;

impl Backend {
    /// Make sure a usable token is cached, logging in when needed.
    ///
    /// Returns the token to send, or `None` for backends that need no authorization.
    pub(crate) async fn ensure_authorized(
        &self,
        transport: &dyn HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        if let Some(token) = self.state.valid_token() {
            return Ok(Some(token));
        }

        let name = self.name();
        if self.config.login_configured() {
            if !self.config.credentials.is_complete() {
                return Err(BackendError::ConfigError {
                    backend: name.to_string(),
                    detail: "LoginEndpoint is set but the login email/username or password is missing"
                        .to_string(),
                });
            }

            let _guard = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(BackendError::Cancelled { backend: name.to_string() });
                }
                guard = self.state.refresh_lock.lock() => guard,
            };

            // Another caller may have refreshed while we waited.
            if let Some(token) = self.state.valid_token() {
                log::debug!("[{name}] Token refreshed by a concurrent caller");
                return Ok(Some(token));
            }

            let (token, expires_at) = self.authenticate(transport, cancel).await?;
            self.state.store_token(token.clone(), expires_at);
            return Ok(Some(token));
        }

        if let Some(api_key) = &self.config.api_key {
            return Ok(Some(self.state.adopt_api_key(api_key)));
        }

        Ok(None)
    }

    /// Log in and return the token with its decoded expiry.
    ///
    /// Never sends an Authorization header. The caller holds `refresh_lock`.
    pub(crate) async fn authenticate(
        &self,
        transport: &dyn HttpTransport,
        cancel: &CancellationToken,
    ) -> Result<(String, Option<DateTime<Utc>>)> {
        let name = self.name();
        let url = self.config.login_url().ok_or_else(|| BackendError::ConfigError {
            backend: name.to_string(),
            detail: "LoginEndpoint is not configured".to_string(),
        })?;
        let body = login_body(&self.config.credentials);
        let timeout = self.config.timeout;

        log::info!("[{name}] Logging in at {url}");
        let response = HttpUtils::execute_with_retry(
            transport,
            name,
            &self.config.retry,
            cancel,
            || HttpRequest::post(url.as_str(), timeout).json(&body, name),
        )
        .await?;

        if !response.is_success() {
            return Err(BackendError::AuthError {
                backend: name.to_string(),
                detail: format!(
                    "login failed with HTTP {}: {}",
                    response.status,
                    upstream_message(true, &response)
                ),
            });
        }

        let token = parse_login_response(name, &response.body)?;
        let expires_at = decode_token_expiry(&token);
        match expires_at {
            Some(expiry) => log::info!(
                "[{name}] Logged in, token {} expires at {expiry}",
                mask_secret(&token)
            ),
            None => log::info!(
                "[{name}] Logged in, token {} has no known expiry",
                mask_secret(&token)
            ),
        }

        Ok((token, expires_at))
    }
}

/// `{"param":[{"EMAIL"?, "Username"?, "PASSWORD", "Password"?}]}`
///
/// Username-based backends read the mixed-case keys, so the password is sent
/// under both spellings when a username is configured.
pub(crate) fn login_body(credentials: &LoginCredentials) -> Value {
    let password = credentials.password.clone().unwrap_or_default();
    let mut fields = Map::new();
    if let Some(email) = &credentials.email {
        fields.insert("EMAIL".into(), Value::from(email.as_str()));
    }
    if let Some(username) = &credentials.username {
        fields.insert("Username".into(), Value::from(username.as_str()));
    }
    fields.insert("PASSWORD".into(), Value::from(password.as_str()));
    if credentials.username.is_some() {
        fields.insert("Password".into(), Value::from(password));
    }
    param_body(fields)
}

/// Extract the token from `{"status":..,"msg":..,"data":[{"TOKEN":".."}]}`.
pub(crate) fn parse_login_response(backend: &str, body: &str) -> Result<String> {
    let root = parse_object(backend, body)?;

    if !is_success_status(get_ci(&root, "status")) {
        let detail = non_blank_str(&root, "msg")
            .unwrap_or_else(|| "login was not successful".to_string());
        return Err(BackendError::AuthError {
            backend: backend.to_string(),
            detail,
        });
    }

    first_data_record(&root)
        .and_then(|record| non_blank_str(record, "TOKEN"))
        .ok_or_else(|| BackendError::AuthError {
            backend: backend.to_string(),
            detail: "login response does not contain a TOKEN".to_string(),
        })
}
