//! Settings file model and per-backend configuration.
//!
//! Settings follow the gate application's `appsettings.json` layout:
//!
//! ```json
//! {
//!   "Gate": { "Id": "G01", "Type": "IN" },
//!   "Apis": {
//!     "Dss":      { "BaseUrl": "https://dss.example/api", "GateInEndpoint": "gate/validate", ... },
//!     "DwiMados": { "BaseUrl": "https://mados.example", "LoginEndpoint": "auth/login", ... }
//!   }
//! }
//! ```
//!
//! A legacy single `Api` section is still accepted and becomes the `Default` backend.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{BackendError, Result};
use crate::http_client::{HttpRequest, RetryPolicy};
use crate::types::{CaptureFormat, Dialect, GateDirection};

/// 默认请求超时（秒）
const DEFAULT_TIMEOUT_SECS: u64 = 15;
/// 默认重试次数
const DEFAULT_RETRY_COUNT: i32 = 3;
/// 默认退避基数（秒）
const DEFAULT_RETRY_BACKOFF_SECS: f64 = 1.0;

/// Name given to the backend built from the legacy `Api` section.
pub const DEFAULT_BACKEND_NAME: &str = "Default";

// ============ Settings file ============

/// Root of the settings file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Settings {
    pub gate: GateSettings,
    /// Legacy single-backend section.
    pub api: Option<ApiSettings>,
    /// Named backends.
    pub apis: BTreeMap<String, ApiSettings>,
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| settings_error(format!("invalid JSON settings: {e}")))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| settings_error(format!("invalid TOML settings: {e}")))
    }

    /// Load a settings file; `.toml` files are read as TOML, anything else as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| settings_error(format!("cannot read {}: {e}", path.display())))?;

        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            Self::from_toml_str(&text)
        } else {
            Self::from_json_str(&text)
        }
    }
}

fn settings_error(detail: String) -> BackendError {
    BackendError::ConfigError {
        backend: "settings".to_string(),
        detail,
    }
}

/// `Gate` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct GateSettings {
    pub id: String,
    #[serde(rename = "Type")]
    pub direction: GateDirection,
}

/// One backend section, as written in the settings file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ApiSettings {
    pub base_url: String,
    pub gate_in_endpoint: String,
    pub gate_out_endpoint: String,
    pub capture_endpoint: String,
    pub login_endpoint: String,
    pub api_key: String,
    pub login_email: String,
    pub login_username: String,
    pub login_password: String,
    pub depot_id: String,
    pub use_authorization_header: bool,
    #[serde(deserialize_with = "crate::utils::duration::deserialize")]
    pub timeout: Duration,
    pub retry_count: i32,
    pub retry_backoff_seconds: f64,
    pub dialect: Option<Dialect>,
    pub capture_format: Option<CaptureFormat>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            gate_in_endpoint: String::new(),
            gate_out_endpoint: String::new(),
            capture_endpoint: String::new(),
            login_endpoint: String::new(),
            api_key: String::new(),
            login_email: String::new(),
            login_username: String::new(),
            login_password: String::new(),
            depot_id: String::new(),
            use_authorization_header: true,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_seconds: DEFAULT_RETRY_BACKOFF_SECS,
            dialect: None,
            capture_format: None,
        }
    }
}

// ============ Resolved backend configuration ============

/// Login credentials; each field is `None` when blank in the settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoginCredentials {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl LoginCredentials {
    /// A password plus at least one identity (email or username).
    pub fn is_complete(&self) -> bool {
        self.password.is_some() && (self.email.is_some() || self.username.is_some())
    }
}

/// Immutable configuration of one backend.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub name: String,
    pub base_url: Url,
    pub gate_in_endpoint: Option<String>,
    pub gate_out_endpoint: Option<String>,
    pub capture_endpoint: Option<String>,
    pub login_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub credentials: LoginCredentials,
    pub depot_id: Option<String>,
    pub use_authorization_header: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub dialect: Dialect,
    pub capture_format: CaptureFormat,
}

impl BackendConfig {
    /// Resolve one settings section. Fails before any network activity when the
    /// base URL is missing or malformed.
    pub fn from_settings(name: &str, settings: &ApiSettings) -> Result<Self> {
        let base = settings.base_url.trim();
        if base.is_empty() {
            return Err(BackendError::ConfigError {
                backend: name.to_string(),
                detail: "BaseUrl is not configured".to_string(),
            });
        }

        let base_url = Url::parse(base).map_err(|e| BackendError::ConfigError {
            backend: name.to_string(),
            detail: format!("BaseUrl '{base}' is invalid: {e}"),
        })?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(BackendError::ConfigError {
                backend: name.to_string(),
                detail: format!("BaseUrl '{base}' must use http or https"),
            });
        }

        let dialect = settings
            .dialect
            .unwrap_or_else(|| Dialect::infer_from_name(name));
        let capture_format = settings
            .capture_format
            .unwrap_or_else(|| CaptureFormat::default_for(dialect));

        let retry = RetryPolicy::new(
            u32::try_from(settings.retry_count.max(0)).unwrap_or(0),
            settings.retry_backoff_seconds,
            !dialect.has_status_envelope(),
        );

        let config = Self {
            name: name.to_string(),
            base_url,
            gate_in_endpoint: non_blank(&settings.gate_in_endpoint),
            gate_out_endpoint: non_blank(&settings.gate_out_endpoint),
            capture_endpoint: non_blank(&settings.capture_endpoint),
            login_endpoint: non_blank(&settings.login_endpoint),
            api_key: non_blank(&settings.api_key),
            credentials: LoginCredentials {
                email: non_blank(&settings.login_email),
                username: non_blank(&settings.login_username),
                password: non_blank(&settings.login_password),
            },
            depot_id: non_blank(&settings.depot_id),
            use_authorization_header: settings.use_authorization_header,
            timeout: settings.timeout,
            retry,
            dialect,
            capture_format,
        };

        if config.login_configured() && !config.credentials.is_complete() {
            log::warn!(
                "[{name}] LoginEndpoint is set but credentials are incomplete; authorized calls will fail"
            );
        }

        Ok(config)
    }

    /// Absolute endpoints are used verbatim, relative ones are joined onto the base URL.
    pub fn resolve_endpoint(&self, endpoint: &str) -> String {
        if let Ok(url) = Url::parse(endpoint)
            && matches!(url.scheme(), "http" | "https")
        {
            return endpoint.to_string();
        }

        format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Validation URL for `direction`, falling back to the other direction's
    /// endpoint with a warning when unset.
    pub fn validate_url(&self, direction: GateDirection) -> Result<String> {
        if let Some(endpoint) = self.endpoint_for(direction) {
            return Ok(self.resolve_endpoint(endpoint));
        }

        let fallback = direction.opposite();
        if let Some(endpoint) = self.endpoint_for(fallback) {
            log::warn!(
                "[{}] No gate {direction} endpoint configured, using gate {fallback} endpoint",
                self.name
            );
            return Ok(self.resolve_endpoint(endpoint));
        }

        Err(BackendError::ConfigError {
            backend: self.name.clone(),
            detail: "Neither GateInEndpoint nor GateOutEndpoint is configured".to_string(),
        })
    }

    pub fn capture_url(&self) -> Result<String> {
        self.capture_endpoint
            .as_deref()
            .map(|endpoint| self.resolve_endpoint(endpoint))
            .ok_or_else(|| BackendError::ConfigError {
                backend: self.name.clone(),
                detail: "CaptureEndpoint is not configured".to_string(),
            })
    }

    pub fn login_url(&self) -> Option<String> {
        self.login_endpoint
            .as_deref()
            .map(|endpoint| self.resolve_endpoint(endpoint))
    }

    /// A login endpoint is configured (credentials may still be incomplete).
    pub fn login_configured(&self) -> bool {
        self.login_endpoint.is_some()
    }

    /// Tokens can be (re)acquired by logging in.
    pub fn can_refresh(&self) -> bool {
        self.login_configured() && self.credentials.is_complete()
    }

    /// Attach `Authorization: Bearer` when this backend takes the header.
    pub(crate) fn authorize(&self, request: HttpRequest, token: Option<&str>) -> HttpRequest {
        match token {
            Some(token) if self.use_authorization_header => request.bearer(token),
            _ => request,
        }
    }

    /// Token to embed in the request body instead of a header.
    pub(crate) fn body_token<'a>(&self, token: Option<&'a str>) -> Option<&'a str> {
        if self.use_authorization_header {
            None
        } else {
            token
        }
    }

    fn endpoint_for(&self, direction: GateDirection) -> Option<&str> {
        match direction {
            GateDirection::In => self.gate_in_endpoint.as_deref(),
            GateDirection::Out => self.gate_out_endpoint.as_deref(),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_url: &str) -> ApiSettings {
        ApiSettings {
            base_url: base_url.to_string(),
            gate_in_endpoint: "gate/in".to_string(),
            ..ApiSettings::default()
        }
    }

    #[test]
    fn missing_base_url_is_config_error() {
        let err = BackendConfig::from_settings("Dss", &ApiSettings::default()).unwrap_err();
        assert!(matches!(err, BackendError::ConfigError { backend, .. } if backend == "Dss"));
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let err = BackendConfig::from_settings("Dss", &settings("ftp://files.example")).unwrap_err();
        assert!(matches!(err, BackendError::ConfigError { .. }));
    }

    #[test]
    fn relative_endpoint_joins_base_url() {
        let cfg = BackendConfig::from_settings("Dss", &settings("https://api.example/v1/")).unwrap();
        assert_eq!(
            cfg.resolve_endpoint("/gate/in"),
            "https://api.example/v1/gate/in"
        );
        assert_eq!(
            cfg.resolve_endpoint("gate/in"),
            "https://api.example/v1/gate/in"
        );
    }

    #[test]
    fn absolute_endpoint_used_verbatim() {
        let cfg = BackendConfig::from_settings("Dss", &settings("https://api.example/v1")).unwrap();
        assert_eq!(
            cfg.resolve_endpoint("https://other.example/validate"),
            "https://other.example/validate"
        );
    }

    #[test]
    fn validate_url_falls_back_to_other_direction() {
        let cfg = BackendConfig::from_settings("Dss", &settings("https://api.example")).unwrap();
        assert_eq!(
            cfg.validate_url(GateDirection::Out).unwrap(),
            "https://api.example/gate/in"
        );
    }

    #[test]
    fn validate_url_fails_without_any_endpoint() {
        let mut s = settings("https://api.example");
        s.gate_in_endpoint.clear();
        let cfg = BackendConfig::from_settings("Dss", &s).unwrap();
        assert!(matches!(
            cfg.validate_url(GateDirection::In),
            Err(BackendError::ConfigError { .. })
        ));
    }

    #[test]
    fn dialect_and_retry_policy_resolved_at_build() {
        let cfg = BackendConfig::from_settings("DwiMados", &settings("https://m.example")).unwrap();
        assert_eq!(cfg.dialect, Dialect::Mados);
        assert_eq!(cfg.capture_format, CaptureFormat::Json);
        assert!(!cfg.retry.retry_server_errors);

        let cfg = BackendConfig::from_settings("Default", &settings("https://g.example")).unwrap();
        assert_eq!(cfg.dialect, Dialect::Generic);
        assert!(cfg.retry.retry_server_errors);
    }

    #[test]
    fn explicit_dialect_wins_over_name() {
        let mut s = settings("https://api.example");
        s.dialect = Some(Dialect::Dss);
        let cfg = BackendConfig::from_settings("Primary", &s).unwrap();
        assert_eq!(cfg.dialect, Dialect::Dss);
    }

    #[test]
    fn negative_retry_count_clamps_to_zero() {
        let mut s = settings("https://api.example");
        s.retry_count = -4;
        let cfg = BackendConfig::from_settings("Default", &s).unwrap();
        assert_eq!(cfg.retry.retry_count, 0);
    }

    #[test]
    fn can_refresh_needs_login_and_complete_credentials() {
        let mut s = settings("https://api.example");
        s.login_endpoint = "auth/login".to_string();
        s.login_email = "gate@example.com".to_string();
        let cfg = BackendConfig::from_settings("Dss", &s).unwrap();
        assert!(cfg.login_configured());
        assert!(!cfg.can_refresh());

        s.login_password = "secret".to_string();
        let cfg = BackendConfig::from_settings("Dss", &s).unwrap();
        assert!(cfg.can_refresh());
    }

    #[test]
    fn token_goes_to_header_or_body() {
        let mut s = settings("https://api.example");
        let cfg = BackendConfig::from_settings("Dss", &s).unwrap();
        let request = cfg.authorize(HttpRequest::post("https://api.example", cfg.timeout), Some("t1"));
        assert_eq!(request.header_value("authorization"), Some("Bearer t1"));
        assert_eq!(cfg.body_token(Some("t1")), None);

        s.use_authorization_header = false;
        let cfg = BackendConfig::from_settings("Dss", &s).unwrap();
        let request = cfg.authorize(HttpRequest::post("https://api.example", cfg.timeout), Some("t1"));
        assert_eq!(request.header_value("Authorization"), None);
        assert_eq!(cfg.body_token(Some("t1")), Some("t1"));
    }

    #[test]
    fn settings_parse_appsettings_json() {
        let json = r#"{
            "Gate": { "Id": "G01", "Type": "OUT" },
            "Apis": {
                "Dss": {
                    "BaseUrl": "https://dss.example/api",
                    "GateInEndpoint": "validate",
                    "Timeout": "00:00:20",
                    "RetryCount": 2,
                    "UseAuthorizationHeader": false
                }
            }
        }"#;
        let settings = Settings::from_json_str(json).unwrap();
        assert_eq!(settings.gate.id, "G01");
        assert_eq!(settings.gate.direction, GateDirection::Out);
        let dss = &settings.apis["Dss"];
        assert_eq!(dss.timeout, Duration::from_secs(20));
        assert_eq!(dss.retry_count, 2);
        assert!(!dss.use_authorization_header);
        assert!((dss.retry_backoff_seconds - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn out_of_range_timeout_is_config_error() {
        for timeout in ["1e300", r#""18446744073709551615:00:00""#] {
            let json = format!(
                r#"{{"Apis":{{"Dss":{{"BaseUrl":"https://dss.example","Timeout":{timeout}}}}}}}"#
            );
            assert!(matches!(
                Settings::from_json_str(&json),
                Err(BackendError::ConfigError { .. })
            ));
        }
    }

    #[test]
    fn unrepresentable_backoff_falls_back_to_default() {
        let json = r#"{"Apis":{"Dss":{"BaseUrl":"https://dss.example","GateInEndpoint":"v","RetryBackoffSeconds":1e300}}}"#;
        let settings = Settings::from_json_str(json).unwrap();
        let cfg = BackendConfig::from_settings("Dss", &settings.apis["Dss"]).unwrap();
        assert_eq!(cfg.retry.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn settings_parse_toml() {
        let text = r#"
            [Gate]
            Id = "G02"

            [Api]
            BaseUrl = "https://legacy.example"
            GateInEndpoint = "api/validate"
            Timeout = 5
        "#;
        let settings = Settings::from_toml_str(text).unwrap();
        assert_eq!(settings.gate.direction, GateDirection::In);
        let api = settings.api.unwrap();
        assert_eq!(api.timeout, Duration::from_secs(5));
        assert!(settings.apis.is_empty());
    }
}
