//! Backend registry: immutable configuration plus per-backend auth state.

use std::fmt;
use std::sync::Arc;

use crate::config::{BackendConfig, DEFAULT_BACKEND_NAME, Settings};
use crate::error::{BackendError, Result};
use crate::router;
use crate::token::BackendState;

/// One configured backend. Created once at startup and shared for the process lifetime.
pub struct Backend {
    pub(crate) config: BackendConfig,
    pub(crate) state: BackendState,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            state: BackendState::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn state(&self) -> &BackendState {
        &self.state
    }

    pub fn has_valid_token(&self) -> bool {
        self.state.has_valid_token()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.config.name)
            .field("dialect", &self.config.dialect)
            .field("base_url", &self.config.base_url.as_str())
            .finish_non_exhaustive()
    }
}

/// All configured backends.
#[derive(Debug)]
pub struct BackendRegistry {
    backends: Vec<Arc<Backend>>,
}

impl BackendRegistry {
    /// Build from a settings file.
    ///
    /// The `Apis` section wins; without it the legacy `Api` section becomes the
    /// single `Default` backend. Fails when no backend resolves or any section is
    /// invalid.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let configs = if !settings.apis.is_empty() {
            settings
                .apis
                .iter()
                .map(|(name, section)| BackendConfig::from_settings(name, section))
                .collect::<Result<Vec<_>>>()?
        } else if let Some(section) = &settings.api {
            vec![BackendConfig::from_settings(DEFAULT_BACKEND_NAME, section)?]
        } else {
            Vec::new()
        };

        Self::from_configs(configs)
    }

    pub fn from_configs(configs: Vec<BackendConfig>) -> Result<Self> {
        if configs.is_empty() {
            return Err(BackendError::ConfigError {
                backend: "settings".to_string(),
                detail: "No API backend is configured (expected an Apis or Api section)".to_string(),
            });
        }

        let mut backends: Vec<Arc<Backend>> = Vec::with_capacity(configs.len());
        for config in configs {
            if backends
                .iter()
                .any(|existing| existing.name().eq_ignore_ascii_case(&config.name))
            {
                return Err(BackendError::ConfigError {
                    backend: config.name,
                    detail: "Backend name is configured more than once".to_string(),
                });
            }
            log::info!(
                "[{}] Registered backend ({} dialect) at {}",
                config.name,
                config.dialect,
                config.base_url
            );
            backends.push(Arc::new(Backend::new(config)));
        }

        Ok(Self { backends })
    }

    /// Backend by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&Arc<Backend>> {
        self.backends
            .iter()
            .find(|backend| backend.name().eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.backends.iter().map(|backend| backend.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Backend>> {
        self.backends.iter()
    }

    /// Select the backend for a scanned code.
    ///
    /// A single configured backend serves every code (single-tenant mode).
    /// With several backends the code must match a routing rule naming one of them.
    pub fn route(&self, qr_code: &str) -> Result<&Arc<Backend>> {
        let qr_code = qr_code.trim();
        let matched = if qr_code.is_empty() {
            None
        } else {
            router::match_rule(qr_code)
        };

        if let Some(name) = matched
            && let Some(backend) = self.get(name)
        {
            return Ok(backend);
        }

        if let [only] = self.backends.as_slice() {
            if let Some(name) = matched {
                log::warn!(
                    "[{}] QR code routes to '{name}' which is not configured, using the only backend",
                    only.name()
                );
            }
            return Ok(only);
        }

        let detail = match matched {
            _ if qr_code.is_empty() => "QR code is empty".to_string(),
            Some(name) => format!("QR code routes to backend '{name}' which is not configured"),
            None => format!(
                "QR code matches no routing rule and {} backends are configured",
                self.backends.len()
            ),
        };
        Err(BackendError::RoutingError {
            qr_code: qr_code.to_string(),
            detail,
        })
    }
}
