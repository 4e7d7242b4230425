//! Public entry point: validate scanned codes and upload captures.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::capture::build_capture_request;
use crate::config::Settings;
use crate::dialects::{ValidateBodyContext, codec_for, upstream_message};
use crate::error::{BackendError, Result};
use crate::http_client::{HttpRequest, HttpResponse, HttpTransport, HttpUtils, ReqwestTransport};
use crate::registry::{Backend, BackendRegistry};
use crate::types::{CaptureRequest, ValidateRequest, ValidateResult};
use crate::utils::log_sanitizer::mask_secret;

/// Gate API client over every configured backend.
///
/// Cheap to clone; clones share backends, token caches and the transport.
///
/// # Examples
///
/// ```rust,no_run
/// use gate_orchestrator_backend::{GateApiClient, Settings, ValidateRequest};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> gate_orchestrator_backend::Result<()> {
/// let settings = Settings::load("appsettings.json")?;
/// let client = GateApiClient::from_settings(&settings)?;
/// let result = client
///     .validate(&ValidateRequest::new("DEPOT1/DWI/0042", "G01"), &CancellationToken::new())
///     .await;
/// println!("{}: {}", result.success, result.message);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GateApiClient {
    registry: Arc<BackendRegistry>,
    transport: Arc<dyn HttpTransport>,
}

impl GateApiClient {
    /// Client over the production `reqwest` transport.
    pub fn new(registry: BackendRegistry) -> Result<Self> {
        Ok(Self::with_transport(registry, Arc::new(ReqwestTransport::new()?)))
    }

    pub fn with_transport(
        registry: impl Into<Arc<BackendRegistry>>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            registry: registry.into(),
            transport,
        }
    }

    /// Build the registry from settings. Configuration errors surface here and nowhere else.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(BackendRegistry::from_settings(settings)?)
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    // ============ Validate ============

    /// Validate a scanned code. Every failure becomes an unsuccessful result.
    pub async fn validate(
        &self,
        request: &ValidateRequest,
        cancel: &CancellationToken,
    ) -> ValidateResult {
        let outcome = match self.send_validate(request, cancel).await {
            Ok((backend, response)) => normalize(&backend, &response)
                .map_err(|e| (e, Some(response.body))),
            Err(e) => Err((e, None)),
        };

        match outcome {
            Ok(result) => result,
            Err((e, body)) => {
                log_failure("Validation", &e);
                // a body that failed to parse is not worth forwarding
                let data = body.filter(|_| !matches!(e, BackendError::ParseError { .. }));
                ValidateResult::failure(e.user_message(), data)
            }
        }
    }

    /// Like [`validate`](Self::validate), but keeps the typed error.
    pub async fn try_validate(
        &self,
        request: &ValidateRequest,
        cancel: &CancellationToken,
    ) -> Result<ValidateResult> {
        let (backend, response) = self.send_validate(request, cancel).await?;
        normalize(&backend, &response)
    }

    async fn send_validate(
        &self,
        request: &ValidateRequest,
        cancel: &CancellationToken,
    ) -> Result<(Arc<Backend>, HttpResponse)> {
        let backend = Arc::clone(self.registry.route(&request.qr_code)?);
        let config = backend.config();
        let url = config.validate_url(request.direction)?;
        let codec = codec_for(config.dialect);

        log::info!(
            "[{}] Validating '{}' at gate {} ({})",
            config.name,
            request.qr_code,
            request.gate_id,
            request.direction
        );

        let response = self
            .execute_authorized(&backend, cancel, |token| {
                let body = codec.validate_body(&ValidateBodyContext {
                    request,
                    depot_id: config.depot_id.as_deref(),
                    body_token: config.body_token(token),
                });
                let http = HttpRequest::post(url.as_str(), config.timeout).json(&body, &config.name)?;
                Ok(config.authorize(http, token))
            })
            .await?;

        Ok((backend, response))
    }

    // ============ Capture ============

    /// Upload capture evidence. `false` on any failure; never fatal to the caller.
    pub async fn send_capture(&self, request: &CaptureRequest, cancel: &CancellationToken) -> bool {
        match self.try_send_capture(request, cancel).await {
            Ok(()) => true,
            Err(e) => {
                log_failure("Capture upload", &e);
                false
            }
        }
    }

    pub async fn try_send_capture(
        &self,
        request: &CaptureRequest,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let backend = Arc::clone(self.registry.route(request.routing_key())?);
        let config = backend.config();
        let captured_at = Utc::now();

        let skipped = request
            .snapshots
            .iter()
            .filter(|(_, bytes)| bytes.is_empty())
            .count();
        if skipped > 0 {
            log::warn!(
                "[{}] Skipping {skipped} empty snapshot(s) for ticket {}",
                config.name,
                request.ticket_id
            );
        }

        let response = self
            .execute_authorized(&backend, cancel, |token| {
                build_capture_request(config, request, captured_at, token)
            })
            .await?;

        if !response.is_success() {
            return Err(BackendError::UpstreamError {
                backend: config.name.clone(),
                status: response.status,
                raw_message: upstream_message(config.dialect.has_status_envelope(), &response),
            });
        }

        log::info!(
            "[{}] Uploaded capture for ticket {} ({} image(s))",
            config.name,
            request.ticket_id,
            request.snapshots.len() - skipped
        );
        Ok(())
    }

    // ============ Authorized execution ============

    /// Send an authorized request: attempt, and on 401 from a refreshable backend
    /// clear the token, log in again and attempt exactly once more.
    ///
    /// `build` receives the token for the attempt and runs once per send.
    async fn execute_authorized<F>(
        &self,
        backend: &Backend,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<HttpResponse>
    where
        F: Fn(Option<&str>) -> Result<HttpRequest> + Sync,
    {
        let transport = self.transport.as_ref();
        let name = backend.name();

        let token = backend.ensure_authorized(transport, cancel).await?;
        let response = self.send(backend, token.as_deref(), cancel, &build).await?;
        if !response.is_unauthorized() {
            return Ok(response);
        }

        if !backend.config.can_refresh() {
            return Err(unauthorized(backend, &response));
        }

        log::warn!("[{name}] HTTP 401, refreshing token and retrying once");
        if let Some(used) = token.as_deref()
            && !backend.state.clear_if_current(used)
        {
            log::debug!("[{name}] Token {} already replaced", mask_secret(used));
        }

        let token = backend.ensure_authorized(transport, cancel).await?;
        let response = self.send(backend, token.as_deref(), cancel, &build).await?;
        if response.is_unauthorized() {
            return Err(unauthorized(backend, &response));
        }
        Ok(response)
    }

    async fn send<F>(
        &self,
        backend: &Backend,
        token: Option<&str>,
        cancel: &CancellationToken,
        build: &F,
    ) -> Result<HttpResponse>
    where
        F: Fn(Option<&str>) -> Result<HttpRequest> + Sync,
    {
        HttpUtils::execute_with_retry(
            self.transport.as_ref(),
            backend.name(),
            &backend.config.retry,
            cancel,
            || build(token),
        )
        .await
    }
}

/// Normalize a validate response with the backend's dialect.
fn normalize(backend: &Backend, response: &HttpResponse) -> Result<ValidateResult> {
    let config = backend.config();
    if !response.is_success() {
        return Err(BackendError::UpstreamError {
            backend: config.name.clone(),
            status: response.status,
            raw_message: upstream_message(config.dialect.has_status_envelope(), response),
        });
    }

    let result = codec_for(config.dialect).parse_validate(&config.name, &response.body)?;
    log::info!(
        "[{}] Validation {}: {}",
        config.name,
        if result.success { "succeeded" } else { "rejected" },
        result.message
    );
    Ok(result)
}

fn unauthorized(backend: &Backend, response: &HttpResponse) -> BackendError {
    BackendError::Unauthorized {
        backend: backend.name().to_string(),
        raw_message: Some(upstream_message(
            backend.config.dialect.has_status_envelope(),
            response,
        )),
    }
}

fn log_failure(operation: &str, e: &BackendError) {
    if e.is_expected() {
        log::warn!("{operation} failed: {e}");
    } else {
        log::error!("{operation} failed: {e}");
    }
}
