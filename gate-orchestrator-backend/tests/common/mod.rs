//! 共享测试工具：脚本化的 HTTP 传输层与配置构造

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use gate_orchestrator_backend::{
    ApiSettings, BackendError, BackendRegistry, GateApiClient, HttpRequest, HttpResponse,
    HttpTransport, RequestBody, Result, Settings,
};
use serde_json::Value;

pub const DSS_BASE: &str = "https://dss.test/api";
pub const MADOS_BASE: &str = "https://mados.test";
pub const GENERIC_BASE: &str = "https://gate.test";

pub const DSS_LOGIN: &str = "https://dss.test/api/auth/login";
pub const DSS_VALIDATE: &str = "https://dss.test/api/gate/validate";
pub const DSS_CAPTURE: &str = "https://dss.test/api/gate/capture";
pub const MADOS_LOGIN: &str = "https://mados.test/login";
pub const MADOS_VALIDATE: &str = "https://mados.test/gatepass/check";
pub const GENERIC_VALIDATE: &str = "https://gate.test/api/validate";
pub const GENERIC_CAPTURE: &str = "https://gate.test/api/capture";

/// Mock transport replaying canned outcomes per URL.
///
/// Each URL has a queue; the last queued outcome repeats once the others are used up.
/// Every request is recorded.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<String, VecDeque<Result<HttpResponse>>>>,
    requests: Mutex<Vec<HttpRequest>>,
    delay: Option<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every send waits `delay` before answering.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.push(url, Ok(HttpResponse::new(status, body)));
    }

    pub fn fail(&self, url: &str, error: BackendError) {
        self.push(url, Err(error));
    }

    fn push(&self, url: &str, outcome: Result<HttpResponse>) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default()
            .push_back(outcome);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn requests_to(&self, url: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.url == url)
            .collect()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, backend: &str, request: HttpRequest) -> Result<HttpResponse> {
        let url = request.url.clone();
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let next = routes.get_mut(&url).and_then(|queue| {
            if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            }
        });
        next.unwrap_or_else(|| {
            Err(BackendError::NetworkError {
                backend: backend.to_string(),
                detail: format!("no scripted response for {url}"),
            })
        })
    }
}

// ============ 配置构造 ============

pub fn dss_section() -> ApiSettings {
    ApiSettings {
        base_url: DSS_BASE.to_string(),
        gate_in_endpoint: "gate/validate".to_string(),
        capture_endpoint: "gate/capture".to_string(),
        login_endpoint: "auth/login".to_string(),
        login_email: "gate@depot.test".to_string(),
        login_password: "secret".to_string(),
        depot_id: "DPT01".to_string(),
        retry_count: 2,
        ..ApiSettings::default()
    }
}

pub fn mados_section() -> ApiSettings {
    ApiSettings {
        base_url: MADOS_BASE.to_string(),
        gate_in_endpoint: "/gatepass/check".to_string(),
        login_endpoint: "login".to_string(),
        login_username: "gate01".to_string(),
        login_password: "secret".to_string(),
        depot_id: "DPT02".to_string(),
        use_authorization_header: false,
        retry_count: 1,
        ..ApiSettings::default()
    }
}

pub fn generic_section() -> ApiSettings {
    ApiSettings {
        base_url: GENERIC_BASE.to_string(),
        gate_in_endpoint: "api/validate".to_string(),
        capture_endpoint: "api/capture".to_string(),
        api_key: "static-key".to_string(),
        retry_count: 2,
        ..ApiSettings::default()
    }
}

pub fn settings(sections: &[(&str, ApiSettings)]) -> Settings {
    let mut settings = Settings::default();
    settings.gate.id = "G01".to_string();
    for (name, section) in sections {
        settings.apis.insert((*name).to_string(), section.clone());
    }
    settings
}

pub fn client(settings: &Settings, transport: &Arc<ScriptedTransport>) -> GateApiClient {
    let registry = BackendRegistry::from_settings(settings).expect("valid settings");
    GateApiClient::with_transport(registry, Arc::clone(transport) as Arc<dyn HttpTransport>)
}

// ============ 响应构造 ============

/// Three-part token whose payload carries `exp`.
pub fn jwt(exp: i64) -> String {
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256"}"#),
        URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#))
    )
}

pub fn login_ok(token: &str) -> String {
    format!(r#"{{"status":"1","msg":"","data":[{{"TOKEN":"{token}"}}]}}"#)
}

/// JSON body of a recorded request.
pub fn json_body(request: &HttpRequest) -> Value {
    match &request.body {
        RequestBody::Json(bytes) => serde_json::from_slice(bytes).expect("JSON body"),
        other => panic!("expected a JSON body, got {other:?}"),
    }
}
