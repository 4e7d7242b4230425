//! # gate-orchestrator-backend
//!
//! Gate credential validation and capture upload across several backend APIs.
//!
//! A scanned QR code is routed to one configured backend, sent through an
//! authorized and retried HTTP call, and the backend's response is normalized
//! into one [`ValidateResult`]. Capture evidence (camera snapshots and metadata)
//! for a validated transaction goes through the same pipeline.
//!
//! ## Backend dialects
//!
//! | Dialect | Request body | Response shape |
//! |---------|--------------|----------------|
//! | `Generic` | camelCase [`ValidateRequest`] | the canonical result itself |
//! | `Dss` | `{"param":[{"QRCODE","DEPOTID","TOKEN"?}]}` | `{"status","msg","data":[{...}]}` |
//! | `Mados` | as `Dss`, plus `GATE_PASS` | as `Dss`, DWI/EIR field names |
//!
//! The dialect is set per backend (`Dialect` key) or inferred once from its name
//! when the registry is built.
//!
//! ## Routing
//!
//! | QR code contains | Backend |
//! |------------------|---------|
//! | `/DWI/` | `Dss` |
//! | `/DW/` | `DwiMados` |
//! | `/RC/` or `/DL/` | `EirMados` |
//!
//! With a single configured backend every code goes to it.
//!
//! ## Feature Flags
//!
//! - **`native-tls`** *(default)*: Use the platform's native TLS implementation.
//! - **`rustls`**: Use rustls.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::collections::BTreeMap;
//!
//! use gate_orchestrator_backend::{CaptureRequest, GateApiClient, Settings, ValidateRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::load("appsettings.json")?;
//!     let client = GateApiClient::from_settings(&settings)?;
//!     let cancel = CancellationToken::new();
//!
//!     let request = ValidateRequest::new("DEPOT1/DWI/0042", &settings.gate.id)
//!         .with_direction(settings.gate.direction);
//!     let result = client.validate(&request, &cancel).await;
//!     println!("{} {}", result.success, result.message);
//!
//!     if let Some(ticket) = result.ticket_id {
//!         let snapshots = BTreeMap::from([("front".to_string(), std::fs::read("front.jpg")?)]);
//!         let capture = CaptureRequest::new(ticket, &settings.gate.id, snapshots)
//!             .with_qr_code("DEPOT1/DWI/0042");
//!         client.send_capture(&capture, &cancel).await;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! [`GateApiClient::validate`] never fails: every problem becomes an unsuccessful
//! result carrying a message. [`GateApiClient::send_capture`] returns `bool`.
//! The `try_` variants return [`Result<T, BackendError>`](BackendError). Only
//! building the registry propagates [`BackendError::ConfigError`].
//!
//! Transient errors (`NetworkError`, `Timeout`) are retried with exponential
//! backoff; a 401 triggers exactly one re-login and one more attempt.

mod auth;
mod capture;
mod client;
mod config;
mod dialects;
mod error;
mod http_client;
mod registry;
mod router;
mod token;
mod types;
mod utils;

pub use client::GateApiClient;

pub use error::{BackendError, Result};

pub use config::{
    ApiSettings, BackendConfig, DEFAULT_BACKEND_NAME, GateSettings, LoginCredentials, Settings,
};

pub use registry::{Backend, BackendRegistry};

pub use router::{ROUTING_RULES, RoutingRule, match_rule};

pub use token::{BackendState, REFRESH_BUFFER, TokenState, decode_token_expiry};

pub use http_client::{
    FormPart, HttpRequest, HttpResponse, HttpTransport, ReqwestTransport,
    RequestBody, RetryPolicy,
};

pub use capture::{CAPTURE_FILE_FIELD, METADATA_FIELD, json_payload, multipart_parts, snapshot_file_name};

pub use types::{
    CaptureFormat, CaptureRequest, Dialect, GateDirection, Snapshots, ValidateRequest,
    ValidateResult,
};
