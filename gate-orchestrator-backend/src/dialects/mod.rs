//! Backend dialects: request bodies and response normalization.
//!
//! Each backend is tagged with a [`Dialect`] at registry build time; calls are
//! dispatched through [`codec_for`] instead of inspecting backend names.

/// Envelope parsing and field lookups shared by the structured dialects.
pub(crate) mod common;

mod dss;
mod generic;
mod mados;

use serde_json::Value;

use crate::error::Result;
use crate::types::{Dialect, ValidateRequest, ValidateResult};

pub(crate) use common::{is_success_status, upstream_message};

/// Inputs for a validate request body.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ValidateBodyContext<'a> {
    pub request: &'a ValidateRequest,
    pub depot_id: Option<&'a str>,
    /// Token to embed in the body (backends that do not take an Authorization header).
    pub body_token: Option<&'a str>,
}

/// Request/response shape of one dialect.
pub(crate) trait DialectCodec: Send + Sync {
    /// Validate request body.
    fn validate_body(&self, ctx: &ValidateBodyContext<'_>) -> Value;

    /// Normalize a 2xx validate response body into the canonical result.
    fn parse_validate(&self, backend: &str, body: &str) -> Result<ValidateResult>;
}

/// The codec for `dialect`.
pub(crate) fn codec_for(dialect: Dialect) -> &'static dyn DialectCodec {
    match dialect {
        Dialect::Generic => &generic::GenericCodec,
        Dialect::Dss => &dss::DssCodec,
        Dialect::Mados => &mados::MadosCodec,
    }
}
