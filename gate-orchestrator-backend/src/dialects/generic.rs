//! Generic dialect: the body is the canonical result itself.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{BackendError, Result};
use crate::types::ValidateResult;

use super::common::{parse_object, value_to_string};
use super::{DialectCodec, ValidateBodyContext};

pub(crate) struct GenericCodec;

/// Canonical shape with lower-cased keys; the root is lower-cased before
/// deserializing so field names match in any case.
#[derive(Debug, Deserialize)]
struct GenericBody {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "ticketid")]
    ticket_id: Option<String>,
    #[serde(default, rename = "platenumber")]
    plate_number: Option<String>,
    #[serde(default, rename = "drivername")]
    driver_name: Option<String>,
    #[serde(default, rename = "additionaldata")]
    additional_data: Option<HashMap<String, Value>>,
}

fn lowercase_keys(root: Map<String, Value>) -> Map<String, Value> {
    root.into_iter()
        .map(|(key, value)| (key.to_ascii_lowercase(), value))
        .collect()
}

impl DialectCodec for GenericCodec {
    fn validate_body(&self, ctx: &ValidateBodyContext<'_>) -> Value {
        serde_json::to_value(ctx.request).unwrap_or(Value::Null)
    }

    fn parse_validate(&self, backend: &str, body: &str) -> Result<ValidateResult> {
        let root = lowercase_keys(parse_object(backend, body)?);
        let parsed: GenericBody =
            serde_json::from_value(Value::Object(root)).map_err(|e| BackendError::ParseError {
                backend: backend.to_string(),
                detail: e.to_string(),
            })?;

        let mut result = ValidateResult {
            success: parsed.success,
            message: parsed.message.unwrap_or_default(),
            ticket_id: parsed.ticket_id,
            plate_number: parsed.plate_number,
            driver_name: parsed.driver_name,
            data: Some(body.to_string()),
            additional_data: HashMap::new(),
        };
        for (key, value) in parsed.additional_data.unwrap_or_default() {
            if let Some(value) = value_to_string(&value) {
                result.insert_extra(&key, value);
            }
        }

        Ok(result)
    }
}
