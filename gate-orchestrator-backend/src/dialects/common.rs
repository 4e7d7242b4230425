//! 结构化方言公共工具函数
//!
//! DSS and MADOS backends share one envelope:
//! `{"status": <int|bool|string>, "msg": "...", "data": [{...}]}`.

use serde_json::{Map, Value};

use crate::error::{BackendError, Result};
use crate::http_client::{HttpResponse, HttpUtils};
use crate::types::ValidateResult;

pub(crate) const SUCCESS_MESSAGE: &str = "Validation successful.";
pub(crate) const FAILURE_MESSAGE: &str = "Validation request was not successful.";

// ============ 状态判定 ============

/// Envelope status predicate.
///
/// Successful when the status is the integer 1 or 200 (number or numeric string),
/// boolean `true` (or `"true"`), or one of `OK` / `SUCCESS` / `S` in any case.
pub(crate) fn is_success_status(status: Option<&Value>) -> bool {
    match status {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(n)) => matches!(n.as_i64(), Some(1 | 200)),
        Some(Value::String(s)) => {
            let s = s.trim();
            if let Ok(code) = s.parse::<i64>() {
                return matches!(code, 1 | 200);
            }
            if let Ok(flag) = s.to_ascii_lowercase().parse::<bool>() {
                return flag;
            }
            ["OK", "SUCCESS", "S"]
                .iter()
                .any(|accepted| s.eq_ignore_ascii_case(accepted))
        }
        _ => false,
    }
}

// ============ JSON 辅助 ============

/// Case-insensitive key lookup.
pub(crate) fn get_ci<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

/// Render a scalar as a string field. `null` yields `None`; nested values are
/// kept as compact JSON.
pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            Some(value.to_string())
        }
    }
}

/// Trimmed, non-empty string value of `key`.
pub(crate) fn non_blank_str(map: &Map<String, Value>, key: &str) -> Option<String> {
    get_ci(map, key)
        .and_then(value_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse a body whose root must be a JSON object.
pub(crate) fn parse_object(backend: &str, body: &str) -> Result<Map<String, Value>> {
    match HttpUtils::parse_json(body, backend)? {
        Value::Object(map) => Ok(map),
        other => Err(BackendError::ParseError {
            backend: backend.to_string(),
            detail: format!("expected a JSON object, got {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// First object of the envelope's `data` (an array, or a bare object).
pub(crate) fn first_data_record(root: &Map<String, Value>) -> Option<&Map<String, Value>> {
    match get_ci(root, "data")? {
        Value::Array(items) => items.first().and_then(Value::as_object),
        Value::Object(record) => Some(record),
        _ => None,
    }
}

/// `{"param": [fields]}` request wrapper used by DSS/MADOS endpoints.
pub(crate) fn param_body(fields: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("param".to_string(), Value::Array(vec![Value::Object(fields)]));
    Value::Object(body)
}

// ============ 信封归一化 ============

/// Candidate keys, in priority order, for each canonical field.
pub(crate) struct FieldTable {
    pub ticket_id: &'static [&'static str],
    pub plate_number: &'static [&'static str],
    pub driver_name: &'static [&'static str],
    pub message: &'static [&'static str],
}

/// First non-blank extra field among `keys`.
pub(crate) fn first_present(result: &ValidateResult, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| result.extra(key))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

/// Normalize a status envelope with `table`.
///
/// Returns the result (message possibly still blank) and the root object so a
/// dialect can apply its own message fallbacks before [`finalize_message`].
pub(crate) fn normalize_envelope(
    backend: &str,
    body: &str,
    table: &FieldTable,
) -> Result<(ValidateResult, Map<String, Value>)> {
    let root = parse_object(backend, body)?;

    let mut result = ValidateResult {
        success: is_success_status(get_ci(&root, "status")),
        message: non_blank_str(&root, "msg").unwrap_or_default(),
        data: Some(body.to_string()),
        ..ValidateResult::default()
    };

    if let Some(record) = first_data_record(&root) {
        for (key, value) in record {
            if let Some(value) = value_to_string(value) {
                result.insert_extra(key, value);
            }
        }
    }

    result.ticket_id = first_present(&result, table.ticket_id);
    result.plate_number = first_present(&result, table.plate_number);
    result.driver_name = first_present(&result, table.driver_name);
    if result.message.trim().is_empty()
        && let Some(message) = first_present(&result, table.message)
    {
        result.message = message;
    }

    Ok((result, root))
}

/// Synthesize a message when every fallback came up blank.
pub(crate) fn finalize_message(result: &mut ValidateResult) {
    if result.message.trim().is_empty() {
        result.message = if result.success {
            SUCCESS_MESSAGE
        } else {
            FAILURE_MESSAGE
        }
        .to_string();
    }
}

// ============ 错误响应 ============

/// Message to surface for a non-2xx response: the envelope `msg` when `enveloped`,
/// else the body, else the reason phrase.
pub(crate) fn upstream_message(enveloped: bool, response: &HttpResponse) -> String {
    if enveloped
        && let Ok(Value::Object(root)) = serde_json::from_str::<Value>(&response.body)
        && let Some(msg) = non_blank_str(&root, "msg")
    {
        return msg;
    }

    let body = response.body.trim();
    if !body.is_empty() {
        return body.to_string();
    }

    response
        .reason
        .clone()
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| "Unknown error".to_string())
}
