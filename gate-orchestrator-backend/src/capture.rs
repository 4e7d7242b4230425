//! Capture uploader payloads.
//!
//! Two shapes, picked per backend by [`CaptureFormat`]:
//! - JSON composite: `{"timestamp", "param": [header, detail...], "opt": "<json>"}`
//! - `multipart/form-data`: text fields plus one `captures` file part per snapshot
//!
//! Zero-length snapshots never produce a detail record or a file part.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::config::BackendConfig;
use crate::error::Result;
use crate::http_client::{FormPart, HttpRequest};
use crate::types::{CaptureFormat, CaptureRequest};

/// Form field shared by every multipart file part.
pub const CAPTURE_FILE_FIELD: &str = "captures";
/// Form field carrying the serialized metadata.
pub const METADATA_FIELD: &str = "metadata";

const JPEG_CONTENT_TYPE: &str = "image/jpeg";
const JSON_CONTENT_TYPE: &str = "application/json";

/// `{camera}-{yyyyMMddHHmmss}.jpg`
pub fn snapshot_file_name(camera: &str, captured_at: DateTime<Utc>) -> String {
    format!("{camera}-{}.jpg", captured_at.format("%Y%m%d%H%M%S"))
}

fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Snapshots that carry image bytes.
fn non_empty_snapshots(request: &CaptureRequest) -> impl Iterator<Item = (&String, &Vec<u8>)> {
    request
        .snapshots
        .iter()
        .filter(|(_, bytes)| !bytes.is_empty())
}

/// Metadata value by case-insensitive key.
fn metadata_value<'a>(metadata: Option<&'a BTreeMap<String, String>>, key: &str) -> Option<&'a str> {
    metadata?
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

// ============ JSON composite ============

/// Header record (`param[0]`); every key can be overridden from the metadata map.
fn header_record(
    config: &BackendConfig,
    request: &CaptureRequest,
    captured_at: DateTime<Utc>,
    body_token: Option<&str>,
) -> Map<String, Value> {
    let metadata = request.metadata.as_ref();
    let pick = |key: &str, default: &str| -> Value {
        Value::from(metadata_value(metadata, key).unwrap_or(default))
    };

    let capture_date = captured_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let mut header = Map::new();
    header.insert("TICKET_ID".into(), pick("TICKET_ID", &request.ticket_id));
    header.insert("GATE_ID".into(), pick("GATE_ID", &request.gate_id));
    header.insert(
        "DEPOTID".into(),
        pick("DEPOTID", config.depot_id.as_deref().unwrap_or_default()),
    );
    header.insert("REFF_NO".into(), pick("REFF_NO", &request.ticket_id));
    header.insert("CAPTURE_DATE".into(), pick("CAPTURE_DATE", &capture_date));
    if let Some(token) = body_token {
        header.insert("TOKEN".into(), pick("TOKEN", token));
    }
    header
}

/// `opt`: ticket/gate/time merged with metadata keys not already present.
fn options_string(request: &CaptureRequest, captured_at: DateTime<Utc>) -> String {
    let mut opt = Map::new();
    opt.insert("ticketId".into(), Value::from(request.ticket_id.as_str()));
    opt.insert("gateId".into(), Value::from(request.gate_id.as_str()));
    opt.insert("capturedAt".into(), Value::from(iso_timestamp(captured_at)));
    if let Some(metadata) = &request.metadata {
        for (key, value) in metadata {
            opt.entry(key.clone())
                .or_insert_with(|| Value::from(value.as_str()));
        }
    }
    Value::Object(opt).to_string()
}

/// The JSON composite capture document.
pub fn json_payload(
    config: &BackendConfig,
    request: &CaptureRequest,
    captured_at: DateTime<Utc>,
    body_token: Option<&str>,
) -> Value {
    let header = header_record(config, request, captured_at, body_token);

    let mut param = vec![Value::Object(header.clone())];
    for (camera, bytes) in non_empty_snapshots(request) {
        let mut detail = header.clone();
        detail.insert("CAMERA".into(), Value::from(camera.as_str()));
        detail.insert("IMAGE".into(), Value::from(STANDARD.encode(bytes)));
        detail.insert(
            "FILENAME".into(),
            Value::from(snapshot_file_name(camera, captured_at)),
        );
        param.push(Value::Object(detail));
    }

    let mut payload = Map::new();
    payload.insert("timestamp".into(), Value::from(iso_timestamp(captured_at)));
    payload.insert("param".into(), Value::Array(param));
    payload.insert("opt".into(), Value::from(options_string(request, captured_at)));
    Value::Object(payload)
}

// ============ Multipart ============

/// The multipart capture form.
pub fn multipart_parts(request: &CaptureRequest, captured_at: DateTime<Utc>) -> Vec<FormPart> {
    let text = |name: &str, value: String| FormPart::Text {
        name: name.to_string(),
        value,
        content_type: None,
    };

    let mut parts = vec![
        text("ticketId", request.ticket_id.clone()),
        text("gateId", request.gate_id.clone()),
        text("capturedAt", iso_timestamp(captured_at)),
    ];

    if let Some(metadata) = &request.metadata {
        let value = serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string());
        parts.push(FormPart::Text {
            name: METADATA_FIELD.to_string(),
            value,
            content_type: Some(JSON_CONTENT_TYPE.to_string()),
        });
    }

    for (camera, bytes) in non_empty_snapshots(request) {
        parts.push(FormPart::File {
            name: CAPTURE_FILE_FIELD.to_string(),
            file_name: snapshot_file_name(camera, captured_at),
            content_type: JPEG_CONTENT_TYPE.to_string(),
            bytes: bytes.clone(),
        });
    }

    parts
}

/// Build one upload attempt. Called again for every retry.
pub(crate) fn build_capture_request(
    config: &BackendConfig,
    request: &CaptureRequest,
    captured_at: DateTime<Utc>,
    token: Option<&str>,
) -> Result<HttpRequest> {
    let url = config.capture_url()?;
    let http = HttpRequest::post(url, config.timeout);

    let http = match config.capture_format {
        CaptureFormat::Json => {
            let body = json_payload(config, request, captured_at, config.body_token(token));
            http.json(&body, &config.name)?
        }
        CaptureFormat::Multipart => http.multipart(multipart_parts(request, captured_at)),
    };

    Ok(config.authorize(http, token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiSettings;
    use crate::http_client::RequestBody;
    use crate::types::Snapshots;
    use chrono::TimeZone;

    fn config(name: &str) -> BackendConfig {
        let settings = ApiSettings {
            base_url: "https://api.example".to_string(),
            capture_endpoint: "capture".to_string(),
            depot_id: "DPT01".to_string(),
            ..ApiSettings::default()
        };
        BackendConfig::from_settings(name, &settings).unwrap()
    }

    fn captured_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 14, 7, 9).unwrap()
    }

    fn request() -> CaptureRequest {
        let mut snapshots = Snapshots::new();
        snapshots.insert("front".to_string(), vec![0xFF, 0xD8, 0xFF]);
        snapshots.insert("rear".to_string(), Vec::new());
        CaptureRequest::new("T1", "G1", snapshots)
    }

    #[test]
    fn file_name_uses_compact_timestamp() {
        assert_eq!(
            snapshot_file_name("front", captured_at()),
            "front-20240305140709.jpg"
        );
    }

    #[test]
    fn empty_snapshot_has_no_detail_record() {
        let payload = json_payload(&config("Dss"), &request(), captured_at(), None);
        let param = payload["param"].as_array().unwrap();
        assert_eq!(param.len(), 2);
        let detail = &param[1];
        assert_eq!(detail["CAMERA"], "front");
        assert_eq!(detail["IMAGE"], STANDARD.encode([0xFF, 0xD8, 0xFF]));
        assert_eq!(detail["FILENAME"], "front-20240305140709.jpg");
        assert_eq!(detail["TICKET_ID"], "T1");
        assert_eq!(detail["DEPOTID"], "DPT01");
    }

    #[test]
    fn header_defaults() {
        let payload = json_payload(&config("Dss"), &request(), captured_at(), Some("tok"));
        let header = &payload["param"][0];
        assert_eq!(header["TICKET_ID"], "T1");
        assert_eq!(header["GATE_ID"], "G1");
        assert_eq!(header["DEPOTID"], "DPT01");
        assert_eq!(header["REFF_NO"], "T1");
        assert_eq!(header["CAPTURE_DATE"], "2024-03-05 14:07:09");
        assert_eq!(header["TOKEN"], "tok");
        assert!(header.get("IMAGE").is_none());
        assert_eq!(payload["timestamp"], "2024-03-05T14:07:09.000Z");
    }

    #[test]
    fn metadata_overrides_header_and_merges_into_opt() {
        let metadata = BTreeMap::from([
            ("reff_no".to_string(), "R-77".to_string()),
            ("plateNumber".to_string(), "B 123".to_string()),
            ("ticketId".to_string(), "ignored".to_string()),
        ]);
        let request = request().with_metadata(metadata);
        let payload = json_payload(&config("Dss"), &request, captured_at(), None);
        assert_eq!(payload["param"][0]["REFF_NO"], "R-77");
        assert!(payload["param"][0].get("TOKEN").is_none());

        let opt: Value = serde_json::from_str(payload["opt"].as_str().unwrap()).unwrap();
        assert_eq!(opt["ticketId"], "T1");
        assert_eq!(opt["gateId"], "G1");
        assert_eq!(opt["plateNumber"], "B 123");
        assert_eq!(opt["capturedAt"], "2024-03-05T14:07:09.000Z");
    }

    #[test]
    fn multipart_skips_empty_snapshots() {
        let parts = multipart_parts(&request(), captured_at());
        let files: Vec<_> = parts
            .iter()
            .filter_map(|part| match part {
                FormPart::File {
                    name,
                    file_name,
                    content_type,
                    bytes,
                } => Some((name.as_str(), file_name.as_str(), content_type.as_str(), bytes.len())),
                FormPart::Text { .. } => None,
            })
            .collect();
        assert_eq!(
            files,
            vec![("captures", "front-20240305140709.jpg", "image/jpeg", 3)]
        );
        assert!(parts.iter().all(|part| part.name() != METADATA_FIELD));
    }

    #[test]
    fn multipart_metadata_is_json() {
        let request = request().with_metadata(BTreeMap::from([(
            "driverName".to_string(),
            "Budi".to_string(),
        )]));
        let parts = multipart_parts(&request, captured_at());
        let metadata = parts
            .iter()
            .find(|part| part.name() == METADATA_FIELD)
            .unwrap();
        assert_eq!(
            metadata,
            &FormPart::Text {
                name: METADATA_FIELD.to_string(),
                value: r#"{"driverName":"Budi"}"#.to_string(),
                content_type: Some("application/json".to_string()),
            }
        );
    }

    #[test]
    fn empty_metadata_map_is_still_sent() {
        let request = request().with_metadata(BTreeMap::new());
        let parts = multipart_parts(&request, captured_at());
        let metadata = parts
            .iter()
            .find(|part| part.name() == METADATA_FIELD)
            .unwrap();
        assert!(matches!(metadata, FormPart::Text { value, .. } if value == "{}"));
    }

    #[test]
    fn request_follows_capture_format() {
        let http = build_capture_request(&config("Dss"), &request(), captured_at(), Some("tok")).unwrap();
        assert_eq!(http.url, "https://api.example/capture");
        assert!(matches!(http.body, RequestBody::Json(_)));
        assert_eq!(http.header_value("Authorization"), Some("Bearer tok"));

        let http = build_capture_request(&config("Default"), &request(), captured_at(), None).unwrap();
        assert!(matches!(http.body, RequestBody::Multipart(_)));
        assert_eq!(http.header_value("Authorization"), None);
    }

    #[test]
    fn missing_capture_endpoint_is_config_error() {
        let mut cfg = config("Dss");
        cfg.capture_endpoint = None;
        assert!(matches!(
            build_capture_request(&cfg, &request(), captured_at(), None),
            Err(crate::error::BackendError::ConfigError { .. })
        ));
    }
}
