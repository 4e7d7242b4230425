//! DSS dialect.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::types::ValidateResult;

use super::common::{FieldTable, finalize_message, normalize_envelope, param_body};
use super::{DialectCodec, ValidateBodyContext};

pub(crate) struct DssCodec;

const DSS_FIELDS: FieldTable = FieldTable {
    ticket_id: &["TICKET_ID", "TICKETID", "REFF_NO", "REFFNO"],
    plate_number: &["NOPOL", "PLATE_NO", "PLATENO", "PLATE"],
    driver_name: &["DRIVER", "DRIVER_NAME"],
    message: &["MESSAGE"],
};

/// `{"param":[{"QRCODE", "DEPOTID", "TOKEN"?}]}`
pub(super) fn structured_validate_fields(ctx: &ValidateBodyContext<'_>) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert("QRCODE".into(), Value::from(ctx.request.qr_code.as_str()));
    fields.insert(
        "DEPOTID".into(),
        Value::from(ctx.depot_id.unwrap_or_default()),
    );
    if let Some(token) = ctx.body_token {
        fields.insert("TOKEN".into(), Value::from(token));
    }
    fields
}

impl DialectCodec for DssCodec {
    fn validate_body(&self, ctx: &ValidateBodyContext<'_>) -> Value {
        param_body(structured_validate_fields(ctx))
    }

    fn parse_validate(&self, backend: &str, body: &str) -> Result<ValidateResult> {
        let (mut result, _root) = normalize_envelope(backend, body, &DSS_FIELDS)?;
        finalize_message(&mut result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::common::{FAILURE_MESSAGE, SUCCESS_MESSAGE};
    use crate::error::BackendError;
    use crate::types::ValidateRequest;
    use serde_json::json;

    #[test]
    fn ticket_plate_and_message_from_first_record() {
        let body = r#"{"status":"1","msg":"","data":[{"TICKET_ID":"T1","NOPOL":"B123","MESSAGE":"ok"}]}"#;
        let result = DssCodec.parse_validate("Dss", body).unwrap();
        assert!(result.success);
        assert_eq!(result.ticket_id.as_deref(), Some("T1"));
        assert_eq!(result.plate_number.as_deref(), Some("B123"));
        assert_eq!(result.message, "ok");
        assert_eq!(result.extra("nopol"), Some("B123"));
    }

    #[test]
    fn envelope_msg_wins_over_record_message() {
        let body = r#"{"status":200,"msg":"Gate open","data":[{"MESSAGE":"ignored"}]}"#;
        let result = DssCodec.parse_validate("Dss", body).unwrap();
        assert_eq!(result.message, "Gate open");
    }

    #[test]
    fn fallback_keys_in_priority_order() {
        let body = r#"{"status":"OK","data":[{"REFF_NO":"R7","TICKETID":"T7","PLATE":"L 9","DRIVER_NAME":"Sari"}]}"#;
        let result = DssCodec.parse_validate("Dss", body).unwrap();
        assert_eq!(result.ticket_id.as_deref(), Some("T7"));
        assert_eq!(result.plate_number.as_deref(), Some("L 9"));
        assert_eq!(result.driver_name.as_deref(), Some("Sari"));
    }

    #[test]
    fn blank_values_are_skipped() {
        let body = r#"{"status":"1","data":[{"TICKET_ID":"  ","REFF_NO":"R1"}]}"#;
        let result = DssCodec.parse_validate("Dss", body).unwrap();
        assert_eq!(result.ticket_id.as_deref(), Some("R1"));
    }

    #[test]
    fn only_first_record_is_consulted() {
        let body = r#"{"status":"1","data":[{"NOPOL":"A1"},{"NOPOL":"A2","TICKET_ID":"T2"}]}"#;
        let result = DssCodec.parse_validate("Dss", body).unwrap();
        assert_eq!(result.plate_number.as_deref(), Some("A1"));
        assert_eq!(result.ticket_id, None);
    }

    #[test]
    fn synthesized_messages() {
        let result = DssCodec.parse_validate("Dss", r#"{"status":"S"}"#).unwrap();
        assert_eq!(result.message, SUCCESS_MESSAGE);
        let result = DssCodec
            .parse_validate("Dss", r#"{"status":"0","data":[]}"#)
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.message, FAILURE_MESSAGE);
    }

    #[test]
    fn lowercase_record_keys_match() {
        let body = r#"{"status":"1","data":[{"ticket_id":"t-1"}]}"#;
        let result = DssCodec.parse_validate("Dss", body).unwrap();
        assert_eq!(result.ticket_id.as_deref(), Some("t-1"));
    }

    #[test]
    fn malformed_body_is_parse_error() {
        assert!(matches!(
            DssCodec.parse_validate("Dss", r#"{"status":"1""#),
            Err(BackendError::ParseError { .. })
        ));
        assert!(matches!(
            DssCodec.parse_validate("Dss", r#""ok""#),
            Err(BackendError::ParseError { .. })
        ));
    }

    #[test]
    fn request_body_shape() {
        let request = ValidateRequest::new("DEPOT1/DWI/X", "G1");
        let body = DssCodec.validate_body(&ValidateBodyContext {
            request: &request,
            depot_id: Some("DPT01"),
            body_token: Some("tok"),
        });
        assert_eq!(
            body,
            json!({"param": [{"QRCODE": "DEPOT1/DWI/X", "DEPOTID": "DPT01", "TOKEN": "tok"}]})
        );

        let body = DssCodec.validate_body(&ValidateBodyContext {
            request: &request,
            depot_id: None,
            body_token: None,
        });
        assert_eq!(
            body,
            json!({"param": [{"QRCODE": "DEPOT1/DWI/X", "DEPOTID": ""}]})
        );
    }
}
