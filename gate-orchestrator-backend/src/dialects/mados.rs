//! MADOS dialect (DWI and EIR gate passes).

use serde_json::Value;

use crate::error::Result;
use crate::types::ValidateResult;

use super::common::{
    FieldTable, finalize_message, non_blank_str, normalize_envelope, param_body,
};
use super::dss::structured_validate_fields;
use super::{DialectCodec, ValidateBodyContext};

pub(crate) struct MadosCodec;

const MADOS_FIELDS: FieldTable = FieldTable {
    ticket_id: &[
        "DWI",
        "EIR",
        "GATEPASS",
        "GATE_PASS",
        "PASS_NUMBER",
        "TICKET_ID",
        "TICKETID",
        "QRCODE",
    ],
    plate_number: &["NOPOL", "PLATE_NO", "PLATENO", "NOPOLIS", "PLATE"],
    driver_name: &["DRIVER", "DRIVER_NAME", "DRIVERNAME"],
    message: &["GATESTATUS", "GATE_STATUS", "REASON", "REMARK"],
};

impl DialectCodec for MadosCodec {
    /// DSS fields plus `GATE_PASS` carrying the scanned code.
    fn validate_body(&self, ctx: &ValidateBodyContext<'_>) -> Value {
        let mut fields = structured_validate_fields(ctx);
        fields.insert(
            "GATE_PASS".into(),
            Value::from(ctx.request.qr_code.as_str()),
        );
        param_body(fields)
    }

    fn parse_validate(&self, backend: &str, body: &str) -> Result<ValidateResult> {
        let (mut result, root) = normalize_envelope(backend, body, &MADOS_FIELDS)?;

        if result.message.trim().is_empty()
            && let Some(reason) = non_blank_str(&root, "reason")
        {
            result.message = reason;
        }

        finalize_message(&mut result);
        Ok(result)
    }
}
