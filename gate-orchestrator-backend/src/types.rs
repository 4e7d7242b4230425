use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============ Backend selection ============

/// Request/response shape a backend speaks.
///
/// Resolved once per backend when the registry is built, never re-derived per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dialect {
    /// Body maps directly onto [`ValidateResult`] (case-insensitive field names).
    #[default]
    Generic,
    /// `{"status","msg","data":[{...}]}` envelope with DSS field names.
    Dss,
    /// Same envelope, MADOS field names (DWI / EIR gate passes).
    Mados,
}

impl Dialect {
    /// Infer the dialect from a backend name (`"DwiMados"` -> Mados, `"Dss"` -> Dss).
    pub fn infer_from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("mados") {
            Self::Mados
        } else if lower.contains("dss") {
            Self::Dss
        } else {
            Self::Generic
        }
    }

    /// Whether responses carry a structured `status` field.
    pub fn has_status_envelope(self) -> bool {
        !matches!(self, Self::Generic)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Generic => "Generic",
            Self::Dss => "Dss",
            Self::Mados => "Mados",
        };
        f.write_str(s)
    }
}

/// Capture upload payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureFormat {
    /// Single JSON document with header/detail records and base64 images.
    Json,
    /// `multipart/form-data` with one file part per snapshot.
    Multipart,
}

impl CaptureFormat {
    /// Default payload for a dialect when the configuration does not pick one.
    pub fn default_for(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Generic => Self::Multipart,
            Dialect::Dss | Dialect::Mados => Self::Json,
        }
    }
}

/// Direction of the gate lane a scan happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GateDirection {
    /// Gate-in lane.
    #[default]
    #[serde(rename = "IN", alias = "In", alias = "in")]
    In,
    /// Gate-out lane.
    #[serde(rename = "OUT", alias = "Out", alias = "out")]
    Out,
}

impl GateDirection {
    /// The other lane direction (used for endpoint fallback).
    pub fn opposite(self) -> Self {
        match self {
            Self::In => Self::Out,
            Self::Out => Self::In,
        }
    }
}

impl fmt::Display for GateDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "IN",
            Self::Out => "OUT",
        })
    }
}

// ============ Validation ============

/// A scanned credential to validate.
///
/// Serialized as the Generic dialect's request body (`qrCode`, `gateId`,
/// `timestamp`, `operatorId`); `direction` only selects the endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    /// Raw QR payload as scanned.
    pub qr_code: String,
    /// Gate identifier.
    pub gate_id: String,
    /// Scan time.
    pub timestamp: DateTime<Utc>,
    /// Operator on duty, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_id: Option<String>,
    /// Gate lane the scan happened at.
    #[serde(skip)]
    pub direction: GateDirection,
}

impl ValidateRequest {
    /// New request stamped with the current time, gate-in direction.
    pub fn new(qr_code: impl Into<String>, gate_id: impl Into<String>) -> Self {
        Self {
            qr_code: qr_code.into(),
            gate_id: gate_id.into(),
            timestamp: Utc::now(),
            operator_id: None,
            direction: GateDirection::In,
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: GateDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_operator(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = Some(operator_id.into());
        self
    }
}

/// Canonical validation outcome every dialect is normalized into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plate_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver_name: Option<String>,
    /// Raw response body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Extra string fields; keys are stored upper-cased so lookups are case-insensitive.
    #[serde(default)]
    pub additional_data: HashMap<String, String>,
}

impl ValidateResult {
    /// A failed result carrying `message` and, when available, the raw body.
    pub fn failure(message: impl Into<String>, data: Option<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data,
            ..Self::default()
        }
    }

    /// Case-insensitive lookup into [`additional_data`](Self::additional_data).
    pub fn extra(&self, key: &str) -> Option<&str> {
        self.additional_data
            .get(&key.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Insert an extra field under its case-insensitive key.
    pub fn insert_extra(&mut self, key: &str, value: impl Into<String>) {
        self.additional_data
            .insert(key.to_ascii_uppercase(), value.into());
    }
}

// ============ Capture ============

/// Camera name -> JPEG bytes. Ordered so payloads are deterministic.
pub type Snapshots = BTreeMap<String, Vec<u8>>;

/// Evidence captured for one validated transaction.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    /// Ticket the capture belongs to.
    pub ticket_id: String,
    /// Gate identifier.
    pub gate_id: String,
    /// Camera snapshots; zero-length buffers are skipped.
    pub snapshots: Snapshots,
    /// Additional metadata forwarded to the backend.
    pub metadata: Option<BTreeMap<String, String>>,
    /// QR code used to pick the backend (falls back to `ticket_id` when absent).
    pub qr_code: Option<String>,
}

impl CaptureRequest {
    pub fn new(ticket_id: impl Into<String>, gate_id: impl Into<String>, snapshots: Snapshots) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            gate_id: gate_id.into(),
            snapshots,
            metadata: None,
            qr_code: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    #[must_use]
    pub fn with_qr_code(mut self, qr_code: impl Into<String>) -> Self {
        self.qr_code = Some(qr_code.into());
        self
    }

    /// Code used for backend routing.
    pub fn routing_key(&self) -> &str {
        self.qr_code.as_deref().unwrap_or(&self.ticket_id)
    }
}
