//! Purpose: Sync record envelope and document validation for the relay.
//! Exports: `SyncRecord`, `MAX_DOCUMENT_BYTES`, `validate_document`, `now_rfc3339`.
//! Invariants: `serverUpdatedAt` is assigned by the relay, never by clients.
//! Invariants: Documents must carry non-empty `version` and `history` fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Error, ErrorKind};

/// Serialized document ceiling for a single sync write.
pub const MAX_DOCUMENT_BYTES: usize = 5 * 1024 * 1024;

const REQUIRED_FIELDS: &[&str] = &["version", "history"];

/// One stored generation of a synced document: the client payload plus the
/// server-assigned write timestamp.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub data: Value,
    #[serde(rename = "serverUpdatedAt")]
    pub server_updated_at: String,
}

/// Checks document shape and serialized size before any store access.
pub fn validate_document(document: &Value) -> Result<(), Error> {
    let Some(fields) = document.as_object() else {
        return Err(Error::new(ErrorKind::Usage).with_message("payload must be a JSON object"));
    };
    for name in REQUIRED_FIELDS {
        if !field_present(fields.get(*name)) {
            return Err(Error::new(ErrorKind::Usage).with_message(format!(
                "missing required fields: {}",
                REQUIRED_FIELDS.join(", ")
            )));
        }
    }
    let serialized = serde_json::to_vec(document).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("failed to serialize payload")
            .with_source(err)
    })?;
    if serialized.len() > MAX_DOCUMENT_BYTES {
        return Err(Error::new(ErrorKind::TooLarge).with_message(format!(
            "payload too large (max {} bytes)",
            MAX_DOCUMENT_BYTES
        )));
    }
    Ok(())
}

// Null, empty string, zero, and false all count as missing; empty arrays and
// objects count as present.
fn field_present(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Current UTC time in RFC 3339, as stamped onto each accepted write.
pub fn now_rfc3339() -> Result<String, Error> {
    use time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc().format(&Rfc3339).map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("timestamp format failed")
            .with_source(err)
    })
}
