//! Payload codec.
//!
//! A job body is a schema-less JSON object. It is stored on the record twice,
//! under [`PAYLOAD_FIELD`] and [`LEGACY_PAYLOAD_FIELD`], so readers written
//! against either field name keep working. Both fields carry identical bytes.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{QueueError, QueueResult};

/// Primary field holding the encoded payload.
pub const PAYLOAD_FIELD: &str = "payload";

/// Legacy field holding the same encoded payload.
pub const LEGACY_PAYLOAD_FIELD: &str = "data";

/// Ordered string-keyed map of JSON values.
///
/// Insertion order survives encode/decode (`serde_json/preserve_order`).
pub type Payload = serde_json::Map<String, Value>;

/// Encode a payload to its canonical JSON text.
pub fn encode(payload: &Payload) -> QueueResult<String> {
    serde_json::to_string(payload).map_err(|e| QueueError::encode(e.to_string()))
}

/// Decode canonical JSON text into a payload.
///
/// The top-level value must be an object.
pub fn decode(raw: &str) -> QueueResult<Payload> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(QueueError::decode(format!(
            "expected a JSON object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(QueueError::decode(e.to_string())),
    }
}

/// Record fields for an already-encoded body.
pub fn record_fields(encoded: &str) -> Vec<(String, String)> {
    vec![
        (PAYLOAD_FIELD.to_string(), encoded.to_string()),
        (LEGACY_PAYLOAD_FIELD.to_string(), encoded.to_string()),
    ]
}

/// Encode a payload straight into record fields.
pub fn encode_fields(payload: &Payload) -> QueueResult<Vec<(String, String)>> {
    encode(payload).map(|body| record_fields(&body))
}

/// Extract and decode the payload from record fields.
///
/// The primary field wins; the legacy field is used when the primary one is
/// absent or empty.
pub fn parse_payload(fields: &HashMap<String, String>) -> QueueResult<Payload> {
    let raw = [PAYLOAD_FIELD, LEGACY_PAYLOAD_FIELD]
        .iter()
        .filter_map(|name| fields.get(*name))
        .find(|raw| !raw.is_empty())
        .ok_or(QueueError::MissingPayload)?;

    decode(raw)
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
