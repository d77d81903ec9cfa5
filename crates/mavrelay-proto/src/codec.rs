use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::envelope::{Envelope, Field, Payload, BIGINT_MARKER};
use crate::registry::{lookup, Lookup, MessageType};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("field {field:?} is not a number: {value}")]
    Field { field: String, value: Value },
}

/// Wraps a decoded record for broadcast. `None` for unknown ids and for
/// types outside the forwarded set.
pub fn encode(msg_id: u32, payload: Payload) -> Option<Envelope> {
    let kind = match lookup(msg_id) {
        Lookup::Known(kind) => kind,
        Lookup::Unknown(id) => {
            debug!(msg_id = id, "unknown message id, dropped");
            return None;
        }
    };
    if !kind.is_forwarded() {
        return None;
    }
    Some(Envelope::new(kind, payload.project(kind.fields())))
}

pub fn serialize(envelope: &Envelope) -> String {
    // Envelope/Payload/Field serialize infallibly (string keys, no maps with non-string keys)
    serde_json::to_string(envelope).unwrap_or_default()
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

/// Consumer side of `serialize`: marker-suffixed strings come back as integers.
pub fn parse(text: &str) -> Result<Envelope, CodecError> {
    let wire: WireEnvelope = serde_json::from_str(text)?;
    let kind = MessageType::from_name(&wire.kind).ok_or(CodecError::UnknownType(wire.kind))?;
    let payload = wire
        .payload
        .into_iter()
        // null stands in for a value the sender could not represent
        .filter(|(_, value)| !value.is_null())
        .map(|(name, value)| {
            let field = parse_field(&value).ok_or_else(|| CodecError::Field {
                field: name.clone(),
                value,
            })?;
            Ok((name, field))
        })
        .collect::<Result<Payload, CodecError>>()?;
    Ok(Envelope::new(kind, payload))
}

fn parse_field(value: &Value) -> Option<Field> {
    match value {
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Some(Field::Int(v as i128))
            } else if let Some(v) = n.as_u64() {
                Some(Field::Int(v as i128))
            } else {
                n.as_f64().map(Field::Float)
            }
        }
        Value::String(s) => s
            .strip_suffix(BIGINT_MARKER)
            .and_then(|digits| digits.parse::<i128>().ok())
            .map(Field::Int),
        _ => None,
    }
}
