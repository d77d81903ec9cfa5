use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::registry::MessageType;

/// Largest integer a double holds exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: i128 = (1 << 53) - 1;

/// Suffix marking a string-encoded integer on the wire.
pub const BIGINT_MARKER: char = 'n';

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Int(i128),
    Float(f64),
}

impl Field {
    pub fn as_f64(&self) -> f64 {
        match *self {
            Field::Int(v) => v as f64,
            Field::Float(v) => v,
        }
    }

    pub fn is_safe(&self) -> bool {
        match *self {
            Field::Int(v) => (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&v),
            Field::Float(_) => true,
        }
    }
}

impl From<u8> for Field {
    fn from(v: u8) -> Self { Field::Int(v as i128) }
}

impl From<i16> for Field {
    fn from(v: i16) -> Self { Field::Int(v as i128) }
}

impl From<u16> for Field {
    fn from(v: u16) -> Self { Field::Int(v as i128) }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self { Field::Int(v as i128) }
}

impl From<u32> for Field {
    fn from(v: u32) -> Self { Field::Int(v as i128) }
}

impl From<i64> for Field {
    fn from(v: i64) -> Self { Field::Int(v as i128) }
}

impl From<u64> for Field {
    fn from(v: u64) -> Self { Field::Int(v as i128) }
}

impl From<f32> for Field {
    fn from(v: f32) -> Self { Field::Float(v as f64) }
}

impl From<f64> for Field {
    fn from(v: f64) -> Self { Field::Float(v) }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match *self {
            // inside the safe range the value always fits an i64
            Field::Int(v) if self.is_safe() => s.serialize_i64(v as i64),
            Field::Int(v) => s.serialize_str(&format!("{}{}", v, BIGINT_MARKER)),
            Field::Float(v) => s.serialize_f64(v),
        }
    }
}

/// Flat record of field name -> numeric value. Ordered so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(BTreeMap<String, Field>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<Field>) -> Self {
        self.insert(name, value);
        self
    }

    /// Non-finite floats have no JSON form and are left out.
    pub fn insert(&mut self, name: &str, value: impl Into<Field>) {
        let value = value.into();
        if let Field::Float(v) = value {
            if !v.is_finite() {
                return;
            }
        }
        self.0.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<Field> {
        self.0.get(name).copied()
    }

    /// Numeric view of a field, `None` when absent.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).map(|f| f.as_f64())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Field)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Keeps only the named fields.
    pub fn project(self, names: &[&str]) -> Self {
        Self(self.0.into_iter().filter(|(k, _)| names.contains(&k.as_str())).collect())
    }
}

impl FromIterator<(String, Field)> for Payload {
    fn from_iter<I: IntoIterator<Item = (String, Field)>>(iter: I) -> Self {
        let mut payload = Payload::new();
        for (name, value) in iter {
            payload.insert(&name, value);
        }
        payload
    }
}

/// One unit of telemetry on the broadcast channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub payload: Payload,
}

impl Envelope {
    pub fn new(kind: MessageType, payload: Payload) -> Self {
        Self { kind, payload }
    }
}
