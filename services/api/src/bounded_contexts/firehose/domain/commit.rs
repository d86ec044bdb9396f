use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::shared::domain::errors::AppError;

/// Collections outside this prefix are not ours and are skipped.
pub const RESERVED_COLLECTION_PREFIX: &str = "net.subcults.";

/// Required string fields per collection, matched by suffix after the
/// reserved prefix. Collections without an entry admit any record shape.
const REQUIRED_STRING_FIELDS: &[(&str, &[&str])] = &[
    ("scene", &["name", "geohash"]),
    ("event", &["name", "scene"]),
    ("post", &["text"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOperation {
    Create,
    Update,
    Delete,
}

/// One CBOR frame off the firehose.
#[derive(Debug, Deserialize)]
pub struct CommitFrame {
    pub did: String,
    pub collection: String,
    pub rkey: String,
    pub rev: String,
    pub operation: CommitOperation,
    #[serde(default)]
    pub record: Option<ciborium::Value>,
    /// Microsecond source sequence; doubles as the resume cursor.
    pub time_us: i64,
}

impl CommitFrame {
    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| AppError::Validation(format!("undecodable commit frame: {e}")))
    }

    pub fn is_admitted(&self) -> bool {
        self.collection.starts_with(RESERVED_COLLECTION_PREFIX)
    }

    /// `SHA256(did:collection:rkey:rev)`; replayed operations share it.
    pub fn fingerprint(&self) -> String {
        let input = format!("{}:{}:{}:{}", self.did, self.collection, self.rkey, self.rev);
        hex::encode(Sha256::digest(input.as_bytes()))
    }

    /// Schema check for create/update: required string fields must be present
    /// as strings. Unknown fields pass through untouched.
    pub fn validate_record(&self) -> Result<serde_json::Value, AppError> {
        let record = self
            .record
            .as_ref()
            .ok_or_else(|| AppError::Validation("operation carries no record".to_string()))?;
        let json = cbor_to_json(record);
        let map = json
            .as_object()
            .ok_or_else(|| AppError::Validation("record is not a map".to_string()))?;

        let suffix = self
            .collection
            .strip_prefix(RESERVED_COLLECTION_PREFIX)
            .unwrap_or(&self.collection);
        if let Some((_, fields)) = REQUIRED_STRING_FIELDS.iter().find(|(s, _)| *s == suffix) {
            for field in *fields {
                match map.get(*field) {
                    Some(serde_json::Value::String(_)) => {}
                    Some(_) => {
                        return Err(AppError::Validation(format!(
                            "field '{field}' must be a string"
                        )))
                    }
                    None => {
                        return Err(AppError::Validation(format!(
                            "required field '{field}' is missing"
                        )))
                    }
                }
            }
        }
        Ok(json)
    }
}

/// Lossy-but-total mapping from CBOR into JSON for storage. Bytes become
/// base64, non-string map keys are stringified.
pub fn cbor_to_json(value: &ciborium::Value) -> serde_json::Value {
    use ciborium::Value;
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => {
            let i = i128::from(*i);
            serde_json::Number::from_f64(i as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)
        }
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Text(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => {
            serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
        Value::Array(items) => serde_json::Value::Array(items.iter().map(cbor_to_json).collect()),
        Value::Map(entries) => serde_json::Value::Object(
            entries
                .iter()
                .map(|(k, v)| {
                    let key = match k {
                        Value::Text(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    (key, cbor_to_json(v))
                })
                .collect(),
        ),
        Value::Tag(_, inner) => cbor_to_json(inner),
        _ => serde_json::Value::Null,
    }
}

/// Durable projection row, upserted by `(did, collection, rkey)`.
#[derive(Debug, Clone)]
pub struct IndexedRecord {
    pub did: String,
    pub collection: String,
    pub rkey: String,
    pub rev: String,
    pub record: serde_json::Value,
    pub fingerprint: String,
    pub indexed_at: DateTime<Utc>,
}

impl IndexedRecord {
    pub fn from_frame(frame: &CommitFrame, record: serde_json::Value) -> Self {
        Self {
            did: frame.did.clone(),
            collection: frame.collection.clone(),
            rkey: frame.rkey.clone(),
            rev: frame.rev.clone(),
            record,
            fingerprint: frame.fingerprint(),
            indexed_at: Utc::now(),
        }
    }
}
