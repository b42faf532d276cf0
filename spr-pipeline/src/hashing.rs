//! Content hashing for staging deduplication
//!
//! The hash covers `(source, data_type, entity_key, timestamp, payload)`. The
//! payload is serialized canonically (object keys sorted at every level, no
//! insignificant whitespace) so field order in the source export never changes
//! the digest.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use spr_common::{time, Error, Result};

use crate::models::DataType;

/// Nesting limit for payloads; deeper structures are rejected as malformed
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Separator between hashed fields (ASCII unit separator)
const FIELD_SEPARATOR: &[u8] = b"\x1f";

/// Canonical, order-independent JSON serialization of a payload
///
/// The top level must be an object: adapters hand over structured maps, and
/// anything else means the adapter misparsed its input.
pub fn canonical_json(payload: &Value) -> Result<String> {
    if !payload.is_object() {
        return Err(Error::MalformedPayload(format!(
            "payload must be a JSON object, got {}",
            kind_of(payload)
        )));
    }
    let mut out = String::new();
    write_canonical(payload, 0, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, depth: usize, out: &mut String) -> Result<()> {
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(Error::MalformedPayload(format!(
            "payload nested deeper than {} levels",
            MAX_PAYLOAD_DEPTH
        )));
    }

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if key.is_empty() {
                    return Err(Error::MalformedPayload("payload contains an empty key".to_string()));
                }
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&encode_string(key)?);
                out.push(':');
                write_canonical(&map[key], depth + 1, out)?;
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, depth + 1, out)?;
            }
            out.push(']');
        }
        Value::String(s) => out.push_str(&encode_string(s)?),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Null => out.push_str("null"),
    }
    Ok(())
}

fn encode_string(s: &str) -> Result<String> {
    serde_json::to_string(s).map_err(|e| Error::MalformedPayload(format!("unencodable string: {}", e)))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Calculate the SHA-256 content hash of an observation (hex-encoded)
pub fn content_hash(
    source: &str,
    data_type: DataType,
    entity_key: &str,
    timestamp: &DateTime<Utc>,
    payload: &Value,
) -> Result<String> {
    let canonical = canonical_json(payload)?;
    let stamp = time::to_storage(timestamp);

    let mut hasher = Sha256::new();
    for part in [source, data_type.as_str(), entity_key, stamp.as_str(), canonical.as_str()] {
        hasher.update(part.as_bytes());
        hasher.update(FIELD_SEPARATOR);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of a text file's content (hex-encoded)
pub fn text_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn day() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 7, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a: Value = serde_json::from_str(r#"{"preco_real":145.5,"commodity":"SOJA","extra":{"b":1,"a":2}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"extra":{"a":2,"b":1},"commodity":"SOJA","preco_real":145.5}"#).unwrap();

        let ha = content_hash("CEPEA", DataType::Price, "SOJA:MT", &day(), &a).unwrap();
        let hb = content_hash("CEPEA", DataType::Price, "SOJA:MT", &day(), &b).unwrap();
        assert_eq!(ha, hb);
        assert_eq!(ha.len(), 64);
    }

    #[test]
    fn test_different_payload_changes_hash() {
        let ha = content_hash("CEPEA", DataType::Price, "SOJA:MT", &day(), &json!({"price": 145.5})).unwrap();
        let hb = content_hash("CEPEA", DataType::Price, "SOJA:MT", &day(), &json!({"price": 146.0})).unwrap();
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_source_is_part_of_hash() {
        let payload = json!({"price": 145.5});
        let ha = content_hash("CEPEA", DataType::Price, "SOJA:MT", &day(), &payload).unwrap();
        let hb = content_hash("IMEA", DataType::Price, "SOJA:MT", &day(), &payload).unwrap();
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let payload = json!({"price": 1});
        let ha = content_hash("AB", DataType::Price, "C", &day(), &payload).unwrap();
        let hb = content_hash("A", DataType::Price, "BC", &day(), &payload).unwrap();
        assert_ne!(ha, hb);
    }

    #[test]
    fn test_canonical_json_is_compact_and_sorted() {
        let payload = json!({"z": [1, {"y": null, "x": true}], "a": "é"});
        assert_eq!(canonical_json(&payload).unwrap(), r#"{"a":"é","z":[1,{"x":true,"y":null}]}"#);
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        let err = canonical_json(&json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::MalformedPayload(_)));
        assert!(err.is_record_level());
    }

    #[test]
    fn test_excessive_nesting_is_malformed() {
        let mut payload = json!(1);
        for _ in 0..(MAX_PAYLOAD_DEPTH + 2) {
            payload = json!({ "n": payload });
        }
        assert!(matches!(canonical_json(&payload), Err(Error::MalformedPayload(_))));
    }

    #[test]
    fn test_empty_key_is_malformed() {
        assert!(matches!(canonical_json(&json!({"": 1})), Err(Error::MalformedPayload(_))));
    }
}
