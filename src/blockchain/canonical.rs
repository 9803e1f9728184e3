use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serializes any value into its canonical JSON byte form
///
/// Object keys are sorted at every nesting level and the output is compact,
/// so two logically equal values always produce the same bytes no matter in
/// which order their fields were built.
pub fn canonical_bytes<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(data)?;
    Ok(canonical_string(value).into_bytes())
}

/// SHA-256 over the canonical bytes, as lowercase hex
pub fn canonical_hash<T: Serialize + ?Sized>(data: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(&canonical_bytes(data)?))
}

/// Canonical compact JSON text of an already built value
pub fn canonical_string(value: Value) -> String {
    sort_keys(value).to_string()
}

/// Lowercase hex SHA-256 digest of raw bytes
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Recursively orders object keys
pub fn sort_keys(value: Value) -> Value {
    // serde_json keeps insertion order when `preserve_order` is enabled anywhere
    // in the dependency graph, so ordering is rebuilt explicitly.
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (key, inner) in entries {
                sorted.insert(key, sort_keys(inner));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_bytes() {
        let mut first = Map::new();
        first.insert("zeta".to_string(), json!(1));
        first.insert("alpha".to_string(), json!({"b": 2, "a": 1}));

        let mut second = Map::new();
        second.insert("alpha".to_string(), json!({"a": 1, "b": 2}));
        second.insert("zeta".to_string(), json!(1));

        assert_eq!(
            canonical_bytes(&Value::Object(first)).unwrap(),
            canonical_bytes(&Value::Object(second)).unwrap()
        );
    }

    #[test]
    fn test_nested_keys_are_sorted() {
        let value = json!({"outer": [{"z": true, "a": false}], "b": "x", "a": 0});
        let bytes = canonical_bytes(&value).unwrap();

        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":0,"b":"x","outer":[{"a":false,"z":true}]}"#
        );
    }

    #[test]
    fn test_canonical_hash_is_sha256_hex() {
        let hash = canonical_hash(&json!({"index": 0})).unwrap();

        assert_eq!(hash.len(), 64);
        assert_eq!(hash, sha256_hex(br#"{"index":0}"#));
    }
}
