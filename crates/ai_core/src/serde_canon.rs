//! Canonical JSON and content hashes for bundle files
//!
//! Every artifact file is written as compact JSON with object keys sorted at every
//! depth, so a given model always serializes to the same bytes and therefore to the
//! same blake3 digest.

use crate::errors::Result;
use serde::Serialize;
use serde_json::{Map, Value};

/// Compact JSON with recursively sorted object keys.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let sorted = sort_keys(serde_json::to_value(value)?);
    Ok(serde_json::to_string(&sorted)?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, inner)| (key, sort_keys(inner)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        scalar => scalar,
    }
}

/// blake3 of `bytes`, hex encoded
pub fn hash_bytes_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// blake3 of the canonical JSON form, hex encoded
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String> {
    Ok(hash_bytes_hex(to_canonical_json(value)?.as_bytes()))
}
