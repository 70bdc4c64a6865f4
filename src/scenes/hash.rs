//! Content hash of a scene's entity map
//!
//! The hash is taken over a canonical JSON rendering (object keys sorted at
//! every level) so two maps with equal content hash equally regardless of
//! key order.

use crate::scenes::model::EntityConfig;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex SHA-256 of the canonical form of an entity map
pub fn entities_hash(entities: &BTreeMap<String, EntityConfig>) -> String {
    let value = Value::Object(
        entities
            .iter()
            .map(|(entity_id, config)| (entity_id.clone(), config.to_value()))
            .collect(),
    );
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (index, key) in keys.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
