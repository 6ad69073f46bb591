//! Content addressing. Every identity in the system is a 64-hex SHA-256:
//! object hashes over canonical JSON, vector hashes over raw little-endian
//! f32 bytes, schema hashes over a deep-sorted schema, and commit ids over
//! message, timestamp, parents, and an order-independent operation merkle.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::core::models::{ClassSchema, Operation, Schema, VectorObject};

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonical JSON: object keys sorted recursively, no insignificant
/// whitespace. Hash inputs must never depend on map iteration order.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Canonical JSON of the object without its vector. This string is both the
/// hash input and the `object_data` payload recorded on operations.
pub fn canonical_object_json(class: &str, id: &str, properties: &Map<String, Value>) -> String {
    let mut map = Map::new();
    map.insert("class".to_string(), Value::String(class.to_string()));
    map.insert("id".to_string(), Value::String(id.to_string()));
    map.insert("properties".to_string(), Value::Object(properties.clone()));
    canonical_json(&Value::Object(map))
}

pub fn object_hash(class: &str, id: &str, properties: &Map<String, Value>) -> String {
    sha256_hex(canonical_object_json(class, id, properties).as_bytes())
}

pub fn vector_bytes(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// SHA-256 of the raw little-endian f32 bytes; empty string for no vector.
pub fn vector_hash(vector: &[f32]) -> String {
    if vector.is_empty() {
        return String::new();
    }
    sha256_hex(&vector_bytes(vector))
}

pub fn hash_object_full(object: &VectorObject) -> (String, String) {
    (
        object_hash(&object.class, &object.id, &object.properties),
        vector_hash(&object.vector),
    )
}

/// Deep-sorted schema hash: classes by name, properties within each class by
/// name. The input is cloned, never mutated.
pub fn schema_hash(schema: &Schema) -> String {
    let mut classes: Vec<ClassSchema> = schema.classes.clone();
    classes.sort_by(|a, b| a.name.cmp(&b.name));
    for class in &mut classes {
        class.properties.sort_by(|a, b| a.name.cmp(&b.name));
    }
    let sorted = Schema { classes };
    let value = serde_json::to_value(&sorted).unwrap_or(Value::Null);
    sha256_hex(canonical_json(&value).as_bytes())
}

fn operation_leaf_hash(op: &Operation) -> String {
    sha256_hex(
        format!(
            "{}|{}|{}|{}|{}",
            op.op_type, op.class, op.object_id, op.object_data, op.vector_hash
        )
        .as_bytes(),
    )
}

/// Order-independent merkle over the operations: leaf hashes are sorted
/// before the final digest, so a permutation of the same operations yields
/// the same root.
pub fn operations_merkle(ops: &[Operation]) -> String {
    let mut leaves: Vec<String> = ops.iter().map(operation_leaf_hash).collect();
    leaves.sort();
    sha256_hex(leaves.concat().as_bytes())
}

fn rfc3339_nanos(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn commit_id(
    message: &str,
    timestamp: &DateTime<Utc>,
    parent_id: &str,
    ops: &[Operation],
) -> String {
    sha256_hex(
        format!(
            "{}|{}|{}|{}",
            message,
            rfc3339_nanos(timestamp),
            parent_id,
            operations_merkle(ops)
        )
        .as_bytes(),
    )
}

pub fn merge_commit_id(
    message: &str,
    timestamp: &DateTime<Utc>,
    parent_id: &str,
    merge_parent_id: &str,
    ops: &[Operation],
) -> String {
    sha256_hex(
        format!(
            "{}|{}|{}|{}|{}",
            message,
            rfc3339_nanos(timestamp),
            parent_id,
            merge_parent_id,
            operations_merkle(ops)
        )
        .as_bytes(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{OperationType, PropertySchema};
    use chrono::TimeZone;
    use serde_json::json;

    fn sample_op(seq: u64, id: &str, data: &str) -> Operation {
        Operation {
            commit_id: String::new(),
            seq,
            op_type: OperationType::Insert,
            class: "Article".to_string(),
            object_id: id.to_string(),
            object_data: data.to_string(),
            previous_data: String::new(),
            vector_hash: String::new(),
            previous_vector_hash: String::new(),
            committed: false,
            reverted: false,
            timestamp: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"b": {"z": 1, "a": 2}, "a": [3, {"y": 4, "x": 5}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":[3,{"x":5,"y":4}],"b":{"a":2,"z":1}}"#
        );
    }

    #[test]
    fn object_hash_ignores_vector() {
        let mut props = Map::new();
        props.insert("title".to_string(), json!("First"));
        let with_vector = VectorObject {
            id: "obj-001".to_string(),
            class: "Article".to_string(),
            properties: props.clone(),
            vector: vec![0.1, 0.2],
            last_update_time_unix: 7,
        };
        let without_vector = VectorObject {
            vector: vec![],
            ..with_vector.clone()
        };
        let (h1, v1) = hash_object_full(&with_vector);
        let (h2, v2) = hash_object_full(&without_vector);
        assert_eq!(h1, h2);
        assert_eq!(v1.len(), 64);
        assert!(v2.is_empty());
    }

    #[test]
    fn vector_hash_depends_only_on_bytes() {
        assert_eq!(vector_hash(&[1.0, 2.0]), vector_hash(&[1.0, 2.0]));
        assert_ne!(vector_hash(&[1.0, 2.0]), vector_hash(&[2.0, 1.0]));
        assert_eq!(vector_hash(&[]), "");
    }

    #[test]
    fn schema_hash_is_order_independent() {
        let a = Schema {
            classes: vec![
                ClassSchema {
                    name: "B".to_string(),
                    vectorizer: "none".to_string(),
                    properties: vec![
                        PropertySchema {
                            name: "q".to_string(),
                            data_type: "text".to_string(),
                        },
                        PropertySchema {
                            name: "p".to_string(),
                            data_type: "int".to_string(),
                        },
                    ],
                },
                ClassSchema {
                    name: "A".to_string(),
                    vectorizer: "none".to_string(),
                    properties: vec![],
                },
            ],
        };
        let mut b = a.clone();
        b.classes.reverse();
        b.classes[1].properties.reverse();
        assert_eq!(schema_hash(&a), schema_hash(&b));
        // hashing must not reorder the caller's schema
        assert_eq!(a.classes[0].name, "B");
    }

    #[test]
    fn commit_id_is_deterministic_and_order_independent() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let ops = vec![sample_op(1, "obj-001", "{}"), sample_op(2, "obj-002", "{}")];
        let mut shuffled = ops.clone();
        shuffled.reverse();

        let id = commit_id("msg", &ts, "", &ops);
        assert_eq!(id.len(), 64);
        assert_eq!(id, commit_id("msg", &ts, "", &shuffled));
        assert_ne!(id, commit_id("other", &ts, "", &ops));
        assert_ne!(id, commit_id("msg", &ts, "parent", &ops));
    }

    #[test]
    fn merge_commit_id_binds_both_parents() {
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let ops: Vec<Operation> = vec![];
        let id = merge_commit_id("m", &ts, "p1", "p2", &ops);
        assert_ne!(id, merge_commit_id("m", &ts, "p2", "p1", &ops));
        assert_ne!(id, commit_id("m", &ts, "p1", &ops));
    }
}
