//! Nested record flattening
//!
//! Metering documents carry nested metadata (`resource_metadata.flavor.vcpus`).
//! Field projections and value lookups address those leaves by dotted path,
//! so documents are flattened once at ingestion.
//!
//! Contract:
//! - object members recurse, keys joined with `.`
//! - every non-object value (scalars, `null`, arrays) is a leaf and is kept as is
//! - empty objects contribute no keys
//! - output is ordered by key

use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Key separator used in flattened paths.
pub const SEPARATOR: char = '.';

/// Flatten a JSON object into dotted keys.
pub fn flatten_record(record: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    visit(record, None, &mut out);
    out
}

/// Flatten `record` and prepend `prefix` to every key.
pub fn flatten_with_prefix(prefix: &str, record: &Map<String, Value>) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    visit(record, Some(prefix), &mut out);
    out
}

fn visit(record: &Map<String, Value>, prefix: Option<&str>, out: &mut BTreeMap<String, Value>) {
    for (key, value) in record {
        let path = match prefix {
            Some(p) => format!("{p}{SEPARATOR}{key}"),
            None => key.clone(),
        };
        match value {
            Value::Object(inner) => visit(inner, Some(&path), out),
            leaf => {
                out.insert(path, leaf.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_flatten_nested() {
        let record = object(json!({
            "a": 1,
            "b": 2,
            "c": { "aa": 11, "bb": 22, "cc": { "aaa": 111 } }
        }));

        let flat = flatten_record(&record);
        assert_eq!(flat.len(), 5);
        assert_eq!(flat["a"], json!(1));
        assert_eq!(flat["c.aa"], json!(11));
        assert_eq!(flat["c.cc.aaa"], json!(111));
    }

    #[test]
    fn test_arrays_and_nulls_are_leaves() {
        let record = object(json!({ "tags": ["x", "y"], "gone": null, "empty": {} }));

        let flat = flatten_record(&record);
        assert_eq!(flat["tags"], json!(["x", "y"]));
        assert_eq!(flat["gone"], Value::Null);
        assert!(!flat.contains_key("empty"));
    }

    #[test]
    fn test_prefix() {
        let record = object(json!({ "status": "active", "flavor": { "vcpus": 4 } }));

        let flat = flatten_with_prefix("resource_metadata", &record);
        let keys: Vec<_> = flat.keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["resource_metadata.flavor.vcpus", "resource_metadata.status"]
        );
    }
}
