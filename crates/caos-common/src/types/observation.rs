//! Raw metering observations
//!
//! Observations are read from the metering store and never written back.
//! They can be sparse, duplicated, or numerically decreasing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::window::parse_timestamp;
use crate::error::{CollectorError, Result};
use crate::flatten::flatten_record;

/// Name of the primary counter field
pub const COUNTER_VOLUME: &str = "counter_volume";

/// Root of nested metadata fields (`resource_metadata.vcpus`)
pub const RESOURCE_METADATA: &str = "resource_metadata";

/// One counter observation for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub resource_id: String,
    pub project_id: String,
    pub counter_name: String,
    pub timestamp: DateTime<Utc>,
    pub counter_volume: f64,
    /// Flattened metadata, keys relative to `resource_metadata`
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl RawObservation {
    pub fn new(
        resource_id: impl Into<String>,
        project_id: impl Into<String>,
        counter_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        counter_volume: f64,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            project_id: project_id.into(),
            counter_name: counter_name.into(),
            timestamp,
            counter_volume,
            metadata: BTreeMap::new(),
        }
    }

    /// Set one metadata leaf (dotted key relative to `resource_metadata`)
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Build an observation from a metering document with nested metadata.
    pub fn from_document(doc: &Value) -> Result<Self> {
        let obj = doc
            .as_object()
            .ok_or_else(|| CollectorError::Serialization("observation is not an object".into()))?;

        let text = |name: &str| -> Result<String> {
            obj.get(name)
                .and_then(Value::as_str)
                .map(str::to_owned)
                .ok_or_else(|| CollectorError::Serialization(format!("observation missing {name}")))
        };

        let timestamp = parse_timestamp(&text("timestamp")?)?;
        let counter_volume = obj
            .get(COUNTER_VOLUME)
            .and_then(Value::as_f64)
            .ok_or_else(|| CollectorError::Serialization("observation missing counter_volume".into()))?;

        let metadata = match obj.get(RESOURCE_METADATA) {
            Some(Value::Object(inner)) => flatten_record(inner),
            _ => BTreeMap::new(),
        };

        Ok(Self {
            resource_id: text("resource_id")?,
            project_id: text("project_id")?,
            counter_name: text("counter_name")?,
            timestamp,
            counter_volume,
            metadata,
        })
    }

    fn metadata_value(&self, field: &str) -> Option<&Value> {
        field
            .strip_prefix(RESOURCE_METADATA)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|key| self.metadata.get(key))
    }

    /// Numeric value of `field` (`counter_volume` or `resource_metadata.*`)
    pub fn value(&self, field: &str) -> Option<f64> {
        if field == COUNTER_VOLUME {
            return Some(self.counter_volume);
        }
        match self.metadata_value(field)? {
            Value::String(raw) => raw.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
            other => other.as_f64(),
        }
    }

    /// Whether `field` holds the string `expected`
    pub fn matches(&self, field: &str, expected: &str) -> bool {
        self.metadata_value(field).and_then(Value::as_str) == Some(expected)
    }

    /// Keep only the projected metadata fields. An empty projection keeps all.
    pub fn project(&mut self, fields: &[String]) {
        if fields.is_empty() {
            return;
        }
        self.metadata.retain(|key, _| {
            fields
                .iter()
                .any(|f| f.strip_prefix(RESOURCE_METADATA).and_then(|r| r.strip_prefix('.')) == Some(key.as_str()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "resource_id": "vm-1",
            "project_id": "p1",
            "counter_name": "instance",
            "timestamp": "2017-03-01T10:00:00",
            "counter_volume": 1.0,
            "resource_metadata": {
                "status": "active",
                "vcpus": 4,
                "flavor": { "ram": 2048 }
            }
        })
    }

    #[test]
    fn test_from_document_flattens_metadata() {
        let obs = RawObservation::from_document(&document()).unwrap();
        assert_eq!(obs.resource_id, "vm-1");
        assert_eq!(obs.value("resource_metadata.vcpus"), Some(4.0));
        assert_eq!(obs.value("resource_metadata.flavor.ram"), Some(2048.0));
        assert_eq!(obs.value(COUNTER_VOLUME), Some(1.0));
        assert!(obs.matches("resource_metadata.status", "active"));
        assert_eq!(obs.value("resource_metadata.missing"), None);
    }

    #[test]
    fn test_from_document_missing_field() {
        let mut doc = document();
        doc.as_object_mut().unwrap().remove("counter_volume");
        assert!(RawObservation::from_document(&doc).is_err());
    }

    #[test]
    fn test_projection() {
        let mut obs = RawObservation::from_document(&document()).unwrap();
        obs.project(&["resource_metadata.vcpus".to_string()]);
        assert_eq!(obs.metadata.len(), 1);
        assert_eq!(obs.value("resource_metadata.vcpus"), Some(4.0));
        assert!(!obs.matches("resource_metadata.status", "active"));
    }

    #[test]
    fn test_numeric_strings_in_metadata() {
        // the metering api serializes metadata values as strings
        let mut doc = document();
        doc["resource_metadata"] = json!({ "vcpus": "2", "flavor": { "ram": " 512 " }, "status": "active" });
        let obs = RawObservation::from_document(&doc).unwrap();
        assert_eq!(obs.value("resource_metadata.vcpus"), Some(2.0));
        assert_eq!(obs.value("resource_metadata.flavor.ram"), Some(512.0));
        assert_eq!(obs.value("resource_metadata.status"), None);
    }
}
