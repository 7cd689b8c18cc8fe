//! Series identity and samples
//!
//! A series is the unique combination of metric, period and tag set. The
//! tag set is canonicalised (sorted by key) so that two callers naming the
//! same dimensions in a different order address the same series.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CollectorError, Result};

/// A `(key, value)` dimension attached to a series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Canonical, validated set of tags
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tag>", into = "Vec<Tag>")]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    /// Build a tag set. Empty keys and repeated keys are rejected.
    pub fn new(tags: Vec<Tag>) -> Result<Self> {
        let mut tags = tags;
        if let Some(tag) = tags.iter().find(|t| t.key.is_empty()) {
            return Err(CollectorError::invalid_configuration(format!(
                "tag with empty key (value {:?})",
                tag.value
            )));
        }

        tags.sort();
        if let Some(pair) = tags.windows(2).find(|w| w[0].key == w[1].key) {
            return Err(CollectorError::invalid_configuration(format!(
                "duplicate tag key {:?}",
                pair[0].key
            )));
        }

        Ok(Self(tags))
    }

    /// Tag set with a single dimension
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Self::new(vec![Tag::new(key, value)])
    }

    pub fn tags(&self) -> &[Tag] {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<Vec<Tag>> for TagSet {
    type Error = CollectorError;

    fn try_from(tags: Vec<Tag>) -> Result<Self> {
        Self::new(tags)
    }
}

impl From<TagSet> for Vec<Tag> {
    fn from(set: TagSet) -> Self {
        set.0
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(Tag::to_string).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Identity of a series: (metric, period, tags)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    pub metric: String,
    /// Period length in seconds. Zero for instantaneous gauges.
    pub period: u64,
    pub tags: TagSet,
}

impl SeriesKey {
    pub fn new(metric: impl Into<String>, period: u64, tags: TagSet) -> Self {
        Self {
            metric: metric.into(),
            period,
            tags,
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}s{}", self.metric, self.period, self.tags)
    }
}

/// A series as known by the remote store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    /// Remote identifier
    pub id: String,
    pub key: SeriesKey,
    /// Timestamp of the newest sample; `None` when nothing was ever written
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Retention hint in seconds, if the store reports one
    pub ttl: Option<i64>,
}

/// One value at one aligned timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: f64) -> Self {
        Self { timestamp, value }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_set_is_order_insensitive() {
        let a = TagSet::new(vec![Tag::new("project", "p1"), Tag::new("domain", "d1")]).unwrap();
        let b = TagSet::new(vec![Tag::new("domain", "d1"), Tag::new("project", "p1")]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tags()[0].key, "domain");
        assert_eq!(a.get("project"), Some("p1"));
    }

    #[test]
    fn test_malformed_tag_sets() {
        let err = TagSet::new(vec![Tag::new("", "x")]).unwrap_err();
        assert!(matches!(err, CollectorError::InvalidConfiguration(_)));

        let err = TagSet::new(vec![Tag::new("project", "a"), Tag::new("project", "b")]).unwrap_err();
        assert!(err.to_string().contains("duplicate tag key"));
    }

    #[test]
    fn test_tag_set_deserialize_validates() {
        let ok: TagSet = serde_json::from_str(r#"[{"key":"project","value":"p1"}]"#).unwrap();
        assert_eq!(ok.get("project"), Some("p1"));

        let bad = serde_json::from_str::<TagSet>(r#"[{"key":"","value":"p1"}]"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_series_key_display() {
        let key = SeriesKey::new("cpu", 3600, TagSet::single("project", "p1").unwrap());
        assert_eq!(key.to_string(), "cpu/3600s[project=p1]");
    }
}
