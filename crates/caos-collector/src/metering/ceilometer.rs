//! Ceilometer v2 REST backend
//!
//! Reads resources and samples through the Ceilometer v2 API:
//! - `GET /v2/resources` filtered by project, overlap checked on the
//!   resource's first/last sample timestamps
//! - `GET /v2/meters/{counter}` filtered by project, time range and metadata
//!
//! The API cannot filter on a resource id list, so that restriction is
//! applied client-side. Both listings send an explicit `limit`; a response
//! that fills it may be truncated and is rejected.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use caos_common::{parse_timestamp, CollectorError, RawObservation, Result, RESOURCE_METADATA};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use super::{MeteringStore, ObservationQuery, TimeRange};
use crate::config::MeteringConfig;

const QUERY_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Deserialize)]
struct ApiResource {
    resource_id: String,
    first_sample_timestamp: Option<String>,
    last_sample_timestamp: Option<String>,
    #[serde(default)]
    links: Vec<ApiLink>,
}

#[derive(Debug, Deserialize)]
struct ApiLink {
    rel: String,
}

/// Ceilometer v2 API client
pub struct CeilometerApiStore {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    limit: usize,
    source: Option<String>,
}

impl CeilometerApiStore {
    pub fn new(cfg: &MeteringConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| CollectorError::invalid_configuration(format!("metering HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: cfg.api_url.trim_end_matches('/').to_string(),
            token: cfg.auth_token.clone(),
            limit: cfg.query_limit,
            source: Some(cfg.source.trim().to_string()).filter(|s| !s.is_empty()),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .query(query);
        if let Some(token) = &self.token {
            request = request.header("X-Auth-Token", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CollectorError::StoreUnavailable(format!("requesting {path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollectorError::StoreUnavailable(format!(
                "unexpected status {status} from {path}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| CollectorError::Serialization(format!("decoding response from {path}: {e}")))
    }

    /// GET a listing, refusing one that may have been cut at the limit
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        mut query: Vec<(&'static str, String)>,
    ) -> Result<Vec<T>> {
        query.push(("limit", self.limit.to_string()));
        let items: Vec<T> = self.get_json(path, &query).await?;
        if items.len() >= self.limit {
            warn!(path, limit = self.limit, "Listing reached the query limit");
            return Err(CollectorError::invalid_configuration(format!(
                "{path} returned {} entries, the query limit; raise metering.query_limit",
                items.len()
            )));
        }
        Ok(items)
    }
}

fn filter(field: &str, op: &str, value: String) -> [(&'static str, String); 3] {
    [
        ("q.field", field.to_string()),
        ("q.op", op.to_string()),
        ("q.value", value),
    ]
}

fn query_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(QUERY_TIMESTAMP_FORMAT).to_string()
}

/// `resource_metadata.status` is exposed as `metadata.status` by the API.
fn api_field(field: &str) -> String {
    match field.strip_prefix(RESOURCE_METADATA) {
        Some(rest) => format!("metadata{rest}"),
        None => field.to_string(),
    }
}

#[async_trait]
impl MeteringStore for CeilometerApiStore {
    #[instrument(skip(self))]
    async fn find_resources(
        &self,
        tenant: &str,
        counter_name: &str,
        range: TimeRange,
    ) -> Result<Vec<String>> {
        let query = filter("project_id", "eq", tenant.to_string()).to_vec();
        let resources: Vec<ApiResource> = self.get_list("/v2/resources", query).await?;

        let mut found = Vec::new();
        for resource in resources {
            if !resource.links.iter().any(|l| l.rel == counter_name) {
                continue;
            }
            let (Some(first), Some(last)) = (
                resource.first_sample_timestamp.as_deref(),
                resource.last_sample_timestamp.as_deref(),
            ) else {
                continue;
            };
            if range.overlaps(parse_timestamp(first)?, parse_timestamp(last)?) {
                found.push(resource.resource_id);
            }
        }

        debug!(count = found.len(), "Got resources");
        Ok(found)
    }

    #[instrument(skip(self, query), fields(tenant = %query.tenant, counter = %query.counter_name))]
    async fn query_observations(&self, query: &ObservationQuery) -> Result<Vec<RawObservation>> {
        let mut params = Vec::new();
        params.extend(filter("project_id", "eq", query.tenant.clone()));
        params.extend(filter("timestamp", "ge", query_timestamp(&query.start)));
        params.extend(filter("timestamp", "le", query_timestamp(&query.end)));
        if let Some(source) = &self.source {
            params.extend(filter("source", "eq", source.clone()));
        }
        for f in &query.filters {
            params.extend(filter(&api_field(&f.field), "eq", f.equals.clone()));
        }

        let path = format!("/v2/meters/{}", query.counter_name);
        let documents: Vec<serde_json::Value> = self.get_list(&path, params).await?;

        let wanted: HashSet<&str> = query.resource_ids.iter().map(String::as_str).collect();
        let mut observations = Vec::with_capacity(documents.len());
        for doc in &documents {
            let mut obs = RawObservation::from_document(doc)?;
            if !wanted.contains(obs.resource_id.as_str()) {
                continue;
            }
            obs.project(&query.projection);
            observations.push(obs);
        }
        observations.sort_by_key(|o| o.timestamp);

        debug!(
            fetched = documents.len(),
            kept = observations.len(),
            "Got observations"
        );
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_field_mapping() {
        assert_eq!(api_field("resource_metadata.status"), "metadata.status");
        assert_eq!(api_field("counter_volume"), "counter_volume");
    }

    #[test]
    fn test_filter_triplet() {
        let f = filter("project_id", "eq", "p1".into());
        assert_eq!(f[0], ("q.field", "project_id".to_string()));
        assert_eq!(f[2], ("q.value", "p1".to_string()));
    }
}
