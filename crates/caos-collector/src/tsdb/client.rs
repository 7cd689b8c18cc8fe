//! HTTP client of the CAOS time-series store
//!
//! `GET /status` and `POST /token` are plain REST returning `{data: ...}`.
//! Everything else is GraphQL on `POST /graphql`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caos_common::{
    format_timestamp, parse_timestamp, CollectorError, Metric, MetricKind, Result, Sample, Series,
    SeriesKey, Tag,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, Span};
use uuid::Uuid;

use super::{ApiStatus, SeriesStore, Session};
use crate::config::TsdbConfig;

const REQUEST_ID_HEADER: &str = "X-Request-Id";

const METRICS_QUERY: &str = r#"
query {
  metrics {
    name
    type
  }
}
"#;

const CREATE_METRIC_MUTATION: &str = r#"
mutation($name: String!, $type: String!) {
  metric: create_metric(name: $name, type: $type) {
    name
    type
  }
}
"#;

const CREATE_SERIES_MUTATION: &str = r#"
mutation($period: Int!, $metric: MetricPrimary!, $tags: [TagPrimary!]!) {
  series: create_series(period: $period, metric: $metric, tags: $tags) {
    id
    last_timestamp
    ttl
  }
}
"#;

const SAMPLE_QUERY: &str = r#"
query($id: ID!, $timestamp: Datetime!) {
  series(id: $id) {
    sample(timestamp: $timestamp) {
      timestamp
      value
    }
  }
}
"#;

const CREATE_SAMPLE_MUTATION: &str = r#"
mutation($series: SeriesPrimary!, $timestamp: Datetime!, $value: Float!, $overwrite: Boolean) {
  sample: create_sample(series: $series, timestamp: $timestamp, value: $value, overwrite: $overwrite) {
    timestamp
    value
  }
}
"#;

const CREATE_TAG_METADATA_MUTATION: &str = r#"
mutation($tag: TagPrimary!, $metadata: String!, $timestamp: Datetime!) {
  metadata: create_tag_metadata(tag: $tag, metadata: $metadata, timestamp: $timestamp) {
    timestamp
  }
}
"#;

#[derive(Debug, Deserialize)]
struct RestEnvelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct GraphqlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TokenData {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MetricsData {
    metrics: Vec<RemoteMetric>,
}

#[derive(Debug, Deserialize)]
struct RemoteMetric {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct SeriesData {
    series: RemoteSeries,
}

#[derive(Debug, Deserialize)]
struct RemoteSeries {
    id: Value,
    last_timestamp: Option<String>,
    ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SampleQueryData {
    series: Option<SampleHolder>,
}

#[derive(Debug, Deserialize)]
struct SampleHolder {
    sample: Option<RemoteSample>,
}

#[derive(Debug, Deserialize)]
struct SampleData {
    sample: RemoteSample,
}

#[derive(Debug, Deserialize)]
struct RemoteSample {
    timestamp: String,
    value: f64,
}

impl RemoteSample {
    fn into_sample(self) -> Result<Sample> {
        Ok(Sample::new(parse_timestamp(&self.timestamp)?, self.value))
    }
}

/// GraphQL client of the series store
#[derive(Clone)]
pub struct TsdbClient {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
}

impl TsdbClient {
    pub fn new(cfg: &TsdbConfig, session: Arc<Session>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| CollectorError::invalid_configuration(format!("series store HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.api_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request_id = Uuid::new_v4().to_string();
        Span::current().record("request_id", request_id.as_str());

        let mut builder = self
            .http
            .request(method, format!("{}/{}", self.base_url, path))
            .header(REQUEST_ID_HEADER, request_id);
        if let Some(token) = self.session.token() {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send(builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        builder
            .send()
            .await
            .map_err(|e| CollectorError::RemoteUnavailable(e.to_string()))
    }

    #[instrument(skip(self), fields(request_id = tracing::field::Empty))]
    async fn get_status(&self) -> Result<ApiStatus> {
        let response = Self::send(self.request(reqwest::Method::GET, "status")).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::RemoteUnavailable(format!(
                "status endpoint returned {status}"
            )));
        }
        let envelope: RestEnvelope<ApiStatus> = response
            .json()
            .await
            .map_err(|e| CollectorError::Serialization(format!("status response: {e}")))?;
        envelope
            .data
            .ok_or_else(|| CollectorError::Serialization("status response without data".into()))
    }

    /// Exchange credentials for a bearer token
    #[instrument(skip(self), fields(request_id = tracing::field::Empty))]
    async fn login(&self) -> Result<String> {
        let creds = self.session.credentials();
        let body = json!({
            "username": creds.username,
            "password": creds.password,
        });

        let response = Self::send(self.request(reqwest::Method::POST, "token").json(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CollectorError::AuthFailure(format!("login returned {status}")));
        }
        let envelope: RestEnvelope<TokenData> = response
            .json()
            .await
            .map_err(|e| CollectorError::AuthFailure(format!("login response: {e}")))?;

        envelope
            .data
            .and_then(|d| d.token)
            .ok_or_else(|| CollectorError::AuthFailure("no token returned".into()))
    }

    #[instrument(skip(self, query, variables), fields(request_id = tracing::field::Empty))]
    async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T> {
        debug!(%variables, "GraphQL request");
        let body = json!({ "query": query, "variables": variables });

        let response = Self::send(self.request(reqwest::Method::POST, "graphql").json(&body)).await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollectorError::RemoteWrite(format!("HTTP {status}: {text}")));
        }

        let envelope: GraphqlEnvelope<T> = response
            .json()
            .await
            .map_err(|e| CollectorError::RemoteWrite(format!("malformed GraphQL response: {e}")))?;

        if !envelope.errors.is_empty() {
            return Err(CollectorError::RemoteWrite(format!(
                "GraphQL errors: {}",
                Value::Array(envelope.errors)
            )));
        }
        envelope
            .data
            .ok_or_else(|| CollectorError::RemoteWrite("GraphQL response without data".into()))
    }

    fn series_variables(key: &SeriesKey) -> Value {
        json!({
            "metric": { "name": key.metric },
            "period": key.period,
            "tags": key.tags.tags(),
        })
    }
}

#[async_trait]
impl SeriesStore for TsdbClient {
    async fn status(&self) -> Result<ApiStatus> {
        self.get_status().await
    }

    async fn refresh_auth(&self) -> Result<()> {
        info!("Refreshing token");
        self.session.clear();
        let token = self.login().await?;
        self.session.set_token(token);

        let status = self.get_status().await.map_err(|e| match e {
            CollectorError::RemoteUnavailable(msg) => CollectorError::AuthFailure(msg),
            other => other,
        })?;
        if !status.is_authenticated() {
            return Err(CollectorError::AuthFailure(
                "token not accepted by the API".into(),
            ));
        }
        info!(status = %status.status, "API auth is OK");
        Ok(())
    }

    async fn list_metrics(&self) -> Result<BTreeMap<String, MetricKind>> {
        let data: MetricsData = self.graphql(METRICS_QUERY, json!({})).await?;
        data.metrics
            .into_iter()
            .map(|m| -> Result<(String, MetricKind)> { Ok((m.name, m.kind.parse()?)) })
            .collect()
    }

    async fn declare_metric(&self, metric: &Metric) -> Result<()> {
        let _: Value = self
            .graphql(
                CREATE_METRIC_MUTATION,
                json!({ "name": metric.name, "type": metric.kind.as_str() }),
            )
            .await?;
        Ok(())
    }

    async fn ensure_series(&self, key: &SeriesKey) -> Result<Series> {
        let data: SeriesData = self
            .graphql(CREATE_SERIES_MUTATION, Self::series_variables(key))
            .await?;

        let last_timestamp = data
            .series
            .last_timestamp
            .as_deref()
            .map(parse_timestamp)
            .transpose()?;
        if last_timestamp.is_none() {
            debug!(series = %key, "No previous data for series");
        }

        let id = match data.series.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(Series {
            id,
            key: key.clone(),
            last_timestamp,
            ttl: data.series.ttl,
        })
    }

    async fn sample_at(&self, key: &SeriesKey, timestamp: DateTime<Utc>) -> Result<Option<Sample>> {
        let series = self.ensure_series(key).await?;
        let data: SampleQueryData = self
            .graphql(
                SAMPLE_QUERY,
                json!({ "id": series.id, "timestamp": format_timestamp(&timestamp) }),
            )
            .await?;

        data.series
            .and_then(|s| s.sample)
            .map(RemoteSample::into_sample)
            .transpose()
    }

    async fn put_sample(&self, key: &SeriesKey, sample: Sample, overwrite: bool) -> Result<Sample> {
        let data: SampleData = self
            .graphql(
                CREATE_SAMPLE_MUTATION,
                json!({
                    "series": Self::series_variables(key),
                    "timestamp": format_timestamp(&sample.timestamp),
                    "value": sample.value,
                    "overwrite": overwrite,
                }),
            )
            .await?;
        data.sample.into_sample()
    }

    async fn create_tag_metadata(
        &self,
        tag: &Tag,
        metadata: &Value,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        info!(tag = %tag, "Creating tag metadata");
        let _: Value = self
            .graphql(
                CREATE_TAG_METADATA_MUTATION,
                json!({
                    "tag": tag,
                    "metadata": metadata.to_string(),
                    "timestamp": format_timestamp(&timestamp),
                }),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_variables_shape() {
        let key = SeriesKey::new(
            "cpu",
            3600,
            caos_common::TagSet::single("project", "p1").unwrap(),
        );
        let vars = TsdbClient::series_variables(&key);
        assert_eq!(
            vars,
            json!({
                "metric": { "name": "cpu" },
                "period": 3600,
                "tags": [{ "key": "project", "value": "p1" }],
            })
        );
    }

    #[test]
    fn test_graphql_envelope_with_errors() {
        let raw = json!({ "data": null, "errors": [{ "message": "boom" }] });
        let envelope: GraphqlEnvelope<Value> = serde_json::from_value(raw).unwrap();
        assert!(envelope.data.is_none());
        assert_eq!(envelope.errors.len(), 1);
    }
}
