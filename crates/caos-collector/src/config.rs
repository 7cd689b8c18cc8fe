//! Collector configuration
//!
//! Layered from an optional YAML file and `CAOS_`-prefixed environment
//! variables (`CAOS_TSDB__API_URL`, `CAOS_METERING__POLLING_PERIOD`, ...).

use std::path::Path;

use caos_common::types::window::span;
use caos_common::{unix_epoch, CollectorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::inventory::{ComputeServer, Domain, Hypervisor, Project, ProviderRatios, Quotas};
use crate::scheduler::ScheduleConfig;

const ENV_PREFIX: &str = "CAOS";
const ENV_SEPARATOR: &str = "__";

/// Collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Remote series store
    pub tsdb: TsdbConfig,
    /// Metering store
    pub metering: MeteringConfig,
    /// Collection parameters shared by all jobs
    pub collection: CollectionConfig,
    /// Static cloud inventory
    pub inventory: InventoryConfig,
    /// Job schedules for `run`
    pub schedulers: Vec<ScheduleConfig>,
}

/// Remote series store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TsdbConfig {
    pub api_url: String,
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for TsdbConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:4444/api/v1".to_string(),
            username: "admin".to_string(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Metering store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    pub api_url: String,
    pub auth_token: Option<String>,
    /// Upstream polling period in seconds, used as query slack
    pub polling_period: u64,
    pub timeout_secs: u64,
    /// Maximum entries requested per listing
    pub query_limit: usize,
    /// Sample source to restrict queries to, empty for any
    pub source: String,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8777".to_string(),
            auth_token: None,
            polling_period: 600,
            timeout_secs: 10,
            query_limit: 100_000,
            source: "openstack".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfig {
    /// Reference instant window boundaries are aligned to
    pub epoch: DateTime<Utc>,
    pub project_tag_key: String,
    pub domain_tag_key: String,
    pub hypervisor_tag_key: String,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            epoch: unix_epoch(),
            project_tag_key: "project".to_string(),
            domain_tag_key: "domain".to_string(),
            hypervisor_tag_key: "hypervisor".to_string(),
        }
    }
}

/// Records served by the static inventory backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InventoryConfig {
    pub domains: Vec<Domain>,
    pub projects: Vec<Project>,
    pub hypervisors: Vec<Hypervisor>,
    /// Quotas by project id
    pub quotas: std::collections::BTreeMap<String, Quotas>,
    /// Server lifetimes used to derive compute usage summaries
    pub servers: Vec<ComputeServer>,
    /// Raw `uptime` output by hypervisor id
    pub uptimes: std::collections::BTreeMap<String, String>,
    /// Placement allocation ratios by hypervisor hostname
    pub allocation_ratios: std::collections::BTreeMap<String, ProviderRatios>,
}

impl CollectorConfig {
    /// Load configuration from `.env`, an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // .env is optional
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let cfg: Self = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| CollectorError::invalid_configuration(e.to_string()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tsdb.api_url.trim().is_empty() {
            return Err(CollectorError::invalid_configuration("tsdb.api_url is empty"));
        }
        if self.metering.api_url.trim().is_empty() {
            return Err(CollectorError::invalid_configuration(
                "metering.api_url is empty",
            ));
        }
        if self.metering.polling_period == 0 {
            return Err(CollectorError::invalid_configuration(
                "metering.polling_period must be positive",
            ));
        }
        span("metering.polling_period", self.metering.polling_period)?;
        if self.metering.query_limit == 0 {
            return Err(CollectorError::invalid_configuration(
                "metering.query_limit must be positive",
            ));
        }
        for key in [
            &self.collection.project_tag_key,
            &self.collection.domain_tag_key,
            &self.collection.hypervisor_tag_key,
        ] {
            if key.is_empty() {
                return Err(CollectorError::invalid_configuration("empty tag key"));
            }
        }
        for schedule in &self.schedulers {
            schedule.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = CollectorConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.metering.polling_period, 600);
        assert_eq!(cfg.collection.epoch, unix_epoch());
        assert_eq!(cfg.collection.project_tag_key, "project");
    }

    #[test]
    fn test_zero_polling_period_rejected() {
        let mut cfg = CollectorConfig::default();
        cfg.metering.polling_period = 0;
        assert!(matches!(
            cfg.validate(),
            Err(CollectorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_metering_bounds_rejected() {
        let mut cfg = CollectorConfig::default();
        cfg.metering.query_limit = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CollectorConfig::default();
        cfg.metering.polling_period = u64::MAX;
        assert!(matches!(
            cfg.validate(),
            Err(CollectorError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let raw = r#"
tsdb:
  api_url: "http://tsdb.example:4444/api/v1"
  username: collector
metering:
  polling_period: 300
schedulers:
  - job: projects_quotas
    interval: 900
"#;
        let cfg: CollectorConfig = config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Yaml))
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap();

        assert_eq!(cfg.tsdb.username, "collector");
        assert_eq!(cfg.tsdb.timeout_secs, 30);
        assert_eq!(cfg.metering.polling_period, 300);
        assert_eq!(cfg.metering.api_url, "http://localhost:8777");
        assert_eq!(cfg.metering.query_limit, 100_000);
        assert_eq!(cfg.metering.source, "openstack");
        assert_eq!(cfg.schedulers.len(), 1);
        assert_eq!(cfg.schedulers[0].interval, 900);
        assert!(cfg.validate().is_ok());
    }
}
