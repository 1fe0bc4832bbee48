use meter_store::domain::{ReportingZone, Resolution};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Password-grant token endpoint.
    pub auth_url: String,
    /// Row of the `api` table holding the credentials used for this run.
    pub credentials_id: i64,
    #[serde(default = "default_token_lifetime_secs")]
    pub token_lifetime_secs: u64,
    #[serde(default = "default_token_safety_margin_secs")]
    pub token_safety_margin_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// First page of the building catalog.
    #[serde(default = "default_buildings_url")]
    pub buildings_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<Resolution>,
    /// Repeat passes with this pause in between; a single pass when unset.
    pub interval_secs: Option<u64>,
    /// IANA zone for hour-of-day, day-of-week and calendar days,
    /// e.g. "America/New_York".
    #[serde(default = "default_reporting_timezone")]
    pub reporting_timezone: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub scheduler: SchedulerConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_token_lifetime_secs() -> u64 {
    3600
}

fn default_token_safety_margin_secs() -> u64 {
    5
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_buildings_url() -> String {
    "https://api.buildingos.com/buildings?per_page=100".to_string()
}

fn default_tiers() -> Vec<Resolution> {
    vec![
        Resolution::Live,
        Resolution::QuarterHour,
        Resolution::Hour,
        Resolution::Month,
    ]
}

fn default_reporting_timezone() -> String {
    "Etc/UTC".to_string()
}

impl SchedulerConfig {
    pub fn reporting_zone(&self) -> anyhow::Result<ReportingZone> {
        ReportingZone::from_name(&self.reporting_timezone)
            .map_err(|e| anyhow::anyhow!("invalid scheduler.reporting_timezone: {e}"))
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("SYNC_CONFIG").unwrap_or_else(|_| "sync-config.toml".to_string());
        let contents = fs::read_to_string(&path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        Ok(cfg)
    }
}
