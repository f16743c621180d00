//! Configuration management for the price index
//!
//! Loads from config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use chrono::Duration as ChronoDuration;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

use crate::oracle::PollerSettings;
use crate::persistence::HistoryPolicy;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub poller: PollerConfig,
    pub fx: FxConfig,
    pub history: HistoryConfig,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,
    /// Poller tick in seconds
    pub poll_tick_secs: u64,
    /// Aggregator tick in seconds
    pub aggregate_tick_secs: u64,
    /// History tick in seconds
    pub history_tick_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Poll interval for sources without their own
    pub default_poll_interval_secs: u64,
    /// Grace period before a failing source is ignored
    pub ignore_timeout_secs: u64,
    /// Per-call adapter timeout
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FxConfig {
    pub enabled: bool,
    /// Endpoint returning `{code: {name, rate}}`
    pub url: String,
    pub refresh_secs: u64,
    /// Currency the rates are quoted against
    pub base: String,
    /// Older tables are treated as unavailable
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub data_dir: String,
    pub minute_gate_secs: u64,
    pub minute_retention_secs: u64,
    pub hourly_window_secs: u64,
    pub hourly_gate_secs: u64,
    pub hourly_retention_secs: u64,
    pub daily_window_secs: u64,
    pub daily_gate_secs: u64,
    pub volumes_gate_secs: u64,
}

fn secs(value: u64) -> ChronoDuration {
    ChronoDuration::seconds(value.min(u64::from(u32::MAX)) as i64)
}

impl PollerConfig {
    pub fn settings(&self) -> PollerSettings {
        PollerSettings {
            default_poll_interval: secs(self.default_poll_interval_secs),
            ignore_timeout: secs(self.ignore_timeout_secs),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
        }
    }
}

impl FxConfig {
    pub fn refresh_every(&self) -> ChronoDuration {
        secs(self.refresh_secs)
    }

    pub fn max_age(&self) -> ChronoDuration {
        secs(self.max_age_secs)
    }
}

impl HistoryConfig {
    pub fn policy(&self) -> HistoryPolicy {
        HistoryPolicy {
            minute_gate: secs(self.minute_gate_secs),
            minute_retention: secs(self.minute_retention_secs),
            hourly_window: secs(self.hourly_window_secs),
            hourly_gate: secs(self.hourly_gate_secs),
            hourly_retention: secs(self.hourly_retention_secs),
            daily_window: secs(self.daily_window_secs),
            daily_gate: secs(self.daily_gate_secs),
            volumes_gate: secs(self.volumes_gate_secs),
        }
    }
}

impl AppConfig {
    /// Builder pre-filled with every default
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        let builder = Config::builder()
            // Service defaults
            .set_default("service.log_json", false)?
            .set_default("service.poll_tick_secs", 5)?
            .set_default("service.aggregate_tick_secs", 5)?
            .set_default("service.history_tick_secs", 60)?
            // Poller defaults
            .set_default("poller.default_poll_interval_secs", 60)?
            .set_default("poller.ignore_timeout_secs", 1800)?
            .set_default("poller.fetch_timeout_secs", 10)?
            // FX defaults
            .set_default("fx.enabled", true)?
            .set_default("fx.url", "http://localhost:8000/fiat_data.json")?
            .set_default("fx.refresh_secs", 3600)?
            .set_default("fx.base", "USD")?
            .set_default("fx.max_age_secs", 21600)?
            // History defaults
            .set_default("history.enabled", true)?
            .set_default("history.data_dir", "./data")?
            .set_default("history.minute_gate_secs", 120)?
            .set_default("history.minute_retention_secs", 86_400)?
            .set_default("history.hourly_window_secs", 3_600)?
            .set_default("history.hourly_gate_secs", 7_200)?
            .set_default("history.hourly_retention_secs", 2_592_000)?
            .set_default("history.daily_window_secs", 86_400)?
            .set_default("history.daily_gate_secs", 172_800)?
            .set_default("history.volumes_gate_secs", 172_800)?;
        Ok(builder)
    }

    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = Self::defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PRICEINDEX_*)
            .add_source(Environment::with_prefix("PRICEINDEX").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        app_config.validate()?;

        Ok(app_config)
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        let enabled = self.sources.iter().filter(|s| s.enabled).count();
        format!(
            "sources={}/{} poll={}s ignore_after={}s fx={} history={} data_dir={}",
            enabled,
            self.sources.len(),
            self.poller.default_poll_interval_secs,
            self.poller.ignore_timeout_secs,
            if self.fx.enabled { self.fx.base.as_str() } else { "off" },
            self.history.enabled,
            self.history.data_dir
        )
    }

    /// Semantic checks the deserializer can't express
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("service.poll_tick_secs", self.service.poll_tick_secs),
            ("service.aggregate_tick_secs", self.service.aggregate_tick_secs),
            ("service.history_tick_secs", self.service.history_tick_secs),
            ("poller.default_poll_interval_secs", self.poller.default_poll_interval_secs),
            ("poller.ignore_timeout_secs", self.poller.ignore_timeout_secs),
            ("poller.fetch_timeout_secs", self.poller.fetch_timeout_secs),
            ("fx.refresh_secs", self.fx.refresh_secs),
            ("fx.max_age_secs", self.fx.max_age_secs),
            ("history.minute_gate_secs", self.history.minute_gate_secs),
            ("history.minute_retention_secs", self.history.minute_retention_secs),
            ("history.hourly_window_secs", self.history.hourly_window_secs),
            ("history.hourly_gate_secs", self.history.hourly_gate_secs),
            ("history.daily_window_secs", self.history.daily_window_secs),
            ("history.daily_gate_secs", self.history.daily_gate_secs),
            ("history.volumes_gate_secs", self.history.volumes_gate_secs),
        ];
        for (name, value) in periods {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }

        if self.fx.enabled && self.fx.url.trim().is_empty() {
            bail!("fx.url is required when fx.enabled is set");
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                bail!("source with display name '{}' has an empty id", source.display_name);
            }
            if !seen.insert(source.id.as_str()) {
                bail!("duplicate source id '{}'", source.id);
            }
            if source.poll_interval_secs == Some(0) {
                bail!("source '{}' has a zero poll interval", source.id);
            }
            let mut currencies = HashSet::new();
            for market in &source.markets {
                if market.currency.trim().is_empty() || market.url.trim().is_empty() {
                    bail!("source '{}' has a market without currency or url", source.id);
                }
                if !currencies.insert(market.currency.trim().to_uppercase()) {
                    bail!(
                        "source '{}' lists currency {} more than once",
                        source.id,
                        market.currency
                    );
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
