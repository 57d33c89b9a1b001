//! Configuration management for Thermia
//!
//! Settings come from an optional YAML file and are then overridden by the
//! environment variables the controller has always been deployed with
//! (`TOKEN`, `THRESHOLD`, `ACTIVE_HOURS`, `SCHEDULE`, `TZ`, `SHELLY_URL`).
//! Anything malformed is rejected here, so the control loop only ever sees a
//! valid [`DecisionConfig`].

mod defaults;

use crate::error::{Result, ThermiaError};
use crate::logging::parse_log_level;
use crate::policy::{DecisionConfig, HourSet};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Locations searched when no explicit config path is given
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "thermia.yaml",
    "/data/thermia.yaml",
    "/etc/thermia/config.yaml",
];

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA timezone the heat pump lives in; all day/hour logic is local
    pub timezone: String,

    /// Decide and log, but never command the relay
    pub dry_run: bool,

    /// Decision rules and tick behaviour
    pub control: ControlConfig,

    /// ENTSO-E transparency platform access
    pub entsoe: EntsoeConfig,

    /// Relay endpoint
    pub relay: RelayConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Decision rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Price ceiling in c/kWh; zero or negative disables threshold mode
    pub threshold: f64,

    /// Number of cheapest hours per day to run in; zero disables
    pub active_hours: u32,

    /// Comma separated hours (0-23) used when no price rule applies
    pub schedule: String,

    /// Local hour from which tomorrow's prices are fetched
    pub tomorrow_cutoff_hour: u32,

    /// Upper bound for the price refresh inside one hourly tick
    pub refresh_timeout_secs: u64,

    /// Refresh prices from a separate task on its own timer
    pub background_refresh: bool,

    /// Background refresher gives up (and stops the controller) after this
    /// many failed refreshes in a row
    pub max_consecutive_refresh_failures: u32,
}

/// ENTSO-E API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntsoeConfig {
    /// Base URL of the REST API
    pub api_url: String,

    /// Security token issued by the transparency platform
    pub security_token: String,

    /// EIC code of the bidding zone (in and out domain)
    pub bidding_zone: String,

    /// Per-request timeout
    pub request_timeout_secs: u64,

    /// Retries on transport failures
    pub max_retries: u32,

    /// Base retry delay; attempt `n` waits `n² × delay`
    pub retry_delay_ms: u64,
}

/// Relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Relay endpoint, e.g. `http://10.0.0.84/relay/0`
    pub url: String,

    /// Per-request timeout
    pub request_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional log file (or directory) for daily rotated logs
    pub file: Option<String>,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Load the file (explicit path or first default location), apply
    /// environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match DEFAULT_CONFIG_PATHS
                .iter()
                .map(Path::new)
                .find(|p| p.exists())
            {
                Some(p) => Self::from_file(p)?,
                None => Self::default(),
            },
        };
        config.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment-like lookup. Unset or empty
    /// variables leave the current value alone.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(token) = get("TOKEN") {
            self.entsoe.security_token = token;
        }
        if let Some(v) = get("THRESHOLD") {
            self.control.threshold = v.parse().map_err(|e| {
                ThermiaError::config(format!("failed to parse float from THRESHOLD ({v}): {e}"))
            })?;
        }
        if let Some(v) = get("ACTIVE_HOURS") {
            self.control.active_hours = v.parse().map_err(|e| {
                ThermiaError::config(format!("failed to parse int from ACTIVE_HOURS ({v}): {e}"))
            })?;
        }
        if let Some(v) = get("SCHEDULE") {
            self.control.schedule = v;
        }
        if let Some(v) = get("TZ") {
            self.timezone = v;
        }
        if let Some(v) = get("SHELLY_URL") {
            self.relay.url = v;
        }
        if let Some(v) = get("ENTSOE_DOMAIN") {
            self.entsoe.bidding_zone = v;
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    /// Parsed timezone
    pub fn tz(&self) -> Result<Tz> {
        self.timezone.parse::<Tz>().map_err(|_| {
            ThermiaError::validation("timezone", format!("unknown timezone '{}'", self.timezone))
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.tz()?;

        if self.entsoe.security_token.trim().is_empty() {
            return Err(ThermiaError::validation(
                "entsoe.security_token",
                "TOKEN not set",
            ));
        }
        if self.entsoe.api_url.trim().is_empty() {
            return Err(ThermiaError::validation(
                "entsoe.api_url",
                "API URL cannot be empty",
            ));
        }
        if self.entsoe.bidding_zone.trim().is_empty() {
            return Err(ThermiaError::validation(
                "entsoe.bidding_zone",
                "Bidding zone cannot be empty",
            ));
        }
        if self.entsoe.request_timeout_secs == 0 {
            return Err(ThermiaError::validation(
                "entsoe.request_timeout_secs",
                "Must be greater than 0",
            ));
        }

        if self.relay.url.trim().is_empty() {
            return Err(ThermiaError::validation("relay.url", "URL cannot be empty"));
        }
        if self.relay.request_timeout_secs == 0 {
            return Err(ThermiaError::validation(
                "relay.request_timeout_secs",
                "Must be greater than 0",
            ));
        }

        if !self.control.threshold.is_finite() {
            return Err(ThermiaError::validation(
                "control.threshold",
                "Must be a finite number",
            ));
        }
        if self.control.active_hours > 24 {
            return Err(ThermiaError::validation(
                "control.active_hours",
                "Must be between 0 and 24",
            ));
        }
        self.control
            .schedule
            .parse::<HourSet>()
            .map_err(|e| ThermiaError::validation("control.schedule", e.to_string()))?;
        if self.control.tomorrow_cutoff_hour > 23 {
            return Err(ThermiaError::validation(
                "control.tomorrow_cutoff_hour",
                "Must be between 0 and 23",
            ));
        }
        if self.control.refresh_timeout_secs == 0 {
            return Err(ThermiaError::validation(
                "control.refresh_timeout_secs",
                "Must be greater than 0",
            ));
        }
        if self.control.background_refresh && self.control.max_consecutive_refresh_failures == 0 {
            return Err(ThermiaError::validation(
                "control.max_consecutive_refresh_failures",
                "Must be greater than 0",
            ));
        }

        parse_log_level(&self.logging.level)
            .map_err(|e| ThermiaError::validation("logging.level", e.to_string()))?;

        Ok(())
    }

    /// Immutable decision inputs for the control policy. `dry_run_flag`
    /// (the CLI switch) is combined with the configured `dry_run`.
    pub fn decision_config(&self, dry_run_flag: bool) -> Result<DecisionConfig> {
        let schedule = self
            .control
            .schedule
            .parse::<HourSet>()
            .map_err(|e| ThermiaError::validation("control.schedule", e.to_string()))?;
        Ok(DecisionConfig {
            threshold: (self.control.threshold > 0.0).then_some(self.control.threshold),
            active_hours: (self.control.active_hours > 0)
                .then_some(self.control.active_hours as usize),
            schedule,
            timezone: self.tz()?,
            dry_run: self.dry_run || dry_run_flag,
        })
    }
}

impl ControlConfig {
    pub const fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }
}

impl EntsoeConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl RelayConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
