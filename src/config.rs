// src/config.rs - station configuration loaded from YAML

use crate::alarms::AlarmConfig;
use crate::notify::SmtpConfig;
use crate::solar::{SolarCalculator, SolarOptions, SunshineCriteria};
use crate::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// One year
pub const MAX_STALE_MINUTES: u64 = 525_600;

// ============================================================================
// MAIN CONFIGURATION
// ============================================================================

/// Complete agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the station is
    pub station: StationConfig,

    /// Clear-sky model and sunshine detection
    #[serde(default)]
    pub solar: SolarConfig,

    /// Alarm sweep settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Notification queue settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Outgoing e-mail; alarms asking for e-mail are logged only when absent
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    /// Alarm definitions keyed by name
    #[serde(default)]
    pub alarms: BTreeMap<String, AlarmConfig>,
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationConfig {
    #[serde(default = "default_station_name")]
    pub name: String,

    /// Degrees, north positive
    pub latitude: f64,

    /// Degrees, east positive
    pub longitude: f64,

    /// Metres above sea level
    #[serde(default)]
    pub altitude_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarConfig {
    /// Publish `solar_max` and `solar_elevation` readings
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub options: SolarOptions,

    /// Seconds between clear-sky updates
    #[serde(default = "default_solar_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub sunshine: SunshineCriteria,

    /// Measured irradiance metric that drives the derived `sunshine` reading
    #[serde(default = "default_solar_metric")]
    pub solar_metric: String,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            options: SolarOptions::default(),
            interval_secs: default_solar_interval(),
            sunshine: SunshineCriteria::default(),
            solar_metric: default_solar_metric(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between latch-expiry sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Report a metric as stopped after this many minutes without data
    #[serde(default)]
    pub stale_after_minutes: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            stale_after_minutes: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Pending notifications kept before the oldest is dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Seconds the worker may keep flushing on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_station_name() -> String {
    "station".to_string()
}
fn default_solar_interval() -> u64 {
    60
}
fn default_solar_metric() -> String {
    "solar_radiation".to_string()
}
fn default_sweep_interval() -> u64 {
    60
}
fn default_queue_capacity() -> usize {
    256
}
fn default_shutdown_grace() -> u64 {
    10
}

// ============================================================================
// LOADING AND VALIDATION
// ============================================================================

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses and validates a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(content)?;
        for (name, alarm) in config.alarms.iter_mut() {
            if alarm.name.is_empty() {
                alarm.name = name.clone();
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let station = &self.station;
        if !(-90.0..=90.0).contains(&station.latitude) {
            return Err(MonitorError::Config(format!(
                "station.latitude must be within [-90, 90], got {}",
                station.latitude
            )));
        }
        if !(-180.0..=180.0).contains(&station.longitude) {
            return Err(MonitorError::Config(format!(
                "station.longitude must be within [-180, 180], got {}",
                station.longitude
            )));
        }
        if !station.altitude_m.is_finite() {
            return Err(MonitorError::Config("station.altitude_m must be finite".to_string()));
        }

        if self.solar.interval_secs == 0 {
            return Err(MonitorError::Config("solar.interval_secs must be greater than 0".to_string()));
        }
        let sunshine = &self.solar.sunshine;
        if !(sunshine.threshold_percent > 0.0 && sunshine.threshold_percent <= 100.0) {
            return Err(MonitorError::Config(format!(
                "solar.sunshine.threshold_percent must be within (0, 100], got {}",
                sunshine.threshold_percent
            )));
        }
        let options = &self.solar.options;
        for (field, value) in [
            ("bras_turbidity_june", options.bras_turbidity_june),
            ("bras_turbidity_december", options.bras_turbidity_december),
            ("transmission_june", options.transmission_june),
            ("transmission_december", options.transmission_december),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(MonitorError::Config(format!("solar.{} must be positive, got {}", field, value)));
            }
        }

        if self.engine.sweep_interval_secs == 0 {
            return Err(MonitorError::Config("engine.sweep_interval_secs must be greater than 0".to_string()));
        }
        if let Some(minutes) = self.engine.stale_after_minutes {
            if minutes == 0 || minutes > MAX_STALE_MINUTES {
                return Err(MonitorError::Config(format!(
                    "engine.stale_after_minutes must be between 1 and {}, got {}",
                    MAX_STALE_MINUTES, minutes
                )));
            }
        }
        if self.dispatcher.queue_capacity == 0 {
            return Err(MonitorError::Config("dispatcher.queue_capacity must be greater than 0".to_string()));
        }

        if let Some(smtp) = &self.smtp {
            smtp.validate()?;
        }

        for (key, alarm) in &self.alarms {
            if alarm.name != *key {
                return Err(MonitorError::Config(format!(
                    "Alarm '{}' declares a different name '{}'",
                    key, alarm.name
                )));
            }
            alarm.validate()?;
        }
        Ok(())
    }

    /// Alarm definitions in name order, ready for the engine.
    pub fn alarm_configs(&self) -> Vec<AlarmConfig> {
        self.alarms.values().cloned().collect()
    }

    pub fn solar_calculator(&self) -> SolarCalculator {
        SolarCalculator::new(
            self.station.latitude,
            self.station.longitude,
            self.station.altitude_m,
            self.solar.options.clone(),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.engine.sweep_interval_secs)
    }

    pub fn solar_interval(&self) -> Duration {
        Duration::from_secs(self.solar.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.dispatcher.shutdown_grace_secs)
    }

    /// Sections that differ from `next` but are only read at startup.
    pub fn restart_required(&self, next: &Config) -> Vec<&'static str> {
        let mut sections = Vec::new();
        if self.dispatcher != next.dispatcher {
            sections.push("dispatcher");
        }
        if self.smtp != next.smtp {
            sections.push("smtp");
        }
        sections
    }
}
