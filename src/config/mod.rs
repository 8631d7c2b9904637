//! Configuration for geoalarm with validation and sensible defaults.
//!
//! The configuration is a single TOML file, `geoalarm.toml`, searched in
//! `$XDG_CONFIG_HOME/geoalarm/` or in the directory passed with `--config`.
//! A commented default file is written on first start.
//!
//! ```toml
//! #[Distance tracking]
//! update_threshold_meters = 200      # Re-render the live card after this much movement (1-10000)
//! walking_speed_kmh = 5.0            # Assumed speed for the ETA (0.5-200) km/h
//!
//! #[Events]
//! dedup_window_secs = 2              # Collapse repeated region/timer events (0-60) seconds
//!
//! #[Snooze]
//! default_snooze_minutes = 5         # Snooze length when none is given (1-120) minutes
//!
//! #[Suppression]
//! suppression_retention_days = 7     # Keep "hidden today" records this long (1-365) days
//! # timezone = "Asia/Bangkok"        # Calendar for "today"; host timezone when unset
//!
//! #[UI bridge]
//! bridge_max_attempts = 3            # Delivery attempts before giving up (1-10)
//! bridge_backoff_ms = 500            # Attempt n waits n x backoff (10-60000) ms
//!
//! #[Location sampler]
//! location_interval_secs = 45        # Preferred sample interval (5-3600) seconds
//! location_fastest_interval_secs = 30
//! location_min_distance_meters = 200
//!
//! [[alarms]]
//! id = "home"
//! label = "Home"
//! latitude = 13.7563
//! longitude = 100.5018
//! radius = 150
//! recurring = true
//! ```
//!
//! Every field is optional. Values are range-checked by
//! [`validation::validate_config`] when the file is loaded; the accessors on
//! [`Config`] fill in the defaults from [`crate::constants`].

pub mod builder;
pub mod loading;
pub mod validation;


use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::alarm::{AlarmDefinition, AlarmId, GeoPoint};
use crate::bridge::RetryPolicy;
use crate::constants::*;
use crate::engine::EngineSettings;

pub use builder::create_default_config;
pub use loading::{get_config_path, get_custom_config_dir, load, load_from_path, set_config_dir};

/// A destination declared in the configuration file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AlarmConfig {
    pub id: String,
    pub label: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Trigger radius in meters.
    pub radius: f64,
    pub recurring: Option<bool>,
}

impl AlarmConfig {
    pub fn to_definition(&self) -> AlarmDefinition {
        AlarmDefinition {
            id: AlarmId::new(self.id.clone()),
            label: self.label.clone().unwrap_or_else(|| self.id.clone()),
            location: GeoPoint::new(self.latitude, self.longitude),
            radius_meters: self.radius,
            recurring: self.recurring.unwrap_or(false),
        }
    }
}

/// Sampling cadence requested from the location collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationCadence {
    pub interval: Duration,
    pub fastest_interval: Duration,
    pub min_distance_meters: f64,
}

/// Settings loaded from `geoalarm.toml`.
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
pub struct Config {
    pub update_threshold_meters: Option<f64>,
    pub walking_speed_kmh: Option<f64>,
    pub dedup_window_secs: Option<u64>,
    pub default_snooze_minutes: Option<u32>,
    pub suppression_retention_days: Option<u32>,
    pub bridge_max_attempts: Option<u32>,
    pub bridge_backoff_ms: Option<u64>,
    /// IANA timezone name deciding what "today" means.
    pub timezone: Option<String>,
    pub location_interval_secs: Option<u64>,
    pub location_fastest_interval_secs: Option<u64>,
    pub location_min_distance_meters: Option<f64>,
    pub alarms: Option<Vec<AlarmConfig>>,
}

impl Config {
    pub fn load() -> Result<Self> {
        loading::load()
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        loading::load_from_path(path)
    }

    pub fn get_config_path() -> Result<PathBuf> {
        loading::get_config_path()
    }

    pub fn update_threshold_meters(&self) -> f64 {
        self.update_threshold_meters
            .unwrap_or(DEFAULT_UPDATE_THRESHOLD_METERS)
    }

    pub fn walking_speed_kmh(&self) -> f64 {
        self.walking_speed_kmh.unwrap_or(DEFAULT_WALKING_SPEED_KMH)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs.unwrap_or(DEFAULT_DEDUP_WINDOW_SECS))
    }

    pub fn default_snooze_minutes(&self) -> u32 {
        self.default_snooze_minutes
            .unwrap_or(DEFAULT_SNOOZE_MINUTES)
    }

    pub fn suppression_retention_days(&self) -> u32 {
        self.suppression_retention_days
            .unwrap_or(DEFAULT_SUPPRESSION_RETENTION_DAYS)
    }

    pub fn bridge_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.bridge_max_attempts
                .unwrap_or(DEFAULT_BRIDGE_MAX_ATTEMPTS),
            Duration::from_millis(self.bridge_backoff_ms.unwrap_or(DEFAULT_BRIDGE_BACKOFF_MS)),
        )
    }

    /// Parsed timezone, `None` when the host zone should be used.
    pub fn timezone(&self) -> Result<Option<Tz>> {
        self.timezone
            .as_deref()
            .map(|name| {
                name.parse::<Tz>()
                    .map_err(|e| anyhow::anyhow!("{e}"))
                    .with_context(|| format!("Unknown timezone '{name}'"))
            })
            .transpose()
    }

    pub fn location_cadence(&self) -> LocationCadence {
        let interval = self
            .location_interval_secs
            .unwrap_or(DEFAULT_LOCATION_INTERVAL_SECS);
        // The fastest interval never exceeds the preferred one
        let fastest = self
            .location_fastest_interval_secs
            .unwrap_or(DEFAULT_LOCATION_FASTEST_INTERVAL_SECS.min(interval));
        LocationCadence {
            interval: Duration::from_secs(interval),
            fastest_interval: Duration::from_secs(fastest),
            min_distance_meters: self
                .location_min_distance_meters
                .unwrap_or(DEFAULT_LOCATION_MIN_DISTANCE_METERS),
        }
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            dedup_window: self.dedup_window(),
            update_threshold_meters: self.update_threshold_meters(),
            walking_speed_kmh: self.walking_speed_kmh(),
            default_snooze_minutes: self.default_snooze_minutes(),
            timezone: self.timezone()?,
        })
    }

    /// Alarms declared in the file.
    pub fn alarm_definitions(&self) -> Vec<AlarmDefinition> {
        self.alarms
            .iter()
            .flatten()
            .map(AlarmConfig::to_definition)
            .collect()
    }

    /// Print the effective configuration.
    pub fn log_config(&self, path: Option<&Path>) {
        if let Some(path) = path {
            log_block_start!("Loaded configuration from {}", path.display());
        } else {
            log_block_start!("Using default configuration");
        }
        log_indented!(
            "Live card: re-render after {} m, ETA at {} km/h",
            self.update_threshold_meters(),
            self.walking_speed_kmh()
        );
        log_indented!(
            "Events: {}s dedup window, {} min default snooze",
            self.dedup_window().as_secs(),
            self.default_snooze_minutes()
        );
        log_indented!(
            "Suppression: kept {} days, timezone {}",
            self.suppression_retention_days(),
            self.timezone.as_deref().unwrap_or("host local")
        );
        let policy = self.bridge_policy();
        log_indented!(
            "UI bridge: {} attempt(s), {} ms backoff",
            policy.max_attempts,
            policy.backoff.as_millis()
        );
        let cadence = self.location_cadence();
        log_indented!(
            "Location sampler: every {}s (fastest {}s), {} m minimum movement",
            cadence.interval.as_secs(),
            cadence.fastest_interval.as_secs(),
            cadence.min_distance_meters
        );
    }
}
