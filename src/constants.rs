//! Application-wide constants and defaults.
//!
//! Defaults are applied when the corresponding configuration field is absent.
//! The MINIMUM/MAXIMUM pairs are the hard limits enforced by config validation.

// # Distance tracking
pub const DEFAULT_UPDATE_THRESHOLD_METERS: f64 = 200.0;
pub const MINIMUM_UPDATE_THRESHOLD_METERS: f64 = 1.0;
pub const MAXIMUM_UPDATE_THRESHOLD_METERS: f64 = 10_000.0;

pub const DEFAULT_WALKING_SPEED_KMH: f64 = 5.0;
pub const MINIMUM_WALKING_SPEED_KMH: f64 = 0.5;
pub const MAXIMUM_WALKING_SPEED_KMH: f64 = 200.0;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

// # Event normalization
pub const DEFAULT_DEDUP_WINDOW_SECS: u64 = 2;
pub const MAXIMUM_DEDUP_WINDOW_SECS: u64 = 60;

/// Prefix the region monitor puts in front of an alarm id.
pub const REGION_REQUEST_PREFIX: &str = "alarm_";

// # Snooze
pub const DEFAULT_SNOOZE_MINUTES: u32 = 5;
pub const MINIMUM_SNOOZE_MINUTES: u32 = 1;
pub const MAXIMUM_SNOOZE_MINUTES: u32 = 120;

/// A snooze timer firing earlier than this before its deadline belongs to an
/// older snooze and is ignored.
pub const SNOOZE_TIMER_SLACK_MILLIS: i64 = 1_000;

// # Suppression store
pub const DEFAULT_SUPPRESSION_RETENTION_DAYS: u32 = 7;
pub const MINIMUM_SUPPRESSION_RETENTION_DAYS: u32 = 1;
pub const MAXIMUM_SUPPRESSION_RETENTION_DAYS: u32 = 365;

/// Calendar date format of suppression day keys.
pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

// # UI bridge
pub const DEFAULT_BRIDGE_MAX_ATTEMPTS: u32 = 3;
pub const MINIMUM_BRIDGE_MAX_ATTEMPTS: u32 = 1;
pub const MAXIMUM_BRIDGE_MAX_ATTEMPTS: u32 = 10;

pub const DEFAULT_BRIDGE_BACKOFF_MS: u64 = 500;
pub const MINIMUM_BRIDGE_BACKOFF_MS: u64 = 10;
pub const MAXIMUM_BRIDGE_BACKOFF_MS: u64 = 60_000;

// # Location sampler cadence (handed to the sampler, never polled here)
pub const DEFAULT_LOCATION_INTERVAL_SECS: u64 = 45;
pub const MINIMUM_LOCATION_INTERVAL_SECS: u64 = 5;
pub const MAXIMUM_LOCATION_INTERVAL_SECS: u64 = 3_600;

pub const DEFAULT_LOCATION_FASTEST_INTERVAL_SECS: u64 = 30;
pub const MINIMUM_LOCATION_FASTEST_INTERVAL_SECS: u64 = 1;

pub const DEFAULT_LOCATION_MIN_DISTANCE_METERS: f64 = 200.0;
pub const MAXIMUM_LOCATION_MIN_DISTANCE_METERS: f64 = 10_000.0;

// # Notification ids
pub const ALERT_NOTIFICATION_BASE_ID: u32 = 1_000;
pub const LIVE_CARD_NOTIFICATION_BASE_ID: u32 = 3_000;

// # Process
pub const EXIT_FAILURE: i32 = 1;

pub const CONFIG_FILE_NAME: &str = "geoalarm.toml";
pub const SUPPRESSION_FILE_NAME: &str = "suppression.json";
pub const TIMERS_FILE_NAME: &str = "timers.json";
pub const LOCK_FILE_NAME: &str = "geoalarm.lock";

#[cfg(test)]
pub mod test_constants {
    pub const BANGKOK_LAT: f64 = 13.7563;
    pub const BANGKOK_LON: f64 = 100.5018;
    pub const TEST_RADIUS: f64 = 150.0;
}
