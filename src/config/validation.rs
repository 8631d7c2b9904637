//! Configuration validation.
//!
//! Every numeric field has a hard range; alarms declared in the file must be
//! valid definitions with unique ids.

use anyhow::{Result, bail};
use std::collections::HashSet;

use super::Config;
use crate::constants::*;

pub fn validate_config(config: &Config) -> Result<()> {
    if let Some(threshold) = config.update_threshold_meters
        && !(MINIMUM_UPDATE_THRESHOLD_METERS..=MAXIMUM_UPDATE_THRESHOLD_METERS).contains(&threshold)
    {
        bail!(
            "update_threshold_meters ({}) must be between {} and {} meters",
            threshold,
            MINIMUM_UPDATE_THRESHOLD_METERS,
            MAXIMUM_UPDATE_THRESHOLD_METERS
        );
    }

    if let Some(speed) = config.walking_speed_kmh
        && !(MINIMUM_WALKING_SPEED_KMH..=MAXIMUM_WALKING_SPEED_KMH).contains(&speed)
    {
        bail!(
            "walking_speed_kmh ({}) must be between {} and {} km/h",
            speed,
            MINIMUM_WALKING_SPEED_KMH,
            MAXIMUM_WALKING_SPEED_KMH
        );
    }

    if let Some(window) = config.dedup_window_secs
        && window > MAXIMUM_DEDUP_WINDOW_SECS
    {
        bail!(
            "dedup_window_secs ({}) must be between 0 and {} seconds",
            window,
            MAXIMUM_DEDUP_WINDOW_SECS
        );
    }

    if let Some(minutes) = config.default_snooze_minutes
        && !(MINIMUM_SNOOZE_MINUTES..=MAXIMUM_SNOOZE_MINUTES).contains(&minutes)
    {
        bail!(
            "default_snooze_minutes ({}) must be between {} and {} minutes",
            minutes,
            MINIMUM_SNOOZE_MINUTES,
            MAXIMUM_SNOOZE_MINUTES
        );
    }

    if let Some(days) = config.suppression_retention_days
        && !(MINIMUM_SUPPRESSION_RETENTION_DAYS..=MAXIMUM_SUPPRESSION_RETENTION_DAYS)
            .contains(&days)
    {
        bail!(
            "suppression_retention_days ({}) must be between {} and {} days",
            days,
            MINIMUM_SUPPRESSION_RETENTION_DAYS,
            MAXIMUM_SUPPRESSION_RETENTION_DAYS
        );
    }

    if let Some(attempts) = config.bridge_max_attempts
        && !(MINIMUM_BRIDGE_MAX_ATTEMPTS..=MAXIMUM_BRIDGE_MAX_ATTEMPTS).contains(&attempts)
    {
        bail!(
            "bridge_max_attempts ({}) must be between {} and {}",
            attempts,
            MINIMUM_BRIDGE_MAX_ATTEMPTS,
            MAXIMUM_BRIDGE_MAX_ATTEMPTS
        );
    }

    if let Some(backoff) = config.bridge_backoff_ms
        && !(MINIMUM_BRIDGE_BACKOFF_MS..=MAXIMUM_BRIDGE_BACKOFF_MS).contains(&backoff)
    {
        bail!(
            "bridge_backoff_ms ({}) must be between {} and {} milliseconds",
            backoff,
            MINIMUM_BRIDGE_BACKOFF_MS,
            MAXIMUM_BRIDGE_BACKOFF_MS
        );
    }

    config.timezone()?;

    validate_location_cadence(config)?;
    validate_alarms(config)?;

    Ok(())
}

fn validate_location_cadence(config: &Config) -> Result<()> {
    let interval = config
        .location_interval_secs
        .unwrap_or(DEFAULT_LOCATION_INTERVAL_SECS);
    if !(MINIMUM_LOCATION_INTERVAL_SECS..=MAXIMUM_LOCATION_INTERVAL_SECS).contains(&interval) {
        bail!(
            "location_interval_secs ({}) must be between {} and {} seconds",
            interval,
            MINIMUM_LOCATION_INTERVAL_SECS,
            MAXIMUM_LOCATION_INTERVAL_SECS
        );
    }

    let fastest = config
        .location_fastest_interval_secs
        .unwrap_or(DEFAULT_LOCATION_FASTEST_INTERVAL_SECS.min(interval));
    if !(MINIMUM_LOCATION_FASTEST_INTERVAL_SECS..=interval).contains(&fastest) {
        bail!(
            "location_fastest_interval_secs ({}) must be between {} and location_interval_secs ({})",
            fastest,
            MINIMUM_LOCATION_FASTEST_INTERVAL_SECS,
            interval
        );
    }

    if let Some(distance) = config.location_min_distance_meters
        && !(0.0..=MAXIMUM_LOCATION_MIN_DISTANCE_METERS).contains(&distance)
    {
        bail!(
            "location_min_distance_meters ({}) must be between 0 and {} meters",
            distance,
            MAXIMUM_LOCATION_MIN_DISTANCE_METERS
        );
    }

    Ok(())
}

fn validate_alarms(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();
    for alarm in config.alarms.iter().flatten() {
        alarm.to_definition().validate()?;
        if !seen.insert(alarm.id.as_str()) {
            bail!("Alarm id '{}' is declared more than once", alarm.id);
        }
    }
    Ok(())
}
