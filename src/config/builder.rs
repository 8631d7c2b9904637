//! Default configuration file generation.
//!
//! The default file is produced with a small builder that keeps the trailing
//! comments aligned, so the output stays tidy when constants change.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::constants::*;

/// Write a commented default `geoalarm.toml` to `path`.
///
/// Parent directories are created as needed. The alarm list is left empty;
/// an example block is included as comments.
pub fn create_default_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    fs::write(path, default_config_content())
        .with_context(|| format!("Failed to write default config to {}", path.display()))?;

    Ok(())
}

/// Contents of the default configuration file.
pub fn default_config_content() -> String {
    let content = ConfigBuilder::new()
        .add_section("Distance tracking")
        .add_setting(
            "update_threshold_meters",
            &format!("{DEFAULT_UPDATE_THRESHOLD_METERS:.1}"),
            &format!(
                "Re-render the live card after this much movement ({MINIMUM_UPDATE_THRESHOLD_METERS}-{MAXIMUM_UPDATE_THRESHOLD_METERS}) meters"
            ),
        )
        .add_setting(
            "walking_speed_kmh",
            &format!("{DEFAULT_WALKING_SPEED_KMH:.1}"),
            &format!(
                "Assumed speed for the ETA ({MINIMUM_WALKING_SPEED_KMH}-{MAXIMUM_WALKING_SPEED_KMH}) km/h"
            ),
        )
        .add_section("Events")
        .add_setting(
            "dedup_window_secs",
            &DEFAULT_DEDUP_WINDOW_SECS.to_string(),
            &format!(
                "Collapse repeated region/timer events (0-{MAXIMUM_DEDUP_WINDOW_SECS}) seconds | 0 = off"
            ),
        )
        .add_section("Snooze")
        .add_setting(
            "default_snooze_minutes",
            &DEFAULT_SNOOZE_MINUTES.to_string(),
            &format!(
                "Snooze length when none is given ({MINIMUM_SNOOZE_MINUTES}-{MAXIMUM_SNOOZE_MINUTES}) minutes"
            ),
        )
        .add_section("Suppression")
        .add_setting(
            "suppression_retention_days",
            &DEFAULT_SUPPRESSION_RETENTION_DAYS.to_string(),
            &format!(
                "Keep \"hidden today\" records this long ({MINIMUM_SUPPRESSION_RETENTION_DAYS}-{MAXIMUM_SUPPRESSION_RETENTION_DAYS}) days"
            ),
        )
        .add_commented_setting(
            "timezone",
            "\"Asia/Bangkok\"",
            "Calendar for \"today\"; host timezone when unset",
        )
        .add_section("UI bridge")
        .add_setting(
            "bridge_max_attempts",
            &DEFAULT_BRIDGE_MAX_ATTEMPTS.to_string(),
            &format!(
                "Delivery attempts before giving up ({MINIMUM_BRIDGE_MAX_ATTEMPTS}-{MAXIMUM_BRIDGE_MAX_ATTEMPTS})"
            ),
        )
        .add_setting(
            "bridge_backoff_ms",
            &DEFAULT_BRIDGE_BACKOFF_MS.to_string(),
            &format!(
                "Attempt n waits n x backoff ({MINIMUM_BRIDGE_BACKOFF_MS}-{MAXIMUM_BRIDGE_BACKOFF_MS}) ms"
            ),
        )
        .add_section("Location sampler")
        .add_setting(
            "location_interval_secs",
            &DEFAULT_LOCATION_INTERVAL_SECS.to_string(),
            &format!(
                "Preferred sample interval ({MINIMUM_LOCATION_INTERVAL_SECS}-{MAXIMUM_LOCATION_INTERVAL_SECS}) seconds"
            ),
        )
        .add_setting(
            "location_fastest_interval_secs",
            &DEFAULT_LOCATION_FASTEST_INTERVAL_SECS.to_string(),
            "Fastest accepted sample interval, at most location_interval_secs",
        )
        .add_setting(
            "location_min_distance_meters",
            &format!("{DEFAULT_LOCATION_MIN_DISTANCE_METERS:.1}"),
            &format!(
                "Minimum movement between samples (0-{MAXIMUM_LOCATION_MIN_DISTANCE_METERS}) meters"
            ),
        )
        .add_section("Alarms")
        .add_comment("[[alarms]]")
        .add_comment("id = \"home\"")
        .add_comment("label = \"Home\"")
        .add_comment("latitude = 13.7563")
        .add_comment("longitude = 100.5018")
        .add_comment("radius = 150.0")
        .add_comment("recurring = true")
        .build();

    format!("{content}\n")
}

/// Builds a configuration file with aligned trailing comments.
struct ConfigBuilder {
    entries: Vec<ConfigEntry>,
}

#[derive(Clone)]
struct ConfigEntry {
    content: String,
    entry_type: EntryType,
}

#[derive(Clone)]
enum EntryType {
    Section,
    Setting { line: String, comment: String },
    Comment,
}

impl ConfigBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn add_section(mut self, title: &str) -> Self {
        self.entries.push(ConfigEntry {
            content: format!("#[{title}]"),
            entry_type: EntryType::Section,
        });
        self
    }

    fn add_setting(mut self, key: &str, value: &str, comment: &str) -> Self {
        let line = format!("{key} = {value}");
        self.entries.push(ConfigEntry {
            content: line.clone(),
            entry_type: EntryType::Setting {
                line,
                comment: format!("# {comment}"),
            },
        });
        self
    }

    /// A setting that is present but disabled.
    fn add_commented_setting(self, key: &str, value: &str, comment: &str) -> Self {
        self.add_setting(&format!("# {key}"), value, comment)
    }

    fn add_comment(mut self, text: &str) -> Self {
        self.entries.push(ConfigEntry {
            content: format!("# {text}"),
            entry_type: EntryType::Comment,
        });
        self
    }

    fn build(self) -> String {
        let max_width = self
            .entries
            .iter()
            .filter_map(|entry| match &entry.entry_type {
                EntryType::Setting { line, .. } => Some(line.len()),
                EntryType::Section | EntryType::Comment => None,
            })
            .max()
            .unwrap_or(0)
            + 1;

        let mut result = Vec::new();
        let mut first_section = true;

        for entry in self.entries {
            match entry.entry_type {
                EntryType::Section => {
                    if !first_section {
                        result.push(String::new());
                    }
                    result.push(entry.content);
                    first_section = false;
                }
                EntryType::Setting { line, comment } => {
                    let padding = " ".repeat(max_width - line.len());
                    result.push(format!("{line}{padding}{comment}"));
                }
                EntryType::Comment => result.push(entry.content),
            }
        }

        result.join("\n")
    }
}
