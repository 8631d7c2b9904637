//! Alarm model: identifiers, caller-supplied definitions and lifecycle state.
//!
//! An alarm is defined by the caller (`AlarmDefinition`) and owned at runtime by
//! the engine registry as an [`Alarm`], which adds the lifecycle [`AlarmState`]
//! and the date bookkeeping the day-rollover check needs.

pub mod machine;

use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque alarm identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlarmId(String);

impl AlarmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AlarmId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for AlarmId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A point on the Earth's surface in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Destination registered by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmDefinition {
    pub id: AlarmId,
    pub label: String,
    pub location: GeoPoint,
    pub radius_meters: f64,
    /// A recurring alarm only stays dismissed for the current local day.
    #[serde(default)]
    pub recurring: bool,
}

impl AlarmDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.id.as_str().trim().is_empty() {
            bail!("Alarm id must not be empty");
        }
        if !self.location.is_valid() {
            bail!(
                "Alarm '{}' has invalid coordinates ({}, {}). Latitude must be within -90..=90 and longitude within -180..=180",
                self.id,
                self.location.latitude,
                self.location.longitude
            );
        }
        if !self.radius_meters.is_finite() || self.radius_meters <= 0.0 {
            bail!(
                "Alarm '{}' has radius {} m; the radius must be greater than 0",
                self.id,
                self.radius_meters
            );
        }
        Ok(())
    }
}

/// Lifecycle state. `Snoozed` carries the re-trigger deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AlarmState {
    Armed,
    Triggered,
    Snoozed { until: DateTime<Utc> },
    Dismissed,
}

impl AlarmState {
    pub fn name(&self) -> &'static str {
        match self {
            AlarmState::Armed => "armed",
            AlarmState::Triggered => "triggered",
            AlarmState::Snoozed { .. } => "snoozed",
            AlarmState::Dismissed => "dismissed",
        }
    }

    pub fn snooze_until(&self) -> Option<DateTime<Utc>> {
        match self {
            AlarmState::Snoozed { until } => Some(*until),
            _ => None,
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Runtime record of a registered alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub definition: AlarmDefinition,
    pub state: AlarmState,
    /// Local date of the last dismissal, used to re-arm recurring alarms.
    pub dismissed_on: Option<NaiveDate>,
}

impl Alarm {
    pub fn armed(definition: AlarmDefinition) -> Self {
        Self {
            definition,
            state: AlarmState::Armed,
            dismissed_on: None,
        }
    }

    pub fn id(&self) -> &AlarmId {
        &self.definition.id
    }
}

/// Kind of message sent across the UI bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UiEventType {
    AlarmTriggered,
    AlarmSnoozed,
    AlarmDismissed,
    LivecardHidden,
    LivecardStopped,
}

impl UiEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UiEventType::AlarmTriggered => "ALARM_TRIGGERED",
            UiEventType::AlarmSnoozed => "ALARM_SNOOZED",
            UiEventType::AlarmDismissed => "ALARM_DISMISSED",
            UiEventType::LivecardHidden => "LIVECARD_HIDDEN",
            UiEventType::LivecardStopped => "LIVECARD_STOPPED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::test_constants::*;

    fn definition(radius: f64) -> AlarmDefinition {
        AlarmDefinition {
            id: AlarmId::from("A1"),
            label: "Home".into(),
            location: GeoPoint::new(BANGKOK_LAT, BANGKOK_LON),
            radius_meters: radius,
            recurring: false,
        }
    }

    #[test]
    fn test_valid_definition() {
        assert!(definition(TEST_RADIUS).validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_radius() {
        assert!(definition(0.0).validate().is_err());
        assert!(definition(-5.0).validate().is_err());
        assert!(definition(f64::NAN).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_coordinates_and_empty_id() {
        let mut def = definition(TEST_RADIUS);
        def.location = GeoPoint::new(91.0, 0.0);
        assert!(def.validate().is_err());

        let mut def = definition(TEST_RADIUS);
        def.id = AlarmId::from("  ");
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_ui_event_type_wire_names() {
        let json = serde_json::to_string(&UiEventType::LivecardHidden).unwrap();
        assert_eq!(json, "\"LIVECARD_HIDDEN\"");
        assert_eq!(UiEventType::AlarmSnoozed.as_str(), "ALARM_SNOOZED");
    }
}
