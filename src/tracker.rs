//! Distance-remaining tracking for armed alarms.
//!
//! The tracker holds the "active set": alarms that are armed and not hidden
//! for today. It is purely reactive. Each location sample recomputes the
//! great-circle distance to every active destination and yields a [`LiveCard`]
//! only for alarms whose distance moved by more than the update threshold
//! since the last card was rendered.
//!
//! The tracker never changes alarm state. Live-card actions go through the
//! engine.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::alarm::{AlarmDefinition, AlarmId, GeoPoint};
use crate::constants::EARTH_RADIUS_METERS;

/// Great-circle distance in meters using the haversine formula.
pub fn haversine_meters(a: GeoPoint, b: GeoPoint) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let dlat = (b.latitude - a.latitude).to_radians();
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Clamp rounding noise for antipodal points
    2.0 * EARTH_RADIUS_METERS * h.min(1.0).sqrt().asin()
}

/// Whole minutes needed to cover `distance_meters` at `speed_kmh`.
pub fn eta_minutes(distance_meters: f64, speed_kmh: f64) -> u64 {
    let meters_per_minute = speed_kmh * 1000.0 / 60.0;
    if meters_per_minute <= 0.0 || !distance_meters.is_finite() {
        return 0;
    }
    (distance_meters.max(0.0) / meters_per_minute).round() as u64
}

/// Render an ETA: `< 1 min`, `<n> min`, `<h>h` or `<h>h <m>m`.
pub fn format_eta(minutes: u64) -> String {
    match minutes {
        0 => "< 1 min".to_string(),
        1..=59 => format!("{minutes} min"),
        _ => {
            let hours = minutes / 60;
            let rest = minutes % 60;
            if rest == 0 {
                format!("{hours}h")
            } else {
                format!("{hours}h {rest}m")
            }
        }
    }
}

/// `"<n> m"` below one kilometer, kilometers with two decimals below ten and one above.
pub fn format_distance(meters: f64) -> String {
    let meters = meters.max(0.0);
    if meters.round() < 1000.0 {
        format!("{} m", meters.round() as u64)
    } else if meters < 10_000.0 {
        format!("{:.2} km", meters / 1000.0)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

/// Distance-remaining card for one active alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveCard {
    pub alarm_id: AlarmId,
    pub label: String,
    pub distance_meters: f64,
    pub distance_text: String,
    pub radius_text: String,
    pub eta: String,
}

#[derive(Debug, Clone)]
struct ActiveEntry {
    definition: AlarmDefinition,
    last_distance_meters: Option<f64>,
}

pub struct DistanceTracker {
    update_threshold_meters: f64,
    walking_speed_kmh: f64,
    active: RwLock<HashMap<AlarmId, ActiveEntry>>,
}

impl DistanceTracker {
    pub fn new(update_threshold_meters: f64, walking_speed_kmh: f64) -> Self {
        Self {
            update_threshold_meters,
            walking_speed_kmh,
            active: RwLock::new(HashMap::new()),
        }
    }

    /// Add or refresh an alarm in the active set, keeping its last distance.
    pub fn upsert(&self, definition: &AlarmDefinition) {
        let mut active = self.write();
        active
            .entry(definition.id.clone())
            .and_modify(|entry| entry.definition = definition.clone())
            .or_insert_with(|| ActiveEntry {
                definition: definition.clone(),
                last_distance_meters: None,
            });
    }

    /// Remove an alarm from the active set. Returns whether it was present.
    pub fn remove(&self, alarm_id: &AlarmId) -> bool {
        self.write().remove(alarm_id).is_some()
    }

    pub fn is_active(&self, alarm_id: &AlarmId) -> bool {
        self.read().contains_key(alarm_id)
    }

    pub fn active_ids(&self) -> Vec<AlarmId> {
        let mut ids: Vec<AlarmId> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn last_distance(&self, alarm_id: &AlarmId) -> Option<f64> {
        self.read()
            .get(alarm_id)
            .and_then(|entry| entry.last_distance_meters)
    }

    /// Process a location sample; returns the cards that need re-rendering.
    pub fn on_sample(&self, position: GeoPoint) -> Vec<LiveCard> {
        if !position.is_valid() {
            log_warning!(
                "Ignoring location sample with invalid coordinates ({}, {})",
                position.latitude,
                position.longitude
            );
            return Vec::new();
        }

        let mut cards = Vec::new();
        let mut active = self.write();

        for entry in active.values_mut() {
            let distance = haversine_meters(position, entry.definition.location);

            let significant = match entry.last_distance_meters {
                None => true,
                Some(last) => (distance - last).abs() > self.update_threshold_meters,
            };
            if !significant {
                continue;
            }

            entry.last_distance_meters = Some(distance);
            cards.push(self.render(&entry.definition, distance));
        }

        cards.sort_by(|a, b| a.alarm_id.cmp(&b.alarm_id));
        cards
    }

    fn render(&self, definition: &AlarmDefinition, distance: f64) -> LiveCard {
        LiveCard {
            alarm_id: definition.id.clone(),
            label: definition.label.clone(),
            distance_meters: distance,
            distance_text: format_distance(distance),
            radius_text: format_distance(definition.radius_meters),
            eta: format_eta(eta_minutes(distance, self.walking_speed_kmh)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<AlarmId, ActiveEntry>> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<AlarmId, ActiveEntry>> {
        self.active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::test_constants::*;
    use crate::constants::{DEFAULT_UPDATE_THRESHOLD_METERS, DEFAULT_WALKING_SPEED_KMH};

    fn destination() -> AlarmDefinition {
        AlarmDefinition {
            id: AlarmId::from("A1"),
            label: "Home".into(),
            location: GeoPoint::new(BANGKOK_LAT, BANGKOK_LON),
            radius_meters: TEST_RADIUS,
            recurring: false,
        }
    }

    /// A point `meters` due north of the test destination.
    fn north_of_destination(meters: f64) -> GeoPoint {
        let dlat = (meters / EARTH_RADIUS_METERS).to_degrees();
        GeoPoint::new(BANGKOK_LAT + dlat, BANGKOK_LON)
    }

    fn tracker() -> DistanceTracker {
        DistanceTracker::new(DEFAULT_UPDATE_THRESHOLD_METERS, DEFAULT_WALKING_SPEED_KMH)
    }

    #[test]
    fn test_eta_formatting() {
        assert_eq!(format_eta(0), "< 1 min");
        assert_eq!(format_eta(5), "5 min");
        assert_eq!(format_eta(59), "59 min");
        assert_eq!(format_eta(60), "1h");
        assert_eq!(format_eta(135), "2h 15m");
    }

    #[test]
    fn test_eta_for_416_meters_is_five_minutes() {
        assert_eq!(format_eta(eta_minutes(416.0, 5.0)), "5 min");
        assert_eq!(format_eta(eta_minutes(20.0, 5.0)), "< 1 min");
    }

    #[test]
    fn test_distance_formatting() {
        assert_eq!(format_distance(150.0), "150 m");
        assert_eq!(format_distance(999.4), "999 m");
        assert_eq!(format_distance(1234.0), "1.23 km");
        assert_eq!(format_distance(12_345.0), "12.3 km");
    }

    #[test]
    fn test_haversine_known_distance() {
        let d = haversine_meters(
            GeoPoint::new(BANGKOK_LAT, BANGKOK_LON),
            north_of_destination(1000.0),
        );
        assert!((d - 1000.0).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_first_sample_always_renders() {
        let tracker = tracker();
        tracker.upsert(&destination());
        let cards = tracker.on_sample(north_of_destination(650.0));
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].distance_text, "650 m");
        assert_eq!(cards[0].radius_text, "150 m");
    }

    #[test]
    fn test_threshold_suppresses_small_changes() {
        let tracker = tracker();
        tracker.upsert(&destination());

        assert_eq!(tracker.on_sample(north_of_destination(650.0)).len(), 1);
        assert!(tracker.on_sample(north_of_destination(700.0)).is_empty());

        let cards = tracker.on_sample(north_of_destination(400.0));
        assert_eq!(cards.len(), 1);
        assert!((tracker.last_distance(&AlarmId::from("A1")).unwrap() - 400.0).abs() < 0.5);
    }

    #[test]
    fn test_removed_alarm_is_not_rendered() {
        let tracker = tracker();
        tracker.upsert(&destination());
        assert!(tracker.remove(&AlarmId::from("A1")));
        assert!(!tracker.remove(&AlarmId::from("A1")));
        assert!(tracker.on_sample(north_of_destination(650.0)).is_empty());
    }

    #[test]
    fn test_invalid_sample_is_ignored() {
        let tracker = tracker();
        tracker.upsert(&destination());
        assert!(tracker.on_sample(GeoPoint::new(f64::NAN, 0.0)).is_empty());
        assert_eq!(tracker.last_distance(&AlarmId::from("A1")), None);
    }
}
