//! Turns raw region and timer callbacks into canonical trigger events.
//!
//! Region monitors are not exactly-once: the same enter callback may arrive
//! several times, sometimes late. [`EventNormalizer::normalize`] collapses
//! deliveries for the same `(alarm, source)` that land inside the dedup window
//! and drops anything it cannot parse. It never returns an error.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::alarm::AlarmId;
use crate::constants::REGION_REQUEST_PREFIX;
use crate::time_source::from_millis;

/// Callback as delivered by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawEvent {
    /// Region monitor reported entry into the region registered as `request_id`.
    RegionEnter {
        request_id: String,
        timestamp_ms: Option<i64>,
    },
    /// Wake timer registered under `key` went off.
    TimerFired {
        key: String,
        timestamp_ms: Option<i64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerSource {
    GeofenceEnter,
    SnoozeTimer,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::GeofenceEnter => "geofence-enter",
            TriggerSource::SnoozeTimer => "snooze-timer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub alarm_id: AlarmId,
    pub source: TriggerSource,
    pub timestamp: DateTime<Utc>,
}

/// Request id under which an alarm's region is registered.
pub fn region_request_id(alarm_id: &AlarmId) -> String {
    format!("{REGION_REQUEST_PREFIX}{alarm_id}")
}

/// Extract the alarm id from a region request id, `None` if malformed.
pub fn parse_region_request_id(request_id: &str) -> Option<AlarmId> {
    let id = request_id.strip_prefix(REGION_REQUEST_PREFIX)?;
    if id.trim().is_empty() {
        return None;
    }
    Some(AlarmId::from(id))
}

pub struct EventNormalizer {
    window: ChronoDuration,
    last_seen: Mutex<HashMap<(AlarmId, TriggerSource), DateTime<Utc>>>,
}

impl EventNormalizer {
    /// A zero window disables deduplication.
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: ChronoDuration::from_std(window).unwrap_or(ChronoDuration::zero()),
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Normalize `raw`, stamping it with `now` if it carries no timestamp.
    pub fn normalize(&self, raw: RawEvent, now: DateTime<Utc>) -> Option<TriggerEvent> {
        let (alarm_id, source, timestamp_ms) = match raw {
            RawEvent::RegionEnter {
                request_id,
                timestamp_ms,
            } => match parse_region_request_id(&request_id) {
                Some(id) => (id, TriggerSource::GeofenceEnter, timestamp_ms),
                None => {
                    log_warning!("Dropping region event with malformed request id '{request_id}'");
                    return None;
                }
            },
            RawEvent::TimerFired { key, timestamp_ms } => {
                if key.trim().is_empty() {
                    log_warning!("Dropping timer event with an empty key");
                    return None;
                }
                (AlarmId::from(key), TriggerSource::SnoozeTimer, timestamp_ms)
            }
        };

        let timestamp = match timestamp_ms {
            None => now,
            Some(ms) => match from_millis(ms) {
                Some(timestamp) => timestamp,
                None => {
                    log_warning!(
                        "Dropping {} for alarm '{alarm_id}' with out-of-range timestamp {ms}",
                        source.as_str()
                    );
                    return None;
                }
            },
        };

        if self.is_duplicate(&alarm_id, source, timestamp) {
            log_debug!(
                "Duplicate {} for alarm '{alarm_id}' collapsed",
                source.as_str()
            );
            return None;
        }

        Some(TriggerEvent {
            alarm_id,
            source,
            timestamp,
        })
    }

    /// Drop dedup bookkeeping for a deleted alarm.
    pub fn forget(&self, alarm_id: &AlarmId) {
        self.lock().retain(|(id, _), _| id != alarm_id);
    }

    fn is_duplicate(&self, alarm_id: &AlarmId, source: TriggerSource, at: DateTime<Utc>) -> bool {
        let mut last_seen = self.lock();
        let key = (alarm_id.clone(), source);

        if let Some(previous) = last_seen.get(&key)
            && (at - *previous).abs() < self.window
        {
            return true;
        }

        last_seen.insert(key, at);
        false
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(AlarmId, TriggerSource), DateTime<Utc>>> {
        self.last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn enter(ms: Option<i64>) -> RawEvent {
        RawEvent::RegionEnter {
            request_id: "alarm_A1".into(),
            timestamp_ms: ms,
        }
    }

    #[test]
    fn test_parses_region_request_id() {
        assert_eq!(parse_region_request_id("alarm_A1"), Some(AlarmId::from("A1")));
        assert_eq!(parse_region_request_id("alarm_"), None);
        assert_eq!(parse_region_request_id("geofence_A1"), None);
        assert_eq!(region_request_id(&AlarmId::from("A1")), "alarm_A1");
    }

    #[test]
    fn test_duplicate_inside_window_is_collapsed() {
        let normalizer = EventNormalizer::new(Duration::from_secs(2));
        let base = now().timestamp_millis();

        assert!(normalizer.normalize(enter(Some(base)), now()).is_some());
        assert!(normalizer.normalize(enter(Some(base)), now()).is_none());
        assert!(normalizer.normalize(enter(Some(base + 1_500)), now()).is_none());
        assert!(normalizer.normalize(enter(Some(base + 2_000)), now()).is_some());
    }

    #[test]
    fn test_sources_deduplicate_independently() {
        let normalizer = EventNormalizer::new(Duration::from_secs(2));
        let base = now().timestamp_millis();

        assert!(normalizer.normalize(enter(Some(base)), now()).is_some());
        let timer = RawEvent::TimerFired {
            key: "A1".into(),
            timestamp_ms: Some(base),
        };
        let event = normalizer.normalize(timer, now()).unwrap();
        assert_eq!(event.source, TriggerSource::SnoozeTimer);
        assert_eq!(event.alarm_id, AlarmId::from("A1"));
    }

    #[test]
    fn test_missing_timestamp_uses_now() {
        let normalizer = EventNormalizer::new(Duration::from_secs(2));
        let event = normalizer.normalize(enter(None), now()).unwrap();
        assert_eq!(event.timestamp, now());
    }

    #[test]
    fn test_malformed_input_is_dropped() {
        let normalizer = EventNormalizer::new(Duration::from_secs(2));
        let bad = RawEvent::RegionEnter {
            request_id: "nonsense".into(),
            timestamp_ms: None,
        };
        assert!(normalizer.normalize(bad, now()).is_none());
        let empty = RawEvent::TimerFired {
            key: String::new(),
            timestamp_ms: None,
        };
        assert!(normalizer.normalize(empty, now()).is_none());
    }

    #[test]
    fn test_out_of_range_timestamps_are_dropped() {
        let normalizer = EventNormalizer::new(Duration::from_secs(2));
        for ms in [i64::MAX, i64::MIN] {
            assert!(normalizer.normalize(enter(Some(ms)), now()).is_none());
            let timer = RawEvent::TimerFired {
                key: "A1".into(),
                timestamp_ms: Some(ms),
            };
            assert!(normalizer.normalize(timer, now()).is_none());
        }

        // A dropped event leaves no dedup record behind
        assert!(normalizer.normalize(enter(None), now()).is_some());
    }

    #[test]
    fn test_zero_window_disables_dedup() {
        let normalizer = EventNormalizer::new(Duration::ZERO);
        assert!(normalizer.normalize(enter(None), now()).is_some());
        assert!(normalizer.normalize(enter(None), now()).is_some());
    }

    #[test]
    fn test_forget_resets_window() {
        let normalizer = EventNormalizer::new(Duration::from_secs(2));
        assert!(normalizer.normalize(enter(None), now()).is_some());
        normalizer.forget(&AlarmId::from("A1"));
        assert!(normalizer.normalize(enter(None), now()).is_some());
    }
}
