//! In-memory collaborators that record every call, plus a ready-wired engine.
//!
//! Compiled for unit tests and, through the `testing-support` feature, for the
//! integration tests under `tests/`.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::alarm::{AlarmId, GeoPoint, UiEventType};
use crate::collaborators::{
    AlertDevice, Collaborators, Headless, Notification, NotificationSurface, RegionMonitor,
    UiBridge, UiEvent, WakeTimer,
};
use crate::engine::{AlarmEngine, EngineSettings};
use crate::normalizer::RawEvent;
use crate::snooze::fired_event;
use crate::state::SuppressionStore;
use crate::time_source::ManualTimeSource;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct RecordingRegions {
    regions: Mutex<BTreeMap<String, (GeoPoint, f64)>>,
}

impl RecordingRegions {
    /// Registered request ids, sorted.
    pub fn registered(&self) -> Vec<String> {
        lock(&self.regions).keys().cloned().collect()
    }
}

impl RegionMonitor for RecordingRegions {
    fn register(&self, request_id: &str, center: GeoPoint, radius_meters: f64) -> Result<()> {
        lock(&self.regions).insert(request_id.to_string(), (center, radius_meters));
        Ok(())
    }

    fn unregister(&self, request_id: &str) -> Result<()> {
        lock(&self.regions).remove(request_id);
        Ok(())
    }
}

/// Keyed one-shot timer that only fires when asked to.
#[derive(Default)]
pub struct RecordingTimer {
    pending: Mutex<BTreeMap<String, i64>>,
    scheduled_total: AtomicUsize,
    refusing: AtomicBool,
}

impl RecordingTimer {
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn scheduled_total(&self) -> usize {
        self.scheduled_total.load(Ordering::SeqCst)
    }

    /// Reject every `schedule_once` as if the wake-up permission were revoked.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Remove every registration due at `now_millis` and return its callback.
    pub fn fire_due(&self, now_millis: i64) -> Vec<RawEvent> {
        let mut pending = lock(&self.pending);
        let due: Vec<String> = pending
            .iter()
            .filter(|(_, at)| **at <= now_millis)
            .map(|(key, _)| key.clone())
            .collect();
        due.iter()
            .map(|key| {
                pending.remove(key);
                fired_event(key, now_millis)
            })
            .collect()
    }
}

impl WakeTimer for RecordingTimer {
    fn schedule_once(&self, key: &str, at_millis: i64) -> Result<()> {
        if self.refusing.load(Ordering::SeqCst) {
            bail!("exact alarm permission revoked");
        }
        lock(&self.pending).insert(key.to_string(), at_millis);
        self.scheduled_total.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(&self, key: &str) -> Result<()> {
        lock(&self.pending).remove(key);
        Ok(())
    }

    fn pending_at(&self, key: &str) -> Option<i64> {
        lock(&self.pending).get(key).copied()
    }
}

#[derive(Default)]
pub struct RecordingAlert {
    playing: Mutex<Option<AlarmId>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_next_start: AtomicBool,
}

impl RecordingAlert {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn playing(&self) -> Option<AlarmId> {
        lock(&self.playing).clone()
    }

    /// Make the next `start_alert` fail as if audio focus were denied.
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }
}

impl AlertDevice for RecordingAlert {
    fn start_alert(&self, alarm_id: &AlarmId) -> Result<()> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            bail!("audio focus denied");
        }
        *lock(&self.playing) = Some(alarm_id.clone());
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_alert(&self) -> Result<()> {
        *lock(&self.playing) = None;
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingNotifications {
    visible: Mutex<BTreeMap<u32, Notification>>,
}

impl RecordingNotifications {
    pub fn visible_count(&self) -> usize {
        lock(&self.visible).len()
    }

    pub fn visible(&self) -> Vec<Notification> {
        lock(&self.visible).values().cloned().collect()
    }
}

impl NotificationSurface for RecordingNotifications {
    fn show(&self, notification: &Notification) -> Result<()> {
        lock(&self.visible).insert(notification.id, notification.clone());
        Ok(())
    }

    fn cancel(&self, id: u32) -> Result<()> {
        lock(&self.visible).remove(&id);
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        lock(&self.visible).clear();
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBridge {
    events: Mutex<Vec<UiEvent>>,
}

impl RecordingBridge {
    pub fn events(&self) -> Vec<UiEvent> {
        lock(&self.events).clone()
    }

    pub fn events_of(&self, event_type: UiEventType) -> usize {
        lock(&self.events)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

impl UiBridge for RecordingBridge {
    fn deliver(&self, event: &UiEvent) -> Result<()> {
        lock(&self.events).push(event.clone());
        Ok(())
    }
}

/// An engine on a manual clock with every collaborator recorded.
///
/// Calendar dates are taken in UTC so day rollovers are deterministic.
pub struct TestRig {
    pub engine: AlarmEngine,
    pub clock: Arc<ManualTimeSource>,
    pub timer: Arc<RecordingTimer>,
    pub regions: Arc<RecordingRegions>,
    pub alert: Arc<RecordingAlert>,
    pub notifications: Arc<RecordingNotifications>,
    pub bridge: Arc<RecordingBridge>,
}

impl TestRig {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::build(
            Arc::new(ManualTimeSource::new(start)),
            Arc::new(RecordingTimer::default()),
        )
    }

    /// A fresh engine that shares only the clock and the durable timer.
    pub fn restart(&self) -> Self {
        Self::build(Arc::clone(&self.clock), Arc::clone(&self.timer))
    }

    fn build(clock: Arc<ManualTimeSource>, timer: Arc<RecordingTimer>) -> Self {
        let regions = Arc::new(RecordingRegions::default());
        let alert = Arc::new(RecordingAlert::default());
        let notifications = Arc::new(RecordingNotifications::default());
        let bridge = Arc::new(RecordingBridge::default());

        let collaborators = Collaborators {
            regions: regions.clone(),
            timer: timer.clone(),
            alert: alert.clone(),
            notifications: notifications.clone(),
            bridge: bridge.clone(),
            presence: Arc::new(Headless),
        };
        let settings = EngineSettings {
            timezone: Some(chrono_tz::UTC),
            ..EngineSettings::default()
        };
        let engine = AlarmEngine::new(
            settings,
            collaborators,
            SuppressionStore::in_memory(Some(chrono_tz::UTC)),
            clock.clone(),
        );

        Self {
            engine,
            clock,
            timer,
            regions,
            alert,
            notifications,
            bridge,
        }
    }
}
