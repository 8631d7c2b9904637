//! Contracts of the external services the engine drives.
//!
//! Everything platform-specific sits behind one of these traits: geofence
//! registration, the wake-capable timer, the audio/vibration alert, the
//! notification shade and the bridge to the UI process. The engine treats
//! every call as fire-and-forget; an `Err` is logged by the dispatcher and
//! never rolls back a committed transition.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alarm::{AlarmId, GeoPoint, UiEventType};

/// Platform geofencing. Enter events come back as raw region events.
#[cfg_attr(test, mockall::automock)]
pub trait RegionMonitor: Send + Sync {
    fn register(&self, request_id: &str, center: GeoPoint, radius_meters: f64) -> Result<()>;
    fn unregister(&self, request_id: &str) -> Result<()>;
}

/// One-shot timer that fires even while the device idles.
///
/// Registrations are keyed: scheduling an existing key replaces it.
#[cfg_attr(test, mockall::automock)]
pub trait WakeTimer: Send + Sync {
    fn schedule_once(&self, key: &str, at_millis: i64) -> Result<()>;
    fn cancel(&self, key: &str) -> Result<()>;

    /// Fire time of a registration that is still pending, if the platform can tell.
    fn pending_at(&self, _key: &str) -> Option<i64> {
        None
    }
}

/// Audible and vibration feedback.
#[cfg_attr(test, mockall::automock)]
pub trait AlertDevice: Send + Sync {
    fn start_alert(&self, alarm_id: &AlarmId) -> Result<()>;
    fn stop_alert(&self) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
}

/// Involuntary interruption reported by the alert device (audio focus changes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertInterruption {
    TransientLoss,
    Regained,
    PermanentLoss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    Snooze,
    Dismiss,
    HideToday,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: u32,
    pub title: String,
    pub body: String,
    pub actions: Vec<NotificationAction>,
}

#[cfg_attr(test, mockall::automock)]
pub trait NotificationSurface: Send + Sync {
    fn show(&self, notification: &Notification) -> Result<()>;
    fn cancel(&self, id: u32) -> Result<()>;
    fn cancel_all(&self) -> Result<()>;
}

/// Message delivered to the UI layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UiEvent {
    pub event_type: UiEventType,
    pub alarm_id: AlarmId,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snooze_minutes: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_time: Option<i64>,
    /// Whether the UI was in the foreground when the event was dispatched.
    pub foreground: bool,
}

/// One-way, best-effort channel to the UI layer.
#[cfg_attr(test, mockall::automock)]
pub trait UiBridge: Send + Sync {
    fn deliver(&self, event: &UiEvent) -> Result<()>;
}

/// Answers whether the UI is currently in the foreground.
#[cfg_attr(test, mockall::automock)]
pub trait Presence: Send + Sync {
    fn is_foreground(&self) -> bool;
}

/// Presence for hosts without a foreground UI.
pub struct Headless;

impl Presence for Headless {
    fn is_foreground(&self) -> bool {
        false
    }
}

/// The full set of services an engine is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub regions: Arc<dyn RegionMonitor>,
    pub timer: Arc<dyn WakeTimer>,
    pub alert: Arc<dyn AlertDevice>,
    pub notifications: Arc<dyn NotificationSurface>,
    pub bridge: Arc<dyn UiBridge>,
    pub presence: Arc<dyn Presence>,
}
