//! Snooze timers on top of the wake-capable timer.
//!
//! The timer collaborator is the durable record of a pending snooze: the
//! scheduler only mirrors it in memory, and [`SnoozeScheduler::restore`] asks
//! the collaborator again after a restart. Timers are keyed by alarm id, so a
//! new snooze for the same alarm replaces the old registration.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::alarm::AlarmId;
use crate::collaborators::WakeTimer;
use crate::normalizer::RawEvent;
use crate::time_source::from_millis;

/// Key under which an alarm's snooze timer is registered.
pub fn timer_key(alarm_id: &AlarmId) -> String {
    alarm_id.as_str().to_string()
}

/// Raw event a timer callback feeds back into the engine.
pub fn fired_event(key: &str, at_millis: i64) -> RawEvent {
    RawEvent::TimerFired {
        key: key.to_string(),
        timestamp_ms: Some(at_millis),
    }
}

pub struct SnoozeScheduler {
    timer: Arc<dyn WakeTimer>,
    pending: Mutex<HashMap<AlarmId, DateTime<Utc>>>,
}

impl SnoozeScheduler {
    pub fn new(timer: Arc<dyn WakeTimer>) -> Self {
        Self {
            timer,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register (or replace) the snooze timer of `alarm_id`.
    pub fn schedule(&self, alarm_id: &AlarmId, fire_at: DateTime<Utc>) -> Result<()> {
        let mut pending = self.lock();
        self.timer
            .schedule_once(&timer_key(alarm_id), fire_at.timestamp_millis())
            .with_context(|| format!("Failed to schedule snooze timer for alarm '{alarm_id}'"))?;
        pending.insert(alarm_id.clone(), fire_at);
        Ok(())
    }

    /// Cancel the pending timer. Returns `false` when nothing was pending.
    pub fn cancel(&self, alarm_id: &AlarmId) -> Result<bool> {
        let mut pending = self.lock();
        let key = timer_key(alarm_id);
        let known = pending.remove(alarm_id).is_some();
        if !known && self.timer.pending_at(&key).is_none() {
            return Ok(false);
        }
        self.timer
            .cancel(&key)
            .with_context(|| format!("Failed to cancel snooze timer for alarm '{alarm_id}'"))?;
        Ok(true)
    }

    /// Forget the timer of an alarm whose snooze just fired.
    ///
    /// Any registration still left with the collaborator belongs to an older
    /// snooze and is cancelled so it cannot fire again.
    pub fn settle(&self, alarm_id: &AlarmId) {
        let mut pending = self.lock();
        pending.remove(alarm_id);
        let key = timer_key(alarm_id);
        if self.timer.pending_at(&key).is_some()
            && let Err(e) = self.timer.cancel(&key)
        {
            log_warning!("Failed to cancel leftover timer for alarm '{alarm_id}': {e}");
        }
    }

    /// Re-adopt a registration that survived a restart.
    pub fn restore(&self, alarm_id: &AlarmId) -> Option<DateTime<Utc>> {
        let at_millis = self.timer.pending_at(&timer_key(alarm_id))?;
        let Some(fire_at) = from_millis(at_millis) else {
            log_warning!(
                "Ignoring snooze timer of alarm '{alarm_id}' with invalid deadline {at_millis}"
            );
            return None;
        };
        self.lock().insert(alarm_id.clone(), fire_at);
        Some(fire_at)
    }

    pub fn pending_for(&self, alarm_id: &AlarmId) -> Option<DateTime<Utc>> {
        self.lock().get(alarm_id).copied()
    }

    pub fn pending_ids(&self) -> Vec<AlarmId> {
        let mut ids: Vec<AlarmId> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<AlarmId, DateTime<Utc>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
