//! The alarm registry and the single entry point for every event.
//!
//! [`AlarmEngine`] owns one [`Alarm`] per id. Each alarm sits behind its own
//! mutex, so events for one alarm are applied strictly in arrival order while
//! different alarms proceed in parallel. Applying an event always follows the
//! same path:
//!
//! 1. look the alarm up (unknown or already-deleted ids are logged and dropped)
//! 2. re-arm a recurring alarm dismissed on an earlier local date
//! 3. run the pure transition and commit the new state
//! 4. dispatch the declared effects (a snooze whose timer cannot be
//!    scheduled rings again instead of waiting forever)
//! 5. refresh the alarm's membership in the distance tracker's active set
//!
//! Effects run while the alarm's lock is held, which keeps timer scheduling
//! and cancellation ordered with the transitions that declared them.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::alarm::machine::{AlarmEvent, IgnoreReason, Outcome, TransitionContext, transition};
use crate::alarm::{Alarm, AlarmDefinition, AlarmId, AlarmState, GeoPoint};
use crate::collaborators::{AlertInterruption, Collaborators, RegionMonitor};
use crate::constants::*;
use crate::dispatch::{DispatchReport, EffectDispatcher, EffectStatus};
use crate::normalizer::{EventNormalizer, RawEvent, TriggerEvent, TriggerSource, region_request_id};
use crate::snooze::SnoozeScheduler;
use crate::state::SuppressionStore;
use crate::time_source::{TimeSource, local_date};
use crate::tracker::{DistanceTracker, LiveCard};

/// Tunables the engine is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub dedup_window: Duration,
    pub update_threshold_meters: f64,
    pub walking_speed_kmh: f64,
    pub default_snooze_minutes: u32,
    /// `None` uses the host's local timezone for calendar dates.
    pub timezone: Option<Tz>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            update_threshold_meters: DEFAULT_UPDATE_THRESHOLD_METERS,
            walking_speed_kmh: DEFAULT_WALKING_SPEED_KMH,
            default_snooze_minutes: DEFAULT_SNOOZE_MINUTES,
            timezone: None,
        }
    }
}

/// What became of an event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    /// The transition committed. `state` is `None` once the alarm is deleted.
    Applied {
        state: Option<AlarmState>,
        report: DispatchReport,
    },
    Ignored(IgnoreReason),
    /// Malformed, or a duplicate collapsed by the normalizer.
    Dropped,
    UnknownAlarm,
}

impl EventOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, EventOutcome::Applied { .. })
    }

    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            EventOutcome::Applied { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Point-in-time view of one alarm.
#[derive(Debug, Clone, PartialEq)]
pub struct AlarmSnapshot {
    pub definition: AlarmDefinition,
    pub state: AlarmState,
    pub last_distance_meters: Option<f64>,
    pub suppressed_today: bool,
    pub timer_pending_until: Option<DateTime<Utc>>,
}

struct AlarmSlot {
    alarm: Alarm,
    /// Set under the slot lock when the alarm is deleted, so events that were
    /// already waiting on the lock are dropped.
    deleted: bool,
}

type Registry = HashMap<AlarmId, Arc<Mutex<AlarmSlot>>>;

pub struct AlarmEngine {
    settings: EngineSettings,
    clock: Arc<dyn TimeSource>,
    regions: Arc<dyn RegionMonitor>,
    normalizer: EventNormalizer,
    tracker: DistanceTracker,
    snooze: Arc<SnoozeScheduler>,
    suppression: Arc<SuppressionStore>,
    dispatcher: EffectDispatcher,
    registry: Mutex<Registry>,
    /// Local date of the last full refresh triggered by a location sample.
    refreshed_on: Mutex<Option<NaiveDate>>,
}

impl AlarmEngine {
    pub fn new(
        settings: EngineSettings,
        collaborators: Collaborators,
        suppression: SuppressionStore,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let snooze = Arc::new(SnoozeScheduler::new(Arc::clone(&collaborators.timer)));
        let suppression = Arc::new(suppression);
        let dispatcher =
            EffectDispatcher::new(&collaborators, Arc::clone(&snooze), Arc::clone(&suppression));

        Self {
            normalizer: EventNormalizer::new(settings.dedup_window),
            tracker: DistanceTracker::new(
                settings.update_threshold_meters,
                settings.walking_speed_kmh,
            ),
            settings,
            clock,
            regions: collaborators.regions,
            snooze,
            suppression,
            dispatcher,
            registry: Mutex::new(HashMap::new()),
            refreshed_on: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Add an alarm and register its geofence.
    ///
    /// A snooze timer that survived a restart is adopted and the alarm comes
    /// back `Snoozed`; otherwise it starts `Armed`.
    pub fn register_alarm(&self, definition: AlarmDefinition) -> Result<AlarmState> {
        definition.validate()?;
        let id = definition.id.clone();

        let slot = {
            let mut registry = self.registry();
            if registry.contains_key(&id) {
                bail!("Alarm '{id}' is already registered");
            }

            self.regions
                .register(
                    &region_request_id(&id),
                    definition.location,
                    definition.radius_meters,
                )
                .with_context(|| format!("Failed to register geofence for alarm '{id}'"))?;

            let mut alarm = Alarm::armed(definition);
            if let Some(until) = self.snooze.restore(&id) {
                alarm.state = AlarmState::Snoozed { until };
            }

            let slot = Arc::new(Mutex::new(AlarmSlot {
                alarm,
                deleted: false,
            }));
            registry.insert(id.clone(), Arc::clone(&slot));
            slot
        };

        let slot = lock_slot(&slot);
        let now = self.clock.now();
        self.refresh_active(&slot.alarm, now);

        let alarm = &slot.alarm;
        log_block_start!("Registered alarm '{id}' ({})", alarm.definition.label);
        log_indented!(
            "Destination: {:.4}°, {:.4}° within {} m",
            alarm.definition.location.latitude,
            alarm.definition.location.longitude,
            alarm.definition.radius_meters
        );
        if let AlarmState::Snoozed { until } = alarm.state {
            log_indented!("Restored pending snooze until {until}");
        }
        if alarm.definition.recurring {
            log_indented!("Recurring: re-arms on the next local day after dismissal");
        }

        Ok(alarm.state)
    }

    /// Delete an alarm: cancel its timer, silence it, unregister its geofence.
    pub fn delete_alarm(&self, alarm_id: &AlarmId) -> EventOutcome {
        self.apply(alarm_id, AlarmEvent::DeleteRequested)
    }

    /// Feed a raw collaborator callback through the normalizer.
    pub fn handle_raw(&self, raw: RawEvent) -> EventOutcome {
        match self.normalizer.normalize(raw, self.clock.now()) {
            Some(event) => self.apply_trigger(event),
            None => EventOutcome::Dropped,
        }
    }

    pub fn apply_trigger(&self, event: TriggerEvent) -> EventOutcome {
        let alarm_event = match event.source {
            TriggerSource::GeofenceEnter => AlarmEvent::GeofenceEnter,
            TriggerSource::SnoozeTimer => AlarmEvent::SnoozeTimerFired {
                at: event.timestamp,
            },
        };
        self.apply(&event.alarm_id, alarm_event)
    }

    /// Snooze a triggered alarm; `None` uses the configured default.
    pub fn snooze(&self, alarm_id: &AlarmId, minutes: Option<u32>) -> EventOutcome {
        let minutes = minutes.unwrap_or(self.settings.default_snooze_minutes);
        self.apply(alarm_id, AlarmEvent::SnoozeRequested { minutes })
    }

    pub fn dismiss(&self, alarm_id: &AlarmId) -> EventOutcome {
        self.apply(alarm_id, AlarmEvent::DismissRequested)
    }

    pub fn hide_today(&self, alarm_id: &AlarmId) -> EventOutcome {
        self.apply(alarm_id, AlarmEvent::HideTodayRequested)
    }

    /// Apply `event` to one alarm under its lock.
    pub fn apply(&self, alarm_id: &AlarmId, event: AlarmEvent) -> EventOutcome {
        let Some(slot) = self.registry().get(alarm_id).cloned() else {
            log_warning!("Dropping {} for unknown alarm '{alarm_id}'", event.name());
            return EventOutcome::UnknownAlarm;
        };

        let mut slot = lock_slot(&slot);
        if slot.deleted {
            log_warning!("Dropping {} for deleted alarm '{alarm_id}'", event.name());
            return EventOutcome::UnknownAlarm;
        }

        let now = self.clock.now();
        let today = self.today(now);
        self.rearm_if_new_day(&mut slot.alarm, today);

        let ctx = TransitionContext {
            now,
            suppressed_today: self.suppression.is_suppressed(alarm_id, now),
        };
        let previous = slot.alarm.state;
        let outcome = transition(previous, event, &ctx);

        if let Outcome::Ignored(reason) = outcome.outcome {
            log_debug!(
                "Alarm '{alarm_id}' ignored {} while {previous}: {reason:?}",
                event.name()
            );
            self.refresh_active(&slot.alarm, now);
            return EventOutcome::Ignored(reason);
        }

        // Commit before any effect runs
        match outcome.next {
            Some(next) => {
                slot.alarm.state = next;
                if next == AlarmState::Dismissed {
                    slot.alarm.dismissed_on = Some(today);
                }
            }
            None => {
                slot.deleted = true;
                self.registry().remove(alarm_id);
            }
        }

        if matches!(event, AlarmEvent::SnoozeTimerFired { .. }) {
            self.snooze.settle(alarm_id);
        }

        log_decorated!(
            "Alarm '{alarm_id}': {previous} → {} ({})",
            outcome.next.map(|s| s.name()).unwrap_or("removed"),
            event.name()
        );

        let mut report = self
            .dispatcher
            .dispatch(&slot.alarm.definition, &outcome.effects, now);

        // A snooze without a timer would never ring again
        let mut next = outcome.next;
        if let Some(AlarmState::Snoozed { until }) = next
            && matches!(
                report.status_of("schedule-timer"),
                Some(EffectStatus::Failed(_))
            )
        {
            log_warning!("No snooze timer for alarm '{alarm_id}', ringing again instead");
            let fallback = transition(
                AlarmState::Snoozed { until },
                AlarmEvent::SnoozeTimerFired { at: until },
                &ctx,
            );
            if let Some(state) = fallback.next {
                slot.alarm.state = state;
                next = Some(state);
            }
            let retried = self
                .dispatcher
                .dispatch(&slot.alarm.definition, &fallback.effects, now);
            report.entries.extend(retried.entries);
        }

        if slot.deleted {
            self.forget(&slot.alarm.definition);
        } else {
            self.refresh_active(&slot.alarm, now);
        }

        EventOutcome::Applied {
            state: next,
            report,
        }
    }

    /// Process a location sample and render the cards that changed enough.
    ///
    /// Only the first sample of a local day touches the alarms themselves;
    /// every other sample reads the tracker's active set alone.
    pub fn on_location(&self, position: GeoPoint) -> Vec<LiveCard> {
        self.refresh_on_new_day();

        let cards = self.tracker.on_sample(position);
        for card in &cards {
            if self.dispatcher.show_live_card(card) == EffectStatus::Executed {
                log_indented!(
                    "{}: {} to go, ETA {}",
                    card.label,
                    card.distance_text,
                    card.eta
                );
            }
        }
        cards
    }

    /// Route an audio-focus change to the alert device. Alarm state is untouched.
    pub fn on_alert_interrupted(&self, kind: AlertInterruption) -> EffectStatus {
        self.dispatcher.on_alert_interrupted(kind)
    }

    /// Re-arm recurring alarms after a date change and resync the active set.
    pub fn refresh_all(&self) {
        let now = self.clock.now();
        let today = self.today(now);
        for slot in self.slots() {
            let mut slot = lock_slot(&slot);
            if slot.deleted {
                continue;
            }
            self.rearm_if_new_day(&mut slot.alarm, today);
            self.refresh_active(&slot.alarm, now);
        }
    }

    fn refresh_on_new_day(&self) {
        let today = self.today(self.clock.now());
        {
            let mut refreshed_on = self
                .refreshed_on
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *refreshed_on == Some(today) {
                return;
            }
            *refreshed_on = Some(today);
        }
        self.refresh_all();
    }

    pub fn state_of(&self, alarm_id: &AlarmId) -> Option<AlarmState> {
        let slot = self.registry().get(alarm_id).cloned()?;
        let slot = lock_slot(&slot);
        (!slot.deleted).then_some(slot.alarm.state)
    }

    /// All alarms, sorted by id.
    pub fn snapshot(&self) -> Vec<AlarmSnapshot> {
        let now = self.clock.now();
        let mut snapshots: Vec<AlarmSnapshot> = self
            .slots()
            .iter()
            .filter_map(|slot| {
                let slot = lock_slot(slot);
                if slot.deleted {
                    return None;
                }
                let id = slot.alarm.id();
                Some(AlarmSnapshot {
                    definition: slot.alarm.definition.clone(),
                    state: slot.alarm.state,
                    last_distance_meters: self.tracker.last_distance(id),
                    suppressed_today: self.suppression.is_suppressed(id, now),
                    timer_pending_until: self.snooze.pending_for(id),
                })
            })
            .collect();
        snapshots.sort_by(|a, b| a.definition.id.cmp(&b.definition.id));
        snapshots
    }

    /// Alarms with a live snooze timer, sorted by id.
    pub fn pending_timers(&self) -> Vec<AlarmId> {
        self.snooze.pending_ids()
    }

    pub fn active_alarms(&self) -> Vec<AlarmId> {
        self.tracker.active_ids()
    }

    pub fn dispatcher(&self) -> &EffectDispatcher {
        &self.dispatcher
    }

    /// Stop any alert and clear all notifications.
    pub fn shutdown(&self) {
        self.dispatcher.clear_everything();
    }

    fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, self.settings.timezone)
    }

    fn rearm_if_new_day(&self, alarm: &mut Alarm, today: NaiveDate) {
        if alarm.definition.recurring
            && alarm.state == AlarmState::Dismissed
            && alarm.dismissed_on.is_some_and(|day| day < today)
        {
            alarm.state = AlarmState::Armed;
            alarm.dismissed_on = None;
            log_decorated!("Recurring alarm '{}' re-armed for {today}", alarm.id());
        }
    }

    /// Keep the alarm in the active set exactly while it is armed and not hidden.
    fn refresh_active(&self, alarm: &Alarm, now: DateTime<Utc>) {
        let id = alarm.id();
        let active =
            alarm.state == AlarmState::Armed && !self.suppression.is_suppressed(id, now);
        if active {
            self.tracker.upsert(&alarm.definition);
        } else if self.tracker.remove(id) {
            self.dispatcher.clear_live_card(id);
        }
    }

    fn forget(&self, definition: &AlarmDefinition) {
        let id = &definition.id;
        if self.tracker.remove(id) {
            self.dispatcher.clear_live_card(id);
        }
        self.normalizer.forget(id);
        self.dispatcher.forget(id);
        if let Err(e) = self.suppression.forget(id) {
            log_warning!("Failed to drop suppression records of alarm '{id}': {e:#}");
        }
        if let Err(e) = self.regions.unregister(&region_request_id(id)) {
            log_warning!("Failed to unregister geofence of alarm '{id}': {e:#}");
        }
    }

    fn slots(&self) -> Vec<Arc<Mutex<AlarmSlot>>> {
        self.registry().values().cloned().collect()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lock_slot(slot: &Arc<Mutex<AlarmSlot>>) -> MutexGuard<'_, AlarmSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::UiEventType;
    use crate::alarm::machine::Effect;
    use crate::constants::test_constants::*;
    use crate::collaborators::{Headless, MockAlertDevice};
    use crate::testing::{
        RecordingBridge, RecordingNotifications, RecordingRegions, RecordingTimer, TestRig,
    };
    use crate::time_source::ManualTimeSource;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::mpsc::channel;

    fn definition(id: &str, recurring: bool) -> AlarmDefinition {
        AlarmDefinition {
            id: AlarmId::from(id),
            label: format!("Stop {id}"),
            location: GeoPoint::new(BANGKOK_LAT, BANGKOK_LON),
            radius_meters: TEST_RADIUS,
            recurring,
        }
    }

    fn rig() -> TestRig {
        TestRig::new(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap())
    }

    fn enter(id: &str) -> RawEvent {
        RawEvent::RegionEnter {
            request_id: format!("alarm_{id}"),
            timestamp_ms: None,
        }
    }

    fn effects(outcome: &EventOutcome) -> Vec<Effect> {
        outcome
            .report()
            .map(|r| r.entries.iter().map(|(e, _)| *e).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_register_rejects_duplicates_and_invalid() {
        let rig = rig();
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        assert!(rig.engine.register_alarm(definition("A1", false)).is_err());

        let mut bad = definition("B2", false);
        bad.radius_meters = 0.0;
        assert!(rig.engine.register_alarm(bad).is_err());
        assert_eq!(rig.engine.snapshot().len(), 1);
        assert_eq!(rig.regions.registered(), vec!["alarm_A1".to_string()]);
    }

    #[test]
    fn test_unknown_alarm_is_dropped() {
        let rig = rig();
        assert_eq!(rig.engine.handle_raw(enter("ghost")), EventOutcome::UnknownAlarm);
        assert_eq!(rig.engine.dismiss(&AlarmId::from("ghost")), EventOutcome::UnknownAlarm);
        assert!(rig.engine.snapshot().is_empty());
    }

    #[test]
    fn test_enter_triggers_once_within_dedup_window() {
        let rig = rig();
        rig.engine.register_alarm(definition("A1", false)).unwrap();

        let first = rig.engine.handle_raw(enter("A1"));
        assert!(first.is_applied());
        assert_eq!(rig.engine.handle_raw(enter("A1")), EventOutcome::Dropped);
        assert_eq!(rig.bridge.events_of(UiEventType::AlarmTriggered), 1);
        assert_eq!(rig.alert.starts(), 1);
    }

    #[test]
    fn test_hidden_alarm_swallows_enter() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();

        let hide = rig.engine.hide_today(&id);
        assert!(hide.is_applied());
        assert!(rig.engine.active_alarms().is_empty());

        let outcome = rig.engine.handle_raw(enter("A1"));
        assert_eq!(outcome, EventOutcome::Ignored(IgnoreReason::Suppressed));
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Armed));
        assert_eq!(rig.bridge.events_of(UiEventType::LivecardHidden), 1);
    }

    #[test]
    fn test_suppression_expires_next_day() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.hide_today(&id);

        rig.clock.advance(ChronoDuration::days(1));
        rig.engine.refresh_all();
        assert_eq!(rig.engine.active_alarms(), vec![id.clone()]);
        assert!(rig.engine.handle_raw(enter("A1")).is_applied());
    }

    #[test]
    fn test_snooze_keeps_exactly_one_timer() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.handle_raw(enter("A1"));

        rig.engine.snooze(&id, Some(5));
        assert_eq!(rig.engine.pending_timers(), vec![id.clone()]);
        assert_eq!(rig.timer.pending_count(), 1);

        // Second snooze while already snoozed changes nothing
        let again = rig.engine.snooze(&id, Some(10));
        assert!(!again.is_applied());
        assert_eq!(rig.timer.pending_count(), 1);

        rig.clock.advance(ChronoDuration::minutes(5));
        for raw in rig.timer.fire_due(rig.clock.now_millis()) {
            assert!(rig.engine.handle_raw(raw).is_applied());
        }
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Triggered));
        assert!(rig.engine.pending_timers().is_empty());
        assert_eq!(rig.timer.pending_count(), 0);
    }

    #[test]
    fn test_dismiss_from_snoozed_cancels_timer() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.handle_raw(enter("A1"));
        rig.engine.snooze(&id, None);

        let dismissed = rig.engine.dismiss(&id);
        assert_eq!(effects(&dismissed)[0], Effect::CancelTimer);
        assert_eq!(rig.timer.pending_count(), 0);
        assert!(rig.engine.pending_timers().is_empty());
    }

    #[test]
    fn test_double_dismiss_notifies_once() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.handle_raw(enter("A1"));

        assert!(rig.engine.dismiss(&id).is_applied());
        assert!(!rig.engine.dismiss(&id).is_applied());
        assert_eq!(rig.bridge.events_of(UiEventType::AlarmDismissed), 1);
    }

    #[test]
    fn test_delete_cancels_and_unregisters() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.handle_raw(enter("A1"));
        rig.engine.snooze(&id, Some(5));

        let deleted = rig.engine.delete_alarm(&id);
        assert!(matches!(deleted, EventOutcome::Applied { state: None, .. }));
        assert_eq!(rig.timer.pending_count(), 0);
        assert!(rig.regions.registered().is_empty());
        assert_eq!(rig.engine.state_of(&id), None);

        // The timer callback was already in flight
        let late = crate::snooze::fired_event("A1", rig.clock.now_millis());
        assert_eq!(rig.engine.handle_raw(late), EventOutcome::UnknownAlarm);
    }

    #[test]
    fn test_stop_on_live_card_dismisses_armed_alarm() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.on_location(GeoPoint::new(BANGKOK_LAT + 0.01, BANGKOK_LON));
        assert_eq!(rig.notifications.visible_count(), 1);

        rig.engine.dismiss(&id);
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Dismissed));
        assert_eq!(rig.notifications.visible_count(), 0);
        assert_eq!(rig.bridge.events_of(UiEventType::LivecardStopped), 1);
        assert!(rig.engine.active_alarms().is_empty());
    }

    #[test]
    fn test_recurring_alarm_rearms_next_day() {
        let rig = rig();
        let id = AlarmId::from("R1");
        rig.engine.register_alarm(definition("R1", true)).unwrap();
        rig.engine.handle_raw(enter("R1"));
        rig.engine.dismiss(&id);

        rig.engine.refresh_all();
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Dismissed));

        rig.clock.advance(ChronoDuration::days(1));
        assert!(rig.engine.handle_raw(enter("R1")).is_applied());
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Triggered));
    }

    #[test]
    fn test_non_recurring_dismissal_is_terminal() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.handle_raw(enter("A1"));
        rig.engine.dismiss(&id);

        rig.clock.advance(ChronoDuration::days(3));
        rig.engine.refresh_all();
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Dismissed));
    }

    #[test]
    fn test_restart_restores_pending_snooze() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.engine.register_alarm(definition("A1", false)).unwrap();
        rig.engine.handle_raw(enter("A1"));
        rig.engine.snooze(&id, Some(5));

        // A fresh engine sharing only the durable timer
        let restarted = rig.restart();
        let state = restarted.engine.register_alarm(definition("A1", false)).unwrap();
        assert!(matches!(state, AlarmState::Snoozed { .. }));
        assert_eq!(restarted.engine.pending_timers(), vec![id.clone()]);

        restarted.clock.advance(ChronoDuration::minutes(5));
        for raw in restarted.timer.fire_due(restarted.clock.now_millis()) {
            restarted.engine.handle_raw(raw);
        }
        assert_eq!(restarted.engine.state_of(&id), Some(AlarmState::Triggered));
    }

    #[test]
    fn test_alert_failure_leaves_alarm_usable() {
        let rig = rig();
        let id = AlarmId::from("A1");
        rig.alert.fail_next_start();
        rig.engine.register_alarm(definition("A1", false)).unwrap();

        let triggered = rig.engine.handle_raw(enter("A1"));
        assert_eq!(triggered.report().map(|r| r.failed()), Some(1));
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Triggered));

        assert!(rig.engine.dismiss(&id).is_applied());
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Dismissed));
    }

    #[test]
    fn test_recurring_alarm_returns_to_live_card_on_next_day() {
        let rig = rig();
        let id = AlarmId::from("R1");
        let far = GeoPoint::new(BANGKOK_LAT + 0.01, BANGKOK_LON);
        rig.engine.register_alarm(definition("R1", true)).unwrap();
        rig.engine.handle_raw(enter("R1"));
        rig.engine.dismiss(&id);

        assert!(rig.engine.on_location(far).is_empty());
        assert!(rig.engine.on_location(far).is_empty());

        rig.clock.advance(ChronoDuration::days(1));
        let cards = rig.engine.on_location(far);
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].alarm_id, id);
        assert_eq!(rig.engine.state_of(&id), Some(AlarmState::Armed));
    }

    #[test]
    fn test_location_samples_do_not_wait_for_a_busy_alarm() {
        let (entered_tx, entered) = channel();
        let (release, gate) = channel::<()>();
        let gate = Mutex::new(gate);

        let mut alert = MockAlertDevice::new();
        alert.expect_start_alert().returning(move |_| {
            let _ = entered_tx.send(());
            let _ = gate.lock().unwrap().recv();
            Ok(())
        });
        alert.expect_stop_alert().returning(|| Ok(()));

        let collaborators = Collaborators {
            regions: Arc::new(RecordingRegions::default()),
            timer: Arc::new(RecordingTimer::default()),
            alert: Arc::new(alert),
            notifications: Arc::new(RecordingNotifications::default()),
            bridge: Arc::new(RecordingBridge::default()),
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
            Arc::new(ManualTimeSource::new(
                Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap(),
            )),
        );
        engine.register_alarm(definition("A1", false)).unwrap();
        engine.register_alarm(definition("B1", false)).unwrap();
        let near = GeoPoint::new(BANGKOK_LAT + 0.01, BANGKOK_LON);
        let far = GeoPoint::new(BANGKOK_LAT + 0.02, BANGKOK_LON);
        assert_eq!(engine.on_location(near).len(), 2);

        std::thread::scope(|scope| {
            let engine = &engine;
            scope.spawn(move || engine.handle_raw(enter("A1")));
            entered
                .recv_timeout(std::time::Duration::from_secs(5))
                .unwrap();

            // A1's lock is held while its alert starts
            let (done_tx, done) = channel();
            scope.spawn(move || {
                let _ = done_tx.send(engine.on_location(far).len());
            });
            let rendered = done.recv_timeout(std::time::Duration::from_secs(5));
            release.send(()).unwrap();
            assert!(rendered.is_ok());
        });

        assert_eq!(
            engine.state_of(&AlarmId::from("A1")),
            Some(AlarmState::Triggered)
        );
    }
}
