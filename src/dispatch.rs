//! Executes the effects a transition declared.
//!
//! Every effect runs on its own: a failing collaborator call is logged and
//! recorded in the [`DispatchReport`], and the remaining effects still run.
//! Nothing here can undo a committed transition.
//!
//! Idempotence comes from two pieces of bookkeeping: which alarm currently
//! owns the alert device, and which notification ids are on screen. Stopping
//! an alert the alarm does not own, or clearing a notification that is not
//! shown, is reported as [`EffectStatus::Skipped`] without touching the
//! collaborator.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::alarm::machine::Effect;
use crate::alarm::{AlarmDefinition, AlarmId};
use crate::collaborators::{
    AlertDevice, AlertInterruption, Collaborators, Notification, NotificationAction,
    NotificationSurface, Presence, UiBridge, UiEvent,
};
use crate::ids::{NotificationKind, NotificationSlots};
use crate::snooze::SnoozeScheduler;
use crate::state::SuppressionStore;
use crate::tracker::{LiveCard, format_distance};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectStatus {
    Executed,
    /// Nothing to do; the effect had already taken hold.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub entries: Vec<(Effect, EffectStatus)>,
}

impl DispatchReport {
    pub fn status_of(&self, name: &str) -> Option<&EffectStatus> {
        self.entries
            .iter()
            .find(|(effect, _)| effect.name() == name)
            .map(|(_, status)| status)
    }

    pub fn executed(&self) -> usize {
        self.count(|s| *s == EffectStatus::Executed)
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == EffectStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, EffectStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&EffectStatus) -> bool) -> usize {
        self.entries.iter().filter(|(_, s)| pred(s)).count()
    }
}

fn outcome(result: Result<bool>) -> EffectStatus {
    match result {
        Ok(true) => EffectStatus::Executed,
        Ok(false) => EffectStatus::Skipped,
        Err(e) => EffectStatus::Failed(format!("{e:#}")),
    }
}

pub struct EffectDispatcher {
    alert: Arc<dyn AlertDevice>,
    notifications: Arc<dyn NotificationSurface>,
    bridge: Arc<dyn UiBridge>,
    presence: Arc<dyn Presence>,
    snooze: Arc<SnoozeScheduler>,
    suppression: Arc<SuppressionStore>,
    slots: NotificationSlots,
    alert_owner: Mutex<Option<AlarmId>>,
    shown: Mutex<HashSet<u32>>,
}

impl EffectDispatcher {
    pub fn new(
        collaborators: &Collaborators,
        snooze: Arc<SnoozeScheduler>,
        suppression: Arc<SuppressionStore>,
    ) -> Self {
        Self {
            alert: Arc::clone(&collaborators.alert),
            notifications: Arc::clone(&collaborators.notifications),
            bridge: Arc::clone(&collaborators.bridge),
            presence: Arc::clone(&collaborators.presence),
            snooze,
            suppression,
            slots: NotificationSlots::new(),
            alert_owner: Mutex::new(None),
            shown: Mutex::new(HashSet::new()),
        }
    }

    /// Run `effects` in order for `alarm`.
    pub fn dispatch(
        &self,
        alarm: &AlarmDefinition,
        effects: &[Effect],
        now: DateTime<Utc>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();

        for effect in effects {
            let status = outcome(self.execute(alarm, effect, now));
            match &status {
                EffectStatus::Failed(reason) => log_warning!(
                    "Effect {} for alarm '{}' failed: {reason}",
                    effect.name(),
                    alarm.id
                ),
                EffectStatus::Skipped => {
                    log_debug!("Effect {} for alarm '{}' skipped", effect.name(), alarm.id)
                }
                EffectStatus::Executed => {}
            }
            report.entries.push((*effect, status));
        }

        report
    }

    fn execute(&self, alarm: &AlarmDefinition, effect: &Effect, now: DateTime<Utc>) -> Result<bool> {
        let id = &alarm.id;
        match *effect {
            Effect::StartAlert => self.start_alert(id),
            Effect::StopAlert => self.stop_alert(id),
            Effect::ShowAlertNotification => {
                let notification = Notification {
                    id: self.slots.id_for(id, NotificationKind::Alert),
                    title: alarm.label.clone(),
                    body: format!(
                        "You are within {} of your destination",
                        format_distance(alarm.radius_meters)
                    ),
                    actions: vec![NotificationAction::Snooze, NotificationAction::Dismiss],
                };
                self.show(&notification)
            }
            Effect::ClearAlertNotification => self.clear(id, NotificationKind::Alert),
            Effect::ClearLiveCard => self.clear(id, NotificationKind::LiveCard),
            Effect::ClearAllNotifications => {
                let alert = self.clear(id, NotificationKind::Alert);
                let card = self.clear(id, NotificationKind::LiveCard);
                Ok(alert? | card?)
            }
            Effect::NotifyUi {
                event,
                snooze_minutes,
                snooze_until,
            } => {
                let message = UiEvent {
                    event_type: event,
                    alarm_id: id.clone(),
                    timestamp: now.timestamp_millis(),
                    snooze_minutes,
                    trigger_time: snooze_until.map(|t| t.timestamp_millis()),
                    foreground: self.presence.is_foreground(),
                };
                self.bridge.deliver(&message)?;
                Ok(true)
            }
            Effect::ScheduleTimer { fire_at } => {
                self.snooze.schedule(id, fire_at)?;
                Ok(true)
            }
            Effect::CancelTimer => self.snooze.cancel(id),
            Effect::RecordSuppression => self.suppression.hide(id, now),
        }
    }

    /// Render or refresh a distance-remaining card.
    pub fn show_live_card(&self, card: &LiveCard) -> EffectStatus {
        let notification = Notification {
            id: self.slots.id_for(&card.alarm_id, NotificationKind::LiveCard),
            title: card.label.clone(),
            body: format!(
                "{} away (radius {}), about {} on foot",
                card.distance_text, card.radius_text, card.eta
            ),
            actions: vec![NotificationAction::HideToday, NotificationAction::Stop],
        };
        let status = outcome(self.show(&notification));
        if let EffectStatus::Failed(reason) = &status {
            log_warning!("Live card for alarm '{}' failed: {reason}", card.alarm_id);
        }
        status
    }

    /// Clear the card of an alarm that left the active set.
    pub fn clear_live_card(&self, alarm_id: &AlarmId) -> EffectStatus {
        let status = outcome(self.clear(alarm_id, NotificationKind::LiveCard));
        if let EffectStatus::Failed(reason) = &status {
            log_warning!("Clearing live card for alarm '{alarm_id}' failed: {reason}");
        }
        status
    }

    /// Pause, resume or stop the alert device without touching alarm state.
    pub fn on_alert_interrupted(&self, kind: AlertInterruption) -> EffectStatus {
        let mut owner = self.owner();
        let Some(current) = owner.clone() else {
            log_debug!("Alert interruption {kind:?} with no active alert");
            return EffectStatus::Skipped;
        };

        let result = match kind {
            AlertInterruption::TransientLoss => self.alert.pause(),
            AlertInterruption::Regained => self.alert.resume(),
            AlertInterruption::PermanentLoss => self.alert.stop_alert().map(|()| {
                *owner = None;
            }),
        };

        match result {
            Ok(()) => {
                log_decorated!("Alert for alarm '{current}' handled {kind:?}");
                EffectStatus::Executed
            }
            Err(e) => {
                log_warning!("Alert device failed to handle {kind:?}: {e}");
                EffectStatus::Failed(format!("{e:#}"))
            }
        }
    }

    pub fn alert_owner(&self) -> Option<AlarmId> {
        self.owner().clone()
    }

    pub fn is_shown(&self, alarm_id: &AlarmId, kind: NotificationKind) -> bool {
        self.slots
            .existing(alarm_id, kind)
            .is_some_and(|id| self.shown().contains(&id))
    }

    /// Drop the notification ids of a deleted alarm.
    pub fn forget(&self, alarm_id: &AlarmId) {
        if !self.is_shown(alarm_id, NotificationKind::Alert)
            && !self.is_shown(alarm_id, NotificationKind::LiveCard)
        {
            self.slots.release(alarm_id);
        }
    }

    /// Silence everything on shutdown.
    pub fn clear_everything(&self) {
        if self.owner().take().is_some()
            && let Err(e) = self.alert.stop_alert()
        {
            log_warning!("Failed to stop alert on shutdown: {e}");
        }
        match self.notifications.cancel_all() {
            Ok(()) => self.shown().clear(),
            Err(e) => log_warning!("Failed to clear notifications on shutdown: {e}"),
        }
    }

    fn start_alert(&self, alarm_id: &AlarmId) -> Result<bool> {
        let mut owner = self.owner();
        if owner.as_ref() == Some(alarm_id) {
            return Ok(false);
        }
        // The device plays one alert at a time; a new start replaces the old one
        self.alert.start_alert(alarm_id)?;
        *owner = Some(alarm_id.clone());
        Ok(true)
    }

    fn stop_alert(&self, alarm_id: &AlarmId) -> Result<bool> {
        let mut owner = self.owner();
        if owner.as_ref() != Some(alarm_id) {
            return Ok(false);
        }
        self.alert.stop_alert()?;
        *owner = None;
        Ok(true)
    }

    fn show(&self, notification: &Notification) -> Result<bool> {
        self.notifications.show(notification)?;
        self.shown().insert(notification.id);
        Ok(true)
    }

    fn clear(&self, alarm_id: &AlarmId, kind: NotificationKind) -> Result<bool> {
        let Some(id) = self.slots.existing(alarm_id, kind) else {
            return Ok(false);
        };
        if !self.shown().contains(&id) {
            return Ok(false);
        }
        self.notifications.cancel(id)?;
        self.shown().remove(&id);
        Ok(true)
    }

    fn owner(&self) -> MutexGuard<'_, Option<AlarmId>> {
        self.alert_owner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shown(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.shown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::machine::Effect;
    use crate::alarm::{GeoPoint, UiEventType};
    use crate::collaborators::{
        MockAlertDevice, MockNotificationSurface, MockPresence, MockRegionMonitor, MockUiBridge,
        MockWakeTimer,
    };
    use crate::constants::test_constants::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap()
    }

    fn alarm(id: &str) -> AlarmDefinition {
        AlarmDefinition {
            id: AlarmId::from(id),
            label: "Home".into(),
            location: GeoPoint::new(BANGKOK_LAT, BANGKOK_LON),
            radius_meters: TEST_RADIUS,
            recurring: false,
        }
    }

    struct Mocks {
        alert: MockAlertDevice,
        notifications: MockNotificationSurface,
        bridge: MockUiBridge,
        presence: MockPresence,
        timer: MockWakeTimer,
    }

    impl Mocks {
        fn new() -> Self {
            let mut presence = MockPresence::new();
            presence.expect_is_foreground().return_const(true);
            Self {
                alert: MockAlertDevice::new(),
                notifications: MockNotificationSurface::new(),
                bridge: MockUiBridge::new(),
                presence,
                timer: MockWakeTimer::new(),
            }
        }

        fn build(self) -> EffectDispatcher {
            let timer: Arc<dyn crate::collaborators::WakeTimer> = Arc::new(self.timer);
            let collaborators = Collaborators {
                regions: Arc::new(MockRegionMonitor::new()),
                timer: Arc::clone(&timer),
                alert: Arc::new(self.alert),
                notifications: Arc::new(self.notifications),
                bridge: Arc::new(self.bridge),
                presence: Arc::new(self.presence),
            };
            EffectDispatcher::new(
                &collaborators,
                Arc::new(SnoozeScheduler::new(timer)),
                Arc::new(SuppressionStore::in_memory(Some(chrono_tz::UTC))),
            )
        }
    }

    fn trigger_effects() -> Vec<Effect> {
        vec![
            Effect::StartAlert,
            Effect::ShowAlertNotification,
            Effect::notify(UiEventType::AlarmTriggered),
        ]
    }

    #[test]
    fn test_failed_alert_does_not_block_other_effects() {
        let mut mocks = Mocks::new();
        mocks
            .alert
            .expect_start_alert()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("audio focus denied")));
        mocks.notifications.expect_show().times(1).returning(|_| Ok(()));
        mocks
            .bridge
            .expect_deliver()
            .withf(|e| e.event_type == UiEventType::AlarmTriggered && e.foreground)
            .times(1)
            .returning(|_| Ok(()));

        let dispatcher = mocks.build();
        let report = dispatcher.dispatch(&alarm("A1"), &trigger_effects(), now());

        assert_eq!(report.failed(), 1);
        assert_eq!(report.executed(), 2);
        assert!(matches!(
            report.status_of("start-alert"),
            Some(EffectStatus::Failed(_))
        ));
        assert_eq!(dispatcher.alert_owner(), None);
    }

    #[test]
    fn test_clearing_twice_is_a_noop() {
        let mut mocks = Mocks::new();
        mocks.alert.expect_start_alert().returning(|_| Ok(()));
        mocks.alert.expect_stop_alert().times(1).returning(|| Ok(()));
        mocks.notifications.expect_show().returning(|_| Ok(()));
        mocks.notifications.expect_cancel().times(1).returning(|_| Ok(()));
        mocks.bridge.expect_deliver().returning(|_| Ok(()));

        let dispatcher = mocks.build();
        let a1 = alarm("A1");
        dispatcher.dispatch(&a1, &trigger_effects(), now());

        let stop = [Effect::StopAlert, Effect::ClearAlertNotification];
        let first = dispatcher.dispatch(&a1, &stop, now());
        assert_eq!(first.executed(), 2);

        let second = dispatcher.dispatch(&a1, &stop, now());
        assert_eq!(second.skipped(), 2);
    }

    #[test]
    fn test_stop_for_other_alarm_keeps_alert() {
        let mut mocks = Mocks::new();
        mocks.alert.expect_start_alert().returning(|_| Ok(()));
        mocks.alert.expect_stop_alert().never();

        let dispatcher = mocks.build();
        dispatcher.dispatch(&alarm("A1"), &[Effect::StartAlert], now());
        let report = dispatcher.dispatch(&alarm("B2"), &[Effect::StopAlert], now());

        assert_eq!(report.skipped(), 1);
        assert_eq!(dispatcher.alert_owner(), Some(AlarmId::from("A1")));
    }

    #[test]
    fn test_failed_bridge_is_reported_not_raised() {
        let mut mocks = Mocks::new();
        mocks
            .bridge
            .expect_deliver()
            .returning(|_| Err(anyhow::anyhow!("bridge worker stopped")));

        let dispatcher = mocks.build();
        let report = dispatcher.dispatch(
            &alarm("A1"),
            &[Effect::notify(UiEventType::AlarmDismissed)],
            now(),
        );
        assert_eq!(report.failed(), 1);
    }

    #[test]
    fn test_schedule_and_cancel_timer_effects() {
        let mut mocks = Mocks::new();
        mocks.timer.expect_schedule_once().times(1).returning(|_, _| Ok(()));
        mocks.timer.expect_cancel().times(1).returning(|_| Ok(()));
        mocks.timer.expect_pending_at().returning(|_| None);

        let dispatcher = mocks.build();
        let fire_at = now() + chrono::Duration::minutes(5);
        let a1 = alarm("A1");

        let scheduled = dispatcher.dispatch(&a1, &[Effect::ScheduleTimer { fire_at }], now());
        assert_eq!(scheduled.executed(), 1);

        let cancelled = dispatcher.dispatch(&a1, &[Effect::CancelTimer, Effect::CancelTimer], now());
        assert_eq!(cancelled.executed(), 1);
        assert_eq!(cancelled.skipped(), 1);
    }

    #[test]
    fn test_record_suppression_is_idempotent() {
        let dispatcher = Mocks::new().build();
        let a1 = alarm("A1");
        let report = dispatcher.dispatch(
            &a1,
            &[Effect::RecordSuppression, Effect::RecordSuppression],
            now(),
        );
        assert_eq!(report.executed(), 1);
        assert_eq!(report.skipped(), 1);
    }

    #[test]
    fn test_interruption_pauses_and_resumes_owned_alert() {
        let mut mocks = Mocks::new();
        mocks.alert.expect_start_alert().returning(|_| Ok(()));
        mocks.alert.expect_pause().times(1).returning(|| Ok(()));
        mocks.alert.expect_resume().times(1).returning(|| Ok(()));
        mocks.alert.expect_stop_alert().times(1).returning(|| Ok(()));

        let dispatcher = mocks.build();
        assert_eq!(
            dispatcher.on_alert_interrupted(AlertInterruption::TransientLoss),
            EffectStatus::Skipped
        );

        dispatcher.dispatch(&alarm("A1"), &[Effect::StartAlert], now());
        assert_eq!(
            dispatcher.on_alert_interrupted(AlertInterruption::TransientLoss),
            EffectStatus::Executed
        );
        assert_eq!(
            dispatcher.on_alert_interrupted(AlertInterruption::Regained),
            EffectStatus::Executed
        );
        assert_eq!(
            dispatcher.on_alert_interrupted(AlertInterruption::PermanentLoss),
            EffectStatus::Executed
        );
        assert_eq!(dispatcher.alert_owner(), None);
    }

    #[test]
    fn test_clear_all_only_touches_own_notifications() {
        let mut mocks = Mocks::new();
        mocks.notifications.expect_show().returning(|_| Ok(()));
        mocks.notifications.expect_cancel().times(1).returning(|_| Ok(()));
        mocks.notifications.expect_cancel_all().never();

        let dispatcher = mocks.build();
        dispatcher.dispatch(&alarm("A1"), &[Effect::ShowAlertNotification], now());
        dispatcher.dispatch(&alarm("B2"), &[Effect::ShowAlertNotification], now());

        let report = dispatcher.dispatch(&alarm("A1"), &[Effect::ClearAllNotifications], now());
        assert_eq!(report.executed(), 1);
        assert!(dispatcher.is_shown(&AlarmId::from("B2"), NotificationKind::Alert));
    }
}
