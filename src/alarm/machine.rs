//! The alarm lifecycle as a pure transition function.
//!
//! ```text
//!            GeofenceEnter                Snooze(m)
//!  Armed ─────────────────► Triggered ─────────────► Snoozed{until}
//!    ▲  ▲                     │   ▲                      │   │
//!    │  │  HideToday          │   └──── timer fired ─────┘   │
//!    │  └──────────┐          │ Dismiss                      │ Dismiss
//!    │             │          ▼                              │
//!    │          Dismissed ◄───────────────────────────────────┘
//!    │             ▲
//!    └─ Dismiss ───┘  (live card "Stop")
//! ```
//!
//! [`transition`] never fails. Pairs not listed above produce an
//! [`Outcome::Ignored`] transition with no effects, which is what makes
//! re-delivered dismiss and snooze requests harmless. The caller commits
//! [`Transition::next`] first and only then executes [`Transition::effects`].

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::{AlarmState, UiEventType};
use crate::constants::{MINIMUM_SNOOZE_MINUTES, SNOOZE_TIMER_SLACK_MILLIS};

/// Event applied to a single alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmEvent {
    GeofenceEnter,
    /// The snooze timer went off at `at`.
    SnoozeTimerFired { at: DateTime<Utc> },
    SnoozeRequested { minutes: u32 },
    DismissRequested,
    HideTodayRequested,
    DeleteRequested,
}

impl AlarmEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AlarmEvent::GeofenceEnter => "geofence-enter",
            AlarmEvent::SnoozeTimerFired { .. } => "snooze-timer",
            AlarmEvent::SnoozeRequested { .. } => "snooze",
            AlarmEvent::DismissRequested => "dismiss",
            AlarmEvent::HideTodayRequested => "hide-today",
            AlarmEvent::DeleteRequested => "delete",
        }
    }
}

/// Side effect declared by a transition, executed after it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartAlert,
    StopAlert,
    ShowAlertNotification,
    ClearAlertNotification,
    ClearLiveCard,
    /// Both the alert notification and the live card of this alarm.
    ClearAllNotifications,
    NotifyUi {
        event: UiEventType,
        snooze_minutes: Option<u32>,
        snooze_until: Option<DateTime<Utc>>,
    },
    ScheduleTimer {
        fire_at: DateTime<Utc>,
    },
    CancelTimer,
    RecordSuppression,
}

impl Effect {
    pub fn notify(event: UiEventType) -> Self {
        Effect::NotifyUi {
            event,
            snooze_minutes: None,
            snooze_until: None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Effect::StartAlert => "start-alert",
            Effect::StopAlert => "stop-alert",
            Effect::ShowAlertNotification => "show-alert-notification",
            Effect::ClearAlertNotification => "clear-alert-notification",
            Effect::ClearLiveCard => "clear-live-card",
            Effect::ClearAllNotifications => "clear-all-notifications",
            Effect::NotifyUi { .. } => "notify-ui",
            Effect::ScheduleTimer { .. } => "schedule-timer",
            Effect::CancelTimer => "cancel-timer",
            Effect::RecordSuppression => "record-suppression",
        }
    }
}

/// Facts about the outside world the transition needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub now: DateTime<Utc>,
    /// Whether the alarm is hidden for the current local day.
    pub suppressed_today: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The alarm is hidden for today.
    Suppressed,
    /// A timer from an earlier snooze fired before the current deadline.
    StaleTimer,
    /// The pair has no transition.
    NoTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State after the event, `None` once the alarm is deleted.
    pub next: Option<AlarmState>,
    pub effects: Vec<Effect>,
    pub outcome: Outcome,
}

impl Transition {
    fn applied(next: AlarmState, effects: Vec<Effect>) -> Self {
        Self {
            next: Some(next),
            effects,
            outcome: Outcome::Applied,
        }
    }

    fn ignored(current: AlarmState, reason: IgnoreReason) -> Self {
        Self {
            next: Some(current),
            effects: Vec::new(),
            outcome: Outcome::Ignored(reason),
        }
    }

    pub fn is_applied(&self) -> bool {
        self.outcome == Outcome::Applied
    }
}

fn trigger_effects() -> Vec<Effect> {
    vec![
        Effect::StartAlert,
        Effect::ShowAlertNotification,
        Effect::notify(UiEventType::AlarmTriggered),
    ]
}

/// Compute the next state and the ordered effects for `event`.
pub fn transition(state: AlarmState, event: AlarmEvent, ctx: &TransitionContext) -> Transition {
    use AlarmEvent as E;
    use AlarmState as S;

    match (state, event) {
        (_, E::DeleteRequested) => Transition {
            next: None,
            effects: vec![
                Effect::CancelTimer,
                Effect::StopAlert,
                Effect::ClearAllNotifications,
            ],
            outcome: Outcome::Applied,
        },

        (S::Armed, E::GeofenceEnter) if ctx.suppressed_today => {
            Transition::ignored(state, IgnoreReason::Suppressed)
        }
        (S::Armed, E::GeofenceEnter) => Transition::applied(S::Triggered, trigger_effects()),

        (S::Armed, E::HideTodayRequested) if ctx.suppressed_today => {
            Transition::ignored(state, IgnoreReason::NoTransition)
        }
        (S::Armed, E::HideTodayRequested) => Transition::applied(
            S::Armed,
            vec![
                Effect::RecordSuppression,
                Effect::ClearLiveCard,
                Effect::notify(UiEventType::LivecardHidden),
            ],
        ),
        (S::Armed, E::DismissRequested) => Transition::applied(
            S::Dismissed,
            vec![
                Effect::ClearLiveCard,
                Effect::notify(UiEventType::LivecardStopped),
            ],
        ),

        (S::Triggered, E::SnoozeRequested { minutes }) => {
            let minutes = minutes.max(MINIMUM_SNOOZE_MINUTES);
            let until = ctx
                .now
                .checked_add_signed(ChronoDuration::minutes(i64::from(minutes)))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            Transition::applied(
                S::Snoozed { until },
                vec![
                    Effect::StopAlert,
                    Effect::ClearAlertNotification,
                    Effect::NotifyUi {
                        event: UiEventType::AlarmSnoozed,
                        snooze_minutes: Some(minutes),
                        snooze_until: Some(until),
                    },
                    Effect::ScheduleTimer { fire_at: until },
                ],
            )
        }
        (S::Triggered, E::DismissRequested) => Transition::applied(
            S::Dismissed,
            vec![
                Effect::StopAlert,
                Effect::ClearAlertNotification,
                Effect::notify(UiEventType::AlarmDismissed),
            ],
        ),

        (S::Snoozed { until }, E::SnoozeTimerFired { at }) => {
            let slack = ChronoDuration::milliseconds(SNOOZE_TIMER_SLACK_MILLIS);
            if at.checked_add_signed(slack).is_some_and(|late| late < until) {
                Transition::ignored(state, IgnoreReason::StaleTimer)
            } else {
                Transition::applied(S::Triggered, trigger_effects())
            }
        }
        (S::Snoozed { .. }, E::DismissRequested) => Transition::applied(
            S::Dismissed,
            vec![
                Effect::CancelTimer,
                Effect::StopAlert,
                Effect::ClearAlertNotification,
                Effect::notify(UiEventType::AlarmDismissed),
            ],
        ),

        (S::Dismissed, E::HideTodayRequested) => Transition::applied(
            S::Armed,
            vec![
                Effect::RecordSuppression,
                Effect::notify(UiEventType::LivecardHidden),
            ],
        ),

        (S::Armed, E::SnoozeTimerFired { .. }) | (S::Triggered, E::SnoozeTimerFired { .. }) => {
            Transition::ignored(state, IgnoreReason::StaleTimer)
        }
        _ => Transition::ignored(state, IgnoreReason::NoTransition),
    }
}
