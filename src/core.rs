//! Main loop of the geoalarm daemon.
//!
//! Commands from stdin, timer and region callbacks, and signals all arrive on
//! one channel and are handled in arrival order. The engine serializes work
//! per alarm on its own, so the loop stays a thin translation layer.

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use crate::alarm::{AlarmId, GeoPoint};
use crate::engine::{AlarmEngine, EventOutcome};
use crate::host::{Command, HostEvent, SoftwareRegionMonitor, ThreadTimer};
use crate::io::lock::InstanceLock;
use crate::io::signals::{SignalMessage, SignalState};
use crate::normalizer::{RawEvent, region_request_id};
use crate::snooze::timer_key;
use crate::time_source;
use crate::tracker::format_distance;

/// How often the loop re-checks the running flag while idle.
const IDLE_POLL: Duration = Duration::from_secs(1);

/// Dependencies of the main loop.
pub(crate) struct CoreParams {
    pub engine: AlarmEngine,
    pub regions: Arc<SoftwareRegionMonitor>,
    pub timer: Arc<ThreadTimer>,
    pub receiver: Receiver<HostEvent>,
    pub signal_state: SignalState,
    pub lock: Option<InstanceLock>,
}

pub(crate) struct Core {
    engine: AlarmEngine,
    regions: Arc<SoftwareRegionMonitor>,
    timer: Arc<ThreadTimer>,
    receiver: Receiver<HostEvent>,
    signal_state: SignalState,
    lock: Option<InstanceLock>,
}

impl Core {
    pub fn new(params: CoreParams) -> Self {
        Self {
            engine: params.engine,
            regions: params.regions,
            timer: params.timer,
            receiver: params.receiver,
            signal_state: params.signal_state,
            lock: params.lock,
        }
    }

    /// Run until a shutdown signal arrives, then release every resource.
    pub fn execute(mut self) -> Result<()> {
        self.main_loop();

        log_block_start!("Shutting down geoalarm...");
        self.engine.shutdown();
        if let Some(lock) = self.lock.take() {
            log_debug!("Releasing lock {}", lock.path().display());
            drop(lock);
        }
        log_end!();
        Ok(())
    }

    fn main_loop(&self) {
        while self.signal_state.running.load(Ordering::SeqCst) {
            match self.receiver.recv_timeout(IDLE_POLL) {
                Ok(HostEvent::Signal(SignalMessage::Shutdown { .. })) => break,
                Ok(HostEvent::Signal(SignalMessage::Status)) => log_status(&self.engine),
                Ok(HostEvent::InputClosed) => {
                    log_decorated!("Command input closed, still watching timers and signals");
                }
                Ok(HostEvent::Raw(raw)) => {
                    self.engine.handle_raw(raw);
                }
                Ok(HostEvent::Command(command)) => {
                    let added = command.definition().map(|definition| definition.id);
                    handle_command(&self.engine, &self.regions, command);
                    if let Some(id) = added {
                        resume_restored_timer(&self.engine, &self.timer, &id);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }
}

/// Apply one command to the engine.
pub(crate) fn handle_command(
    engine: &AlarmEngine,
    regions: &SoftwareRegionMonitor,
    command: Command,
) {
    if let Some(definition) = command.definition() {
        if let Err(e) = engine.register_alarm(definition) {
            log_warning!("{e:#}");
        }
        return;
    }

    match command {
        Command::Add { .. } => {}
        Command::Delete { id } => {
            report(&id, "delete", engine.delete_alarm(&AlarmId::new(id.clone())));
        }
        Command::Location {
            latitude,
            longitude,
            timestamp_ms,
        } => {
            let position = GeoPoint::new(latitude, longitude);
            let at = timestamp_ms.unwrap_or_else(|| time_source::now().timestamp_millis());
            for raw in regions.observe(position, at) {
                engine.handle_raw(raw);
            }
            engine.on_location(position);
        }
        Command::RegionEnter { id, timestamp_ms } => {
            engine.handle_raw(RawEvent::RegionEnter {
                request_id: region_request_id(&AlarmId::new(id)),
                timestamp_ms,
            });
        }
        Command::Snooze { id, minutes } => {
            report(
                &id,
                "snooze",
                engine.snooze(&AlarmId::new(id.clone()), minutes),
            );
        }
        Command::Dismiss { id } => {
            report(&id, "dismiss", engine.dismiss(&AlarmId::new(id.clone())));
        }
        Command::Hide { id } => {
            report(&id, "hide", engine.hide_today(&AlarmId::new(id.clone())));
        }
        Command::Alert { interruption } => {
            engine.on_alert_interrupted(interruption);
        }
        Command::List => log_status(engine),
    }
}

/// Start a snooze timer that survived a restart once its alarm is added again.
pub(crate) fn resume_restored_timer(engine: &AlarmEngine, timer: &ThreadTimer, id: &AlarmId) {
    if engine.state_of(id).is_some() && timer.arm(&timer_key(id)) {
        log_decorated!("Resumed pending snooze timer of alarm '{id}'");
    }
}

fn report(id: &str, action: &str, outcome: EventOutcome) {
    if let EventOutcome::Ignored(reason) = outcome {
        log_decorated!("{action} for '{id}' had no effect ({reason:?})");
    }
}

/// Log one line per alarm.
pub(crate) fn log_status(engine: &AlarmEngine) {
    let snapshots = engine.snapshot();
    if snapshots.is_empty() {
        log_block_start!("No alarms registered");
        return;
    }

    log_block_start!("{} alarm(s):", snapshots.len());
    for snapshot in snapshots {
        let mut details = vec![snapshot.state.to_string()];
        if let Some(distance) = snapshot.last_distance_meters {
            details.push(format!("{} away", format_distance(distance)));
        }
        if snapshot.suppressed_today {
            details.push("hidden today".to_string());
        }
        if let Some(until) = snapshot.timer_pending_until {
            details.push(format!("timer at {}", until.format("%H:%M:%S")));
        }
        log_indented!(
            "{} ({}): {}",
            snapshot.definition.id,
            snapshot.definition.label,
            details.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::{AlarmState, UiEventType};
    use crate::collaborators::RegionMonitor;
    use crate::constants::test_constants::*;
    use crate::testing::TestRig;
    use chrono::{TimeZone, Utc};

    fn rig() -> TestRig {
        TestRig::new(Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap())
    }

    fn add_home() -> Command {
        Command::Add {
            id: "home".to_string(),
            label: Some("Home".to_string()),
            latitude: BANGKOK_LAT,
            longitude: BANGKOK_LON,
            radius: TEST_RADIUS,
            recurring: false,
        }
    }

    #[test]
    fn test_add_and_region_enter_trigger() {
        let rig = rig();
        let regions = SoftwareRegionMonitor::new();

        handle_command(&rig.engine, &regions, add_home());
        assert_eq!(
            rig.engine.state_of(&AlarmId::from("home")),
            Some(AlarmState::Armed)
        );

        handle_command(
            &rig.engine,
            &regions,
            Command::RegionEnter {
                id: "home".to_string(),
                timestamp_ms: None,
            },
        );
        assert_eq!(
            rig.engine.state_of(&AlarmId::from("home")),
            Some(AlarmState::Triggered)
        );
        assert_eq!(rig.bridge.events_of(UiEventType::AlarmTriggered), 1);
    }

    #[test]
    fn test_location_crossing_triggers_through_software_monitor() {
        let rig = rig();
        let regions = SoftwareRegionMonitor::new();
        handle_command(&rig.engine, &regions, add_home());
        regions
            .register(
                &region_request_id(&AlarmId::from("home")),
                GeoPoint::new(BANGKOK_LAT, BANGKOK_LON),
                TEST_RADIUS,
            )
            .unwrap();

        // Far away: only a live card
        handle_command(
            &rig.engine,
            &regions,
            Command::Location {
                latitude: BANGKOK_LAT + 0.01,
                longitude: BANGKOK_LON,
                timestamp_ms: None,
            },
        );
        assert_eq!(
            rig.engine.state_of(&AlarmId::from("home")),
            Some(AlarmState::Armed)
        );
        assert_eq!(rig.notifications.visible_count(), 1);

        handle_command(
            &rig.engine,
            &regions,
            Command::Location {
                latitude: BANGKOK_LAT,
                longitude: BANGKOK_LON,
                timestamp_ms: None,
            },
        );
        assert_eq!(
            rig.engine.state_of(&AlarmId::from("home")),
            Some(AlarmState::Triggered)
        );
        assert_eq!(rig.alert.playing(), Some(AlarmId::from("home")));
    }

    #[test]
    fn test_snooze_dismiss_and_delete_commands() {
        let rig = rig();
        let regions = SoftwareRegionMonitor::new();
        handle_command(&rig.engine, &regions, add_home());
        handle_command(
            &rig.engine,
            &regions,
            Command::RegionEnter {
                id: "home".to_string(),
                timestamp_ms: None,
            },
        );

        handle_command(
            &rig.engine,
            &regions,
            Command::Snooze {
                id: "home".to_string(),
                minutes: Some(10),
            },
        );
        assert!(matches!(
            rig.engine.state_of(&AlarmId::from("home")),
            Some(AlarmState::Snoozed { .. })
        ));
        assert_eq!(rig.timer.pending_count(), 1);

        handle_command(
            &rig.engine,
            &regions,
            Command::Dismiss {
                id: "home".to_string(),
            },
        );
        assert_eq!(
            rig.engine.state_of(&AlarmId::from("home")),
            Some(AlarmState::Dismissed)
        );
        assert_eq!(rig.timer.pending_count(), 0);

        handle_command(
            &rig.engine,
            &regions,
            Command::Delete {
                id: "home".to_string(),
            },
        );
        assert_eq!(rig.engine.state_of(&AlarmId::from("home")), None);
        assert!(rig.regions.registered().is_empty());
    }

    #[test]
    fn test_invalid_add_is_rejected() {
        let rig = rig();
        let regions = SoftwareRegionMonitor::new();

        handle_command(
            &rig.engine,
            &regions,
            Command::Add {
                id: "bad".to_string(),
                label: None,
                latitude: 200.0,
                longitude: 0.0,
                radius: TEST_RADIUS,
                recurring: false,
            },
        );
        assert_eq!(rig.engine.state_of(&AlarmId::from("bad")), None);

        // List never fails, even with nothing registered
        handle_command(&rig.engine, &regions, Command::List);
    }

    #[test]
    fn test_restored_timer_resumes_when_its_alarm_is_added() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timers.json");
        let overdue = time_source::now().timestamp_millis() - 1_000;
        std::fs::write(&path, format!("{{\"home\": {overdue}}}")).unwrap();

        let (sender, fired) = std::sync::mpsc::channel();
        let sender = std::sync::Mutex::new(sender);
        let timer = ThreadTimer::open(
            path,
            Box::new(move |raw| {
                let _ = sender.lock().unwrap().send(raw);
            }),
        )
        .unwrap();

        let rig = rig();
        let regions = SoftwareRegionMonitor::new();
        let id = AlarmId::from("home");
        timer.arm_restored(|key| rig.engine.state_of(&AlarmId::from(key)).is_some());

        // Nothing fires for an alarm that is not back yet
        resume_restored_timer(&rig.engine, &timer, &id);
        let wait = std::time::Duration::from_millis(200);
        assert!(fired.recv_timeout(wait).is_err());
        assert_eq!(timer.pending_count(), 1);

        handle_command(&rig.engine, &regions, add_home());
        resume_restored_timer(&rig.engine, &timer, &id);
        let raw = fired.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert!(matches!(raw, RawEvent::TimerFired { ref key, .. } if key == "home"));
        assert_eq!(timer.pending_count(), 0);
    }
}
