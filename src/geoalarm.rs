//! Application coordinator that manages the complete lifecycle of geoalarm.
//!
//! This module acquires resources, wires the host collaborators to the engine
//! and hands over to the main loop. It manages:
//! - Configuration loading
//! - Lock file management for single-instance enforcement
//! - Signal handler setup
//! - Durable state (suppression records and pending snooze timers)
//! - Registration of the alarms declared in the configuration
//!
//! Normal startup is `GeoAlarm::new(debug_enabled).run()`.

use anyhow::{Context, Result};
use std::io::BufReader;
use std::sync::Arc;
use std::sync::mpsc::channel;

use crate::alarm::AlarmId;
use crate::bridge::RetryingBridge;
use crate::collaborators::{Collaborators, Headless};
use crate::config::{self, Config};
use crate::constants::{SUPPRESSION_FILE_NAME, TIMERS_FILE_NAME};
use crate::core::{Core, CoreParams};
use crate::engine::AlarmEngine;
use crate::host::{
    ConsoleAlert, ConsoleNotifications, HostEvent, JsonLinesBridge, SoftwareRegionMonitor,
    ThreadTimer, input,
};
use crate::io::lock::{acquire_lock, lock_path};
use crate::io::signals::setup_signal_handler;
use crate::state::{SuppressionStore, get_state_dir};
use crate::time_source::{self, RealTimeSource, TimeSource};

/// Builder for configuring and running the geoalarm daemon.
///
/// ```no_run
/// use geoalarm::GeoAlarm;
///
/// # fn main() -> anyhow::Result<()> {
/// GeoAlarm::new(false).run()?;
/// # Ok(())
/// # }
/// ```
pub struct GeoAlarm {
    debug_enabled: bool,
    create_lock: bool,
    show_headers: bool,
    read_stdin: bool,
}

impl GeoAlarm {
    pub fn new(debug_enabled: bool) -> Self {
        Self {
            debug_enabled,
            create_lock: true,
            show_headers: true,
            read_stdin: true,
        }
    }

    /// Skip lock file creation
    pub fn without_lock(mut self) -> Self {
        self.create_lock = false;
        self
    }

    pub fn without_headers(mut self) -> Self {
        self.show_headers = false;
        self
    }

    /// Do not read commands from stdin; only timers and signals drive the loop
    pub fn without_stdin(mut self) -> Self {
        self.read_stdin = false;
        self
    }

    /// Execute the daemon until a shutdown signal arrives.
    pub fn run(self) -> Result<()> {
        if self.show_headers {
            log_version!();
        }

        let config = match Config::load() {
            Ok(config) => config,
            Err(e) => {
                log_pipe!();
                log_error!("Configuration failed");
                log_end!();
                return Err(e);
            }
        };
        let config_dir = config::get_custom_config_dir();

        let lock = if self.create_lock {
            let path = lock_path(config_dir.as_deref())?;
            Some(acquire_lock(&path)?)
        } else {
            None
        };

        let (sender, receiver) = channel::<HostEvent>();
        let signal_state = setup_signal_handler(sender.clone())?;

        config.log_config(Config::get_config_path().ok().as_deref());

        let clock: Arc<dyn TimeSource> = Arc::new(RealTimeSource);
        time_source::init_time_source(Arc::clone(&clock));

        let settings = config.engine_settings()?;
        let state_dir = get_state_dir(config_dir.as_deref())?;
        log_block_start!("State directory: {}", state_dir.display());

        let suppression = SuppressionStore::open(
            state_dir.join(SUPPRESSION_FILE_NAME),
            settings.timezone,
            config.suppression_retention_days(),
            clock.now(),
        )
        .context("Failed to open the suppression store")?;

        let timer_sender = sender.clone();
        let timer = Arc::new(
            ThreadTimer::open(
                state_dir.join(TIMERS_FILE_NAME),
                Box::new(move |raw| {
                    let _ = timer_sender.send(HostEvent::Raw(raw));
                }),
            )
            .context("Failed to open the timer store")?,
        );
        let regions = Arc::new(SoftwareRegionMonitor::new());
        let bridge = Arc::new(RetryingBridge::new(
            Arc::new(JsonLinesBridge::stdout()),
            config.bridge_policy(),
        ));

        let collaborators = Collaborators {
            regions: regions.clone(),
            timer: timer.clone(),
            alert: Arc::new(ConsoleAlert::default()),
            notifications: Arc::new(ConsoleNotifications),
            bridge,
            presence: Arc::new(Headless),
        };
        let engine = AlarmEngine::new(settings, collaborators, suppression, clock);

        for definition in config.alarm_definitions() {
            if let Err(e) = engine.register_alarm(definition) {
                log_warning!("{e:#}");
            }
        }

        // Timers of alarms added later over stdin wait until the add arrives
        timer.arm_restored(|key| engine.state_of(&AlarmId::from(key)).is_some());

        if self.read_stdin {
            input::spawn_reader(BufReader::new(std::io::stdin()), sender);
        } else {
            drop(sender);
        }

        if self.debug_enabled {
            log_block_start!("Debug output enabled");
        }
        if lock.is_some() {
            log_block_start!("Lock acquired, starting geoalarm...");
        }

        Core::new(CoreParams {
            engine,
            regions,
            timer,
            receiver,
            signal_state,
            lock,
        })
        .execute()
    }
}
