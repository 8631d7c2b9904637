//! Console-backed collaborators for the daemon.
//!
//! The alert device and notification surface render through the logger. UI
//! events go out as one JSON object per line so a front end can follow the
//! daemon's stdout.

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::{Mutex, MutexGuard};

use crate::alarm::AlarmId;
use crate::collaborators::{AlertDevice, Notification, NotificationSurface, UiBridge, UiEvent};

/// Alert device that announces the alert in the log.
#[derive(Default)]
pub struct ConsoleAlert {
    playing: Mutex<Option<AlarmId>>,
}

impl ConsoleAlert {
    fn playing(&self) -> MutexGuard<'_, Option<AlarmId>> {
        self.playing.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl AlertDevice for ConsoleAlert {
    fn start_alert(&self, alarm_id: &AlarmId) -> Result<()> {
        *self.playing() = Some(alarm_id.clone());
        log_critical!("Alert sounding for {alarm_id}");
        Ok(())
    }

    fn stop_alert(&self) -> Result<()> {
        if let Some(alarm_id) = self.playing().take() {
            log_decorated!("Alert for {alarm_id} stopped");
        }
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        if let Some(alarm_id) = self.playing().as_ref() {
            log_decorated!("Alert for {alarm_id} paused");
        }
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        if let Some(alarm_id) = self.playing().as_ref() {
            log_decorated!("Alert for {alarm_id} resumed");
        }
        Ok(())
    }
}

/// Notification surface that prints each notification as a log block.
#[derive(Default)]
pub struct ConsoleNotifications;

impl NotificationSurface for ConsoleNotifications {
    fn show(&self, notification: &Notification) -> Result<()> {
        log_block_start!("[{}] {}", notification.id, notification.title);
        log_indented!("{}", notification.body);
        if !notification.actions.is_empty() {
            let actions: Vec<String> = notification
                .actions
                .iter()
                .map(|action| format!("{action:?}"))
                .collect();
            log_indented!("Actions: {}", actions.join(", "));
        }
        Ok(())
    }

    fn cancel(&self, id: u32) -> Result<()> {
        log_debug!("Notification {id} cleared");
        Ok(())
    }

    fn cancel_all(&self) -> Result<()> {
        log_debug!("All notifications cleared");
        Ok(())
    }
}

/// UI bridge writing one JSON object per line.
pub struct JsonLinesBridge {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesBridge {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }
}

impl UiBridge for JsonLinesBridge {
    fn deliver(&self, event: &UiEvent) -> Result<()> {
        let line = serde_json::to_string(event).context("Failed to encode UI event")?;
        let mut writer = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        writeln!(writer, "{line}").context("Failed to write UI event")?;
        writer.flush().context("Failed to flush UI event")?;
        Ok(())
    }
}
