//! JSON-lines command input.
//!
//! Each line on stdin is one command object tagged by `command`:
//!
//! ```json
//! {"command": "add", "id": "home", "latitude": 13.7563, "longitude": 100.5018, "radius": 150}
//! {"command": "location", "latitude": 13.7570, "longitude": 100.5018}
//! {"command": "snooze", "id": "home", "minutes": 5}
//! {"command": "alert", "interruption": "transient_loss"}
//! {"command": "list"}
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::BufRead;
use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};

use crate::alarm::{AlarmDefinition, AlarmId, GeoPoint};
use crate::collaborators::AlertInterruption;

use super::HostEvent;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Add {
        id: String,
        label: Option<String>,
        latitude: f64,
        longitude: f64,
        radius: f64,
        #[serde(default)]
        recurring: bool,
    },
    Delete {
        id: String,
    },
    /// A location sample.
    Location {
        latitude: f64,
        longitude: f64,
        timestamp_ms: Option<i64>,
    },
    /// A region-enter report from an external monitor.
    RegionEnter {
        id: String,
        timestamp_ms: Option<i64>,
    },
    Snooze {
        id: String,
        minutes: Option<u32>,
    },
    Dismiss {
        id: String,
    },
    Hide {
        id: String,
    },
    Alert {
        interruption: AlertInterruption,
    },
    List,
}

impl Command {
    /// Definition carried by an `add` command.
    pub fn definition(&self) -> Option<AlarmDefinition> {
        match self {
            Command::Add {
                id,
                label,
                latitude,
                longitude,
                radius,
                recurring,
            } => Some(AlarmDefinition {
                id: AlarmId::new(id.clone()),
                label: label.clone().unwrap_or_else(|| id.clone()),
                location: GeoPoint::new(*latitude, *longitude),
                radius_meters: *radius,
                recurring: *recurring,
            }),
            _ => None,
        }
    }
}

pub fn parse_command(line: &str) -> Result<Command> {
    serde_json::from_str(line).with_context(|| format!("Invalid command: {line}"))
}

/// Read commands from `reader` on a background thread.
///
/// Blank lines are skipped, malformed ones logged. `HostEvent::InputClosed`
/// is sent once the reader reaches end of input.
pub fn spawn_reader<R>(reader: R, sender: Sender<HostEvent>) -> JoinHandle<()>
where
    R: BufRead + Send + 'static,
{
    thread::spawn(move || {
        for line in reader.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log_warning!("Failed to read command input: {e}");
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_command(trimmed) {
                Ok(command) => {
                    if sender.send(HostEvent::Command(command)).is_err() {
                        return;
                    }
                }
                Err(e) => log_warning!("{e:#}"),
            }
        }
        let _ = sender.send(HostEvent::InputClosed);
    })
}
