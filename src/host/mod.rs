//! Host-side collaborators used by the `geoalarm` daemon.
//!
//! The engine only talks to the traits in [`crate::collaborators`]; this
//! module provides implementations that run on a plain Linux process: a
//! thread-backed timer, a region monitor fed by location samples, console
//! rendering and a JSON-lines UI bridge.

pub mod console;
pub mod input;
pub mod region;
pub mod timer;

pub use console::{ConsoleAlert, ConsoleNotifications, JsonLinesBridge};
pub use input::Command;
pub use region::SoftwareRegionMonitor;
pub use timer::ThreadTimer;

use crate::io::signals::SignalMessage;
use crate::normalizer::RawEvent;

/// Everything the daemon's main loop reacts to.
#[derive(Debug)]
pub enum HostEvent {
    Command(Command),
    /// Callback from a host collaborator
    Raw(RawEvent),
    Signal(SignalMessage),
    /// Command input reached end of file
    InputClosed,
}

impl From<SignalMessage> for HostEvent {
    fn from(message: SignalMessage) -> Self {
        HostEvent::Signal(message)
    }
}

impl From<RawEvent> for HostEvent {
    fn from(event: RawEvent) -> Self {
        HostEvent::Raw(event)
    }
}
