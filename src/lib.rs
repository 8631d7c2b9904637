//! # geoalarm
//!
//! Location-triggered reminders. An alarm fires when the device enters a
//! circle around its destination; the user can snooze it, dismiss it or hide
//! it for the rest of the day, and a live card shows distance and ETA while
//! the alarm is armed.
//!
//! ## Architecture
//!
//! - **State machine**: `alarm::machine` is a pure `(state, event) -> (state, effects)`
//!   function with no I/O
//! - **Engine**: `engine::AlarmEngine` owns the alarm registry, serializes events
//!   per alarm and runs effects through `dispatch::EffectDispatcher`
//! - **Inputs**: `normalizer` deduplicates region and timer callbacks,
//!   `tracker` turns location samples into live cards
//! - **Durable state**: `state` keeps the daily "hide today" records,
//!   `snooze` keeps exactly one wake timer per snoozed alarm
//! - **Collaborators**: traits in `collaborators` for the region monitor, timer,
//!   alert device, notification surface and UI bridge; `host` implements them for
//!   the `geoalarm` daemon
//! - **Infrastructure**: configuration, logging, lock file and signal handling

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod alarm;
pub mod args;
pub mod bridge;
pub mod collaborators;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod engine;
pub mod host;
pub mod ids;
pub mod io;
pub mod normalizer;
pub mod snooze;
pub mod state;
pub mod time_source;
pub mod tracker;

#[cfg(any(test, feature = "testing-support"))]
pub mod testing;

mod core;
mod geoalarm;

pub use geoalarm::GeoAlarm;
