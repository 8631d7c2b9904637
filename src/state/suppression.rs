//! Daily suppression record ("hide for today").
//!
//! Records are keyed by local calendar date, so a hidden alarm comes back on
//! its own once the date rolls over, regardless of the time of day it was
//! hidden. Old day keys are purged every time the store is opened.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::alarm::AlarmId;
use crate::constants::DAY_KEY_FORMAT;
use crate::time_source::local_date;

type Records = BTreeMap<String, BTreeSet<AlarmId>>;

pub struct SuppressionStore {
    path: Option<PathBuf>,
    timezone: Option<Tz>,
    records: Mutex<Records>,
}

impl SuppressionStore {
    /// A store that lives only as long as the process.
    pub fn in_memory(timezone: Option<Tz>) -> Self {
        Self {
            path: None,
            timezone,
            records: Mutex::new(Records::new()),
        }
    }

    /// Load the store from `path` and purge records older than `retention_days`.
    ///
    /// A missing file starts an empty store. An unreadable one is logged and
    /// replaced, since losing a "hidden today" flag only means an alarm shows up
    /// again.
    pub fn open(
        path: PathBuf,
        timezone: Option<Tz>,
        retention_days: u32,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            match serde_json::from_str::<Records>(&content) {
                Ok(records) => records,
                Err(e) => {
                    log_warning!(
                        "Suppression record {} is corrupt ({e}), starting empty",
                        path.display()
                    );
                    Records::new()
                }
            }
        } else {
            Records::new()
        };

        let store = Self {
            path: Some(path),
            timezone,
            records: Mutex::new(records),
        };
        let purged = store.purge_older_than(retention_days, now)?;
        if purged > 0 {
            log_debug!("Purged {purged} stale suppression day(s)");
        }
        Ok(store)
    }

    pub fn day_key(date: NaiveDate) -> String {
        date.format(DAY_KEY_FORMAT).to_string()
    }

    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        local_date(now, self.timezone)
    }

    pub fn today_key(&self, now: DateTime<Utc>) -> String {
        Self::day_key(self.today(now))
    }

    /// Hide `alarm_id` for the local day containing `now`.
    ///
    /// Returns `false` when it was already hidden today.
    pub fn hide(&self, alarm_id: &AlarmId, now: DateTime<Utc>) -> Result<bool> {
        let key = self.today_key(now);
        let mut records = self.lock();
        let inserted = records.entry(key).or_default().insert(alarm_id.clone());
        if inserted {
            self.persist(&records)?;
        }
        Ok(inserted)
    }

    pub fn is_suppressed(&self, alarm_id: &AlarmId, now: DateTime<Utc>) -> bool {
        self.is_suppressed_on(alarm_id, self.today(now))
    }

    pub fn is_suppressed_on(&self, alarm_id: &AlarmId, date: NaiveDate) -> bool {
        self.lock()
            .get(&Self::day_key(date))
            .is_some_and(|ids| ids.contains(alarm_id))
    }

    /// Remove day records more than `days` before today, plus unparseable keys.
    pub fn purge_older_than(&self, days: u32, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = self.today(now) - ChronoDuration::days(i64::from(days));
        let mut records = self.lock();
        let before = records.len();

        records.retain(|key, ids| {
            !ids.is_empty()
                && NaiveDate::parse_from_str(key, DAY_KEY_FORMAT).is_ok_and(|date| date >= cutoff)
        });

        let purged = before - records.len();
        if purged > 0 {
            self.persist(&records)?;
        }
        Ok(purged)
    }

    /// Drop every record of a deleted alarm.
    pub fn forget(&self, alarm_id: &AlarmId) -> Result<()> {
        let mut records = self.lock();
        let mut changed = false;
        for ids in records.values_mut() {
            changed |= ids.remove(alarm_id);
        }
        if changed {
            records.retain(|_, ids| !ids.is_empty());
            self.persist(&records)?;
        }
        Ok(())
    }

    pub fn day_count(&self) -> usize {
        self.lock().len()
    }

    fn persist(&self, records: &Records) -> Result<()> {
        match &self.path {
            Some(path) => super::write_json_atomic(path, records),
            None => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
