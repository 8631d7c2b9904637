//! Thread-backed wake timer with a durable pending table.
//!
//! Every `schedule_once` stores the deadline under its key and starts a
//! sleeper thread. A sleeper only fires if its key still carries the
//! generation it was started for, so cancelling or rescheduling simply bumps
//! the table. The table is written to `timers.json` in the state directory
//! after every change; a restarted daemon reloads it, lets the engine restore
//! snoozed alarms through `pending_at`, and then re-arms the sleepers of the
//! alarms it knows. Entries of alarms that are not registered yet stay on disk
//! until [`ThreadTimer::arm`] is called for them.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::collaborators::WakeTimer;
use crate::normalizer::RawEvent;
use crate::snooze::fired_event;
use crate::state::write_json_atomic;
use crate::time_source;

/// Callback receiving fired timers.
pub type FireCallback = Box<dyn Fn(RawEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct Entry {
    at_millis: i64,
    generation: u64,
    /// False for entries loaded from disk that have no sleeper yet.
    armed: bool,
}

struct TimerInner {
    entries: Mutex<HashMap<String, Entry>>,
    next_generation: AtomicU64,
    store: Option<PathBuf>,
    on_fire: FireCallback,
}

impl TimerInner {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, entries: &HashMap<String, Entry>) -> Result<()> {
        let Some(path) = &self.store else {
            return Ok(());
        };
        let table: BTreeMap<&str, i64> = entries
            .iter()
            .map(|(key, entry)| (key.as_str(), entry.at_millis))
            .collect();
        write_json_atomic(path, &table)
    }

    fn insert(&self, key: &str, at_millis: i64) -> Result<u64> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut entries = self.entries();
        entries.insert(
            key.to_string(),
            Entry {
                at_millis,
                generation,
                armed: true,
            },
        );
        self.persist(&entries)
            .with_context(|| format!("Failed to persist timer '{key}'"))?;
        Ok(generation)
    }
}

pub struct ThreadTimer {
    inner: Arc<TimerInner>,
}

impl ThreadTimer {
    /// A timer that keeps nothing on disk.
    pub fn in_memory(on_fire: FireCallback) -> Self {
        Self::with_store(None, HashMap::new(), on_fire)
    }

    /// Load pending timers from `path`. Restored entries stay dormant until
    /// [`ThreadTimer::arm_restored`] is called.
    pub fn open(path: PathBuf, on_fire: FireCallback) -> Result<Self> {
        let restored = load_table(&path)?;
        if !restored.is_empty() {
            log_decorated!("Restored {} pending snooze timer(s)", restored.len());
        }
        let entries = restored
            .into_iter()
            .enumerate()
            .map(|(generation, (key, at_millis))| {
                (
                    key,
                    Entry {
                        at_millis,
                        generation: generation as u64,
                        armed: false,
                    },
                )
            })
            .collect::<HashMap<_, _>>();
        Ok(Self::with_store(Some(path), entries, on_fire))
    }

    fn with_store(
        store: Option<PathBuf>,
        entries: HashMap<String, Entry>,
        on_fire: FireCallback,
    ) -> Self {
        let next_generation = entries.len() as u64;
        Self {
            inner: Arc::new(TimerInner {
                entries: Mutex::new(entries),
                next_generation: AtomicU64::new(next_generation),
                store,
                on_fire,
            }),
        }
    }

    /// Start sleepers for the entries loaded from disk whose key is registered.
    pub fn arm_restored(&self, is_registered: impl Fn(&str) -> bool) {
        let mut dormant = 0;
        let restored: Vec<(String, Entry)> = {
            let mut entries = self.inner.entries();
            entries
                .iter_mut()
                .filter(|(_, entry)| !entry.armed)
                .filter_map(|(key, entry)| {
                    if !is_registered(key.as_str()) {
                        dormant += 1;
                        return None;
                    }
                    entry.armed = true;
                    Some((key.clone(), *entry))
                })
                .collect()
        };
        if dormant > 0 {
            log_indented!("Keeping {dormant} timer(s) until their alarms are added");
        }
        for (key, entry) in restored {
            spawn_sleeper(Arc::clone(&self.inner), key, entry);
        }
    }

    /// Start the sleeper of one dormant entry. Returns `false` when `key` has
    /// no dormant entry.
    pub fn arm(&self, key: &str) -> bool {
        let entry = {
            let mut entries = self.inner.entries();
            match entries.get_mut(key) {
                Some(entry) if !entry.armed => {
                    entry.armed = true;
                    *entry
                }
                _ => return false,
            }
        };
        spawn_sleeper(Arc::clone(&self.inner), key.to_string(), entry);
        true
    }

    pub fn pending_count(&self) -> usize {
        self.inner.entries().len()
    }
}

impl WakeTimer for ThreadTimer {
    fn schedule_once(&self, key: &str, at_millis: i64) -> Result<()> {
        let generation = self.inner.insert(key, at_millis)?;
        spawn_sleeper(
            Arc::clone(&self.inner),
            key.to_string(),
            Entry {
                at_millis,
                generation,
                armed: true,
            },
        );
        Ok(())
    }

    fn cancel(&self, key: &str) -> Result<()> {
        let mut entries = self.inner.entries();
        if entries.remove(key).is_some() {
            self.inner
                .persist(&entries)
                .with_context(|| format!("Failed to persist cancellation of timer '{key}'"))?;
        }
        Ok(())
    }

    fn pending_at(&self, key: &str) -> Option<i64> {
        self.inner.entries().get(key).map(|entry| entry.at_millis)
    }
}

fn spawn_sleeper(inner: Arc<TimerInner>, key: String, entry: Entry) {
    thread::spawn(move || {
        let remaining = entry.at_millis - time_source::now().timestamp_millis();
        if remaining > 0 {
            thread::sleep(Duration::from_millis(remaining as u64));
        }

        {
            let mut entries = inner.entries();
            match entries.get(&key) {
                Some(current) if current.generation == entry.generation => {
                    entries.remove(&key);
                }
                _ => return,
            }
            if let Err(e) = inner.persist(&entries) {
                log_warning!("Failed to persist fired timer '{key}': {e:#}");
            }
        }

        let fired_at = time_source::now().timestamp_millis().max(entry.at_millis);
        (inner.on_fire)(fired_event(&key, fired_at));
    });
}

fn load_table(path: &Path) -> Result<BTreeMap<String, i64>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    match serde_json::from_str(&content) {
        Ok(table) => Ok(table),
        Err(e) => {
            log_warning!(
                "Ignoring unreadable timer file {}: {}",
                path.display(),
                e
            );
            Ok(BTreeMap::new())
        }
    }
}
