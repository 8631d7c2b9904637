//! Deterministic notification ids for string alarm ids.
//!
//! Notification surfaces want small integer ids. Each alarm gets one id per
//! [`NotificationKind`]: the kind's base plus the first 31 bits of the SHA-256
//! of the alarm id. The [`NotificationSlots`] table remembers every id handed
//! out and probes linearly past taken ones, so two live alarms never share an
//! id even when their hashes collide. Without a collision the id is the same
//! across restarts.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::alarm::AlarmId;
use crate::constants::{ALERT_NOTIFICATION_BASE_ID, LIVE_CARD_NOTIFICATION_BASE_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Alert,
    LiveCard,
}

impl NotificationKind {
    pub fn base(&self) -> u32 {
        match self {
            NotificationKind::Alert => ALERT_NOTIFICATION_BASE_ID,
            NotificationKind::LiveCard => LIVE_CARD_NOTIFICATION_BASE_ID,
        }
    }
}

/// First 31 bits of the SHA-256 digest of the alarm id.
pub fn stable_hash(alarm_id: &AlarmId) -> u32 {
    let digest = sha256::digest(alarm_id.as_str().as_bytes());
    // The digest is lowercase hex, so the first 8 characters always parse
    u32::from_str_radix(&digest[..8], 16).unwrap_or(0) >> 1
}

/// Preferred id before collision handling.
pub fn derive_id(alarm_id: &AlarmId, kind: NotificationKind) -> u32 {
    kind.base().wrapping_add(stable_hash(alarm_id))
}

#[derive(Default)]
struct SlotTable {
    assigned: HashMap<(AlarmId, NotificationKind), u32>,
    taken: HashSet<u32>,
}

#[derive(Default)]
pub struct NotificationSlots {
    table: Mutex<SlotTable>,
}

impl NotificationSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id for `(alarm_id, kind)`, assigning one on first use.
    pub fn id_for(&self, alarm_id: &AlarmId, kind: NotificationKind) -> u32 {
        let mut table = self.lock();
        let key = (alarm_id.clone(), kind);
        if let Some(id) = table.assigned.get(&key) {
            return *id;
        }

        let mut candidate = derive_id(alarm_id, kind);
        while table.taken.contains(&candidate) {
            candidate = candidate.wrapping_add(1);
        }
        if candidate != derive_id(alarm_id, kind) {
            log_debug!("Notification id collision for alarm '{alarm_id}', probed to {candidate}");
        }

        table.taken.insert(candidate);
        table.assigned.insert(key, candidate);
        candidate
    }

    /// Already-assigned id, without assigning.
    pub fn existing(&self, alarm_id: &AlarmId, kind: NotificationKind) -> Option<u32> {
        self.lock().assigned.get(&(alarm_id.clone(), kind)).copied()
    }

    /// Free both ids of a deleted alarm.
    pub fn release(&self, alarm_id: &AlarmId) {
        let mut table = self.lock();
        let SlotTable { assigned, taken } = &mut *table;
        assigned.retain(|(id, _), slot| {
            let keep = id != alarm_id;
            if !keep {
                taken.remove(slot);
            }
            keep
        });
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
