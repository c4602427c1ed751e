//! Snapshot reconciliation.
//!
//! Consumers fetch full listings over REST and merge them with the live store:
//!
//! - devices are field-merged: the live record's reported fields win, the
//!   snapshot fills in everything the live side has not seen
//! - log streams (alarms, traffic) are unioned and deduplicated; the first
//!   occurrence of an entry wins and later duplicates are dropped, never merged

use std::collections::{HashMap, HashSet};

use crate::model::{AlarmLogEntry, DeviceRecord, TrafficLogEntry};

/// Identity of a log entry for deduplication.
///
/// Two entries are duplicates when, in priority order:
/// 1. both carry a primary id, and the ids are equal
/// 2. otherwise, both carry a business id, and those are equal
/// 3. otherwise, their fallback keys are equal
pub trait LogIdentity {
    fn primary_id(&self) -> Option<&str>;
    fn business_id(&self) -> Option<&str>;
    /// Correlating fields plus the creation timestamp.
    fn fallback_key(&self) -> String;

    fn same_entry(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.primary_id(), other.primary_id()) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (self.business_id(), other.business_id()) {
            return a == b;
        }
        self.fallback_key() == other.fallback_key()
    }
}

impl LogIdentity for AlarmLogEntry {
    fn primary_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn business_id(&self) -> Option<&str> {
        None
    }

    fn fallback_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.device_id,
            self.alarm_type,
            self.created_at.timestamp_millis()
        )
    }
}

impl LogIdentity for TrafficLogEntry {
    fn primary_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn business_id(&self) -> Option<&str> {
        self.message_id.as_deref().filter(|id| !id.is_empty())
    }

    fn fallback_key(&self) -> String {
        format!(
            "{}|{}|{:?}|{}",
            self.device_id,
            self.peer.as_deref().unwrap_or_default(),
            self.direction,
            self.created_at.timestamp_millis()
        )
    }
}

/// Whether `entries` already holds a duplicate of `candidate`.
pub fn contains_entry<T: LogIdentity>(entries: &[T], candidate: &T) -> bool {
    entries.iter().any(|kept| kept.same_entry(candidate))
}

/// Union of two log streams in order (`first`, then `second`), keeping the
/// first occurrence of every entry.
pub fn dedup_logs<T, I, J>(first: I, second: J) -> Vec<T>
where
    T: LogIdentity,
    I: IntoIterator<Item = T>,
    J: IntoIterator<Item = T>,
{
    let mut kept: Vec<T> = Vec::new();
    for entry in first.into_iter().chain(second) {
        if !contains_entry(&kept, &entry) {
            kept.push(entry);
        }
    }
    kept
}

/// Merge a device snapshot with the live map.
///
/// Snapshot order is preserved; live-only devices are appended after it in id
/// order so the output is deterministic. Entries with a blank id are dropped
/// from the live side.
pub fn merge_devices(
    snapshot: Vec<DeviceRecord>,
    live: &HashMap<String, DeviceRecord>,
) -> Vec<DeviceRecord> {
    let mut seen: HashSet<String> = HashSet::with_capacity(snapshot.len());
    let mut merged = Vec::with_capacity(snapshot.len().max(live.len()));

    for mut item in snapshot {
        if !seen.insert(item.id.clone()) {
            continue;
        }
        if let Some(current) = live.get(&item.id) {
            item.apply(&current.to_patch());
        }
        merged.push(item);
    }

    let mut live_only: Vec<&DeviceRecord> = live
        .values()
        .filter(|record| record.has_valid_id() && !seen.contains(&record.id))
        .collect();
    live_only.sort_by(|a, b| a.id.cmp(&b.id));
    merged.extend(live_only.into_iter().cloned());

    merged
}
