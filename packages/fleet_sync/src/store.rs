//! Live entity store.
//!
//! Identity-keyed device map plus append-only alarm and traffic logs. Every
//! effective mutation is announced on a broadcast channel so presentation code
//! can re-read what it cares about.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{
    AlarmLogEntry, AlarmStatus, DevicePatch, DeviceRecord, PresenceStatus, TrafficLogEntry,
};
use crate::reconcile::contains_entry;

/// What changed in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreChange {
    DeviceCreated { device_id: String },
    DeviceUpdated { device_id: String },
    AlarmAppended { device_id: String },
    AlarmClosed { device_id: String, status: AlarmStatus },
    TrafficAppended { device_id: String },
    LogsTrimmed,
}

/// How an alarm-close event identifies the log entry it refers to.
#[derive(Debug, Clone, Default)]
pub struct AlarmMatch {
    pub id: Option<String>,
    pub device_id: String,
    pub alarm_type: Option<String>,
}

pub struct FleetStore {
    devices: HashMap<String, DeviceRecord>,
    alarms: Vec<AlarmLogEntry>,
    traffic: Vec<TrafficLogEntry>,
    change_tx: broadcast::Sender<StoreChange>,
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetStore {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(256);
        Self {
            devices: HashMap::new(),
            alarms: Vec::new(),
            traffic: Vec::new(),
            change_tx,
        }
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.change_tx.subscribe()
    }

    fn announce(&self, change: StoreChange) {
        // No receivers is fine; consumers may read the store directly.
        let _ = self.change_tx.send(change);
    }

    /// Merge a partial update into a device, creating the record on first
    /// sight. Returns whether anything changed.
    pub fn upsert(&mut self, device_id: &str, patch: &DevicePatch) -> bool {
        match self.devices.get_mut(device_id) {
            Some(record) => {
                let changed = record.apply(patch);
                if changed {
                    self.announce(StoreChange::DeviceUpdated {
                        device_id: device_id.to_string(),
                    });
                }
                changed
            }
            None => {
                let mut record = DeviceRecord::new(device_id);
                record.apply(patch);
                debug!(device_id = %device_id, "device first seen");
                self.devices.insert(device_id.to_string(), record);
                self.announce(StoreChange::DeviceCreated {
                    device_id: device_id.to_string(),
                });
                true
            }
        }
    }

    /// Presence-only update.
    pub fn set_presence(&mut self, device_id: &str, status: PresenceStatus) -> bool {
        self.upsert(device_id, &DevicePatch::presence(status))
    }

    /// Append an alarm unless an equivalent entry is already stored.
    pub fn append_alarm(&mut self, entry: AlarmLogEntry) -> bool {
        if contains_entry(&self.alarms, &entry) {
            debug!(device_id = %entry.device_id, "duplicate alarm dropped");
            return false;
        }
        let device_id = entry.device_id.clone();
        self.alarms.push(entry);
        self.announce(StoreChange::AlarmAppended { device_id });
        true
    }

    /// Close the alarm an event refers to: by id when one is given, otherwise
    /// the most recent open alarm on the device (of the given type, if any).
    /// Returns the closed entry.
    pub fn close_alarm(
        &mut self,
        target: &AlarmMatch,
        status: AlarmStatus,
        at: DateTime<Utc>,
    ) -> Option<AlarmLogEntry> {
        let index = match target.id.as_deref() {
            Some(id) => self
                .alarms
                .iter()
                .rposition(|entry| entry.id.as_deref() == Some(id)),
            None => self.alarms.iter().rposition(|entry| {
                entry.device_id == target.device_id
                    && entry.is_open()
                    && target
                        .alarm_type
                        .as_deref()
                        .is_none_or(|kind| entry.alarm_type == kind)
            }),
        }?;

        let entry = &mut self.alarms[index];
        if entry.status == status {
            return Some(entry.clone());
        }
        entry.status = status;
        entry.resolved_at = Some(at);
        let closed = entry.clone();
        self.announce(StoreChange::AlarmClosed {
            device_id: closed.device_id.clone(),
            status,
        });
        Some(closed)
    }

    /// Append a traffic event unless an equivalent entry is already stored.
    pub fn append_traffic(&mut self, entry: TrafficLogEntry) -> bool {
        if contains_entry(&self.traffic, &entry) {
            debug!(device_id = %entry.device_id, "duplicate traffic event dropped");
            return false;
        }
        let device_id = entry.device_id.clone();
        self.traffic.push(entry);
        self.announce(StoreChange::TrafficAppended { device_id });
        true
    }

    /// Keep only the `max` most recent entries of each log.
    pub fn retain_recent_logs(&mut self, max: usize) {
        let trimmed_alarms = self.alarms.len().saturating_sub(max);
        let trimmed_traffic = self.traffic.len().saturating_sub(max);
        if trimmed_alarms == 0 && trimmed_traffic == 0 {
            return;
        }
        self.alarms.drain(..trimmed_alarms);
        self.traffic.drain(..trimmed_traffic);
        self.announce(StoreChange::LogsTrimmed);
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.devices.get(device_id)
    }

    pub fn devices(&self) -> &HashMap<String, DeviceRecord> {
        &self.devices
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn online_count(&self) -> usize {
        self.devices.values().filter(|d| d.is_online()).count()
    }

    /// Alarm log, oldest first.
    pub fn alarms(&self) -> &[AlarmLogEntry] {
        &self.alarms
    }

    /// Traffic log, oldest first.
    pub fn traffic(&self) -> &[TrafficLogEntry] {
        &self.traffic
    }

    pub fn open_alarms_for(&self, device_id: &str) -> Vec<&AlarmLogEntry> {
        self.alarms
            .iter()
            .filter(|entry| entry.device_id == device_id && entry.is_open())
            .collect()
    }
}
