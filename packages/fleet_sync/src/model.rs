//! Fleet data model.
//!
//! Reported telemetry is always `Option<T>`: `None` means "not reported" and is
//! never confused with an explicit zero. Records are only ever mutated through
//! [`DeviceRecord::apply`], which overwrites a field only when the incoming
//! patch carries a value for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Online/offline classification of a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    #[default]
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

/// Summary of one SIM slot, as reported in a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimSlotSummary {
    pub slot: u8,
    pub active: bool,
    pub carrier: Option<String>,
    pub phone_number: Option<String>,
    pub signal_level: Option<u8>,
    pub signal_dbm: Option<i32>,
    pub balance: Option<f64>,
    pub sms_sent_today: Option<u32>,
    pub data_used_mb: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

/// An alarm currently active on a device (part of the device's own state,
/// distinct from the alarm log).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlarm {
    pub alarm_type: String,
    pub severity: AlarmSeverity,
    #[serde(default)]
    pub message: Option<String>,
}

/// A device as known to the live store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRecord {
    pub id: String,
    pub name: Option<String>,
    pub group: Option<String>,
    pub site: Option<String>,
    pub status: PresenceStatus,
    #[serde(deserialize_with = "wire::opt_timestamp")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub battery_level: Option<u8>,
    pub battery_status: Option<String>,
    pub signal_level: Option<u8>,
    pub signal_dbm: Option<i32>,
    pub network_type: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub sims: Option<Vec<SimSlotSummary>>,
    pub location: Option<Geolocation>,
    pub alarms: Option<Vec<ActiveAlarm>>,
    pub maintenance: Option<bool>,
    pub maintenance_reason: Option<String>,
    #[serde(deserialize_with = "wire::opt_timestamp")]
    pub maintenance_since: Option<DateTime<Utc>>,
}

/// A partial device update. Every field is optional; absent fields leave the
/// stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePatch {
    pub name: Option<String>,
    pub group: Option<String>,
    pub site: Option<String>,
    pub status: Option<PresenceStatus>,
    #[serde(deserialize_with = "wire::opt_timestamp")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub battery_level: Option<u8>,
    pub battery_status: Option<String>,
    pub signal_level: Option<u8>,
    pub signal_dbm: Option<i32>,
    pub network_type: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub serial_number: Option<String>,
    pub sims: Option<Vec<SimSlotSummary>>,
    pub location: Option<Geolocation>,
    pub alarms: Option<Vec<ActiveAlarm>>,
    pub maintenance: Option<bool>,
    pub maintenance_reason: Option<String>,
    #[serde(deserialize_with = "wire::opt_timestamp")]
    pub maintenance_since: Option<DateTime<Utc>>,
}

impl DevicePatch {
    /// A patch that only carries a presence transition.
    pub fn presence(status: PresenceStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Overwrite `slot` when `incoming` carries a value. Returns whether the
/// stored value changed.
fn merge_field<T: Clone + PartialEq>(slot: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if slot.as_ref() != Some(value) => {
            *slot = Some(value.clone());
            true
        }
        _ => false,
    }
}

impl DeviceRecord {
    /// A record for a device seen for the first time: offline, nothing reported.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Apply a partial update in place. Lists (`sims`, `alarms`) are replaced
    /// wholesale when present. Returns whether anything changed.
    pub fn apply(&mut self, patch: &DevicePatch) -> bool {
        let mut changed = false;
        if let Some(status) = patch.status {
            if self.status != status {
                self.status = status;
                changed = true;
            }
        }
        changed |= merge_field(&mut self.name, &patch.name);
        changed |= merge_field(&mut self.group, &patch.group);
        changed |= merge_field(&mut self.site, &patch.site);
        changed |= merge_field(&mut self.last_heartbeat, &patch.last_heartbeat);
        changed |= merge_field(&mut self.battery_level, &patch.battery_level);
        changed |= merge_field(&mut self.battery_status, &patch.battery_status);
        changed |= merge_field(&mut self.signal_level, &patch.signal_level);
        changed |= merge_field(&mut self.signal_dbm, &patch.signal_dbm);
        changed |= merge_field(&mut self.network_type, &patch.network_type);
        changed |= merge_field(&mut self.model, &patch.model);
        changed |= merge_field(&mut self.firmware_version, &patch.firmware_version);
        changed |= merge_field(&mut self.serial_number, &patch.serial_number);
        changed |= merge_field(&mut self.sims, &patch.sims);
        changed |= merge_field(&mut self.location, &patch.location);
        changed |= merge_field(&mut self.alarms, &patch.alarms);
        changed |= merge_field(&mut self.maintenance, &patch.maintenance);
        changed |= merge_field(&mut self.maintenance_reason, &patch.maintenance_reason);
        changed |= merge_field(&mut self.maintenance_since, &patch.maintenance_since);
        changed
    }

    /// Everything this record reports, as a patch.
    pub fn to_patch(&self) -> DevicePatch {
        DevicePatch {
            name: self.name.clone(),
            group: self.group.clone(),
            site: self.site.clone(),
            status: Some(self.status),
            last_heartbeat: self.last_heartbeat,
            battery_level: self.battery_level,
            battery_status: self.battery_status.clone(),
            signal_level: self.signal_level,
            signal_dbm: self.signal_dbm,
            network_type: self.network_type.clone(),
            model: self.model.clone(),
            firmware_version: self.firmware_version.clone(),
            serial_number: self.serial_number.clone(),
            sims: self.sims.clone(),
            location: self.location,
            alarms: self.alarms.clone(),
            maintenance: self.maintenance,
            maintenance_reason: self.maintenance_reason.clone(),
            maintenance_since: self.maintenance_since,
        }
    }

    pub fn sim_slots(&self) -> &[SimSlotSummary] {
        self.sims.as_deref().unwrap_or_default()
    }

    pub fn active_alarms(&self) -> &[ActiveAlarm] {
        self.alarms.as_deref().unwrap_or_default()
    }

    pub fn is_online(&self) -> bool {
        self.status == PresenceStatus::Online
    }

    pub fn in_maintenance(&self) -> bool {
        self.maintenance.unwrap_or(false)
    }

    /// Empty or whitespace ids are sentinels and never enter a merged list.
    pub fn has_valid_id(&self) -> bool {
        !self.id.trim().is_empty()
    }
}

// =============================================================================
// Log entries
// =============================================================================

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AlarmSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlarmStatus {
    #[default]
    Started,
    Stopped,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmLogEntry {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub alarm_type: String,
    #[serde(default)]
    pub severity: AlarmSeverity,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: AlarmStatus,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(deserialize_with = "wire::timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AlarmLogEntry {
    pub fn is_open(&self) -> bool {
        self.status == AlarmStatus::Started
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficDirection {
    #[default]
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficChannel {
    #[default]
    Sms,
    Ussd,
    Call,
    Data,
}

/// One message, USSD exchange, call or data event passing through a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficLogEntry {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    /// Business identifier assigned by the gateway (survives REST refetches
    /// even when the row id differs).
    #[serde(default)]
    pub message_id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub channel: TrafficChannel,
    #[serde(default)]
    pub direction: TrafficDirection,
    /// Remote party: phone number, USSD code.
    #[serde(default)]
    pub peer: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub slot: Option<u8>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub delivered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(deserialize_with = "wire::timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Lenient deserializers for values the gateway sends in more than one shape.
pub(crate) mod wire {
    use chrono::{DateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    fn from_raw<E: Error>(raw: RawTimestamp) -> Result<DateTime<Utc>, E> {
        match raw {
            RawTimestamp::Millis(ms) => Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}"))),
            RawTimestamp::Float(ms) => Utc
                .timestamp_millis_opt(ms as i64)
                .single()
                .ok_or_else(|| E::custom(format!("timestamp out of range: {ms}"))),
            RawTimestamp::Text(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| E::custom(format!("invalid timestamp {s:?}: {e}"))),
        }
    }

    /// Milliseconds since the epoch, or an RFC 3339 string.
    pub fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        from_raw(RawTimestamp::deserialize(d)?)
    }

    pub fn opt_timestamp<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<RawTimestamp>::deserialize(d)? {
            Some(raw) => from_raw(raw).map(Some),
            None => Ok(None),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    /// Ids arrive as numbers from some endpoints and strings from others.
    /// Empty strings count as "no id".
    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(match Option::<RawId>::deserialize(d)? {
            Some(RawId::Number(n)) => Some(n.to_string()),
            Some(RawId::Text(s)) if !s.trim().is_empty() => Some(s),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_keeps_fields_the_patch_does_not_report() {
        let mut record = DeviceRecord::new("A1");
        record.apply(&DevicePatch {
            battery_level: Some(80),
            ..Default::default()
        });
        record.apply(&DevicePatch::presence(PresenceStatus::Online));

        assert_eq!(record.battery_level, Some(80));
        assert_eq!(record.status, PresenceStatus::Online);
    }

    #[test]
    fn explicit_zero_is_a_real_value() {
        let mut record = DeviceRecord::new("A1");
        record.apply(&DevicePatch {
            battery_level: Some(55),
            ..Default::default()
        });
        record.apply(&DevicePatch {
            battery_level: Some(0),
            ..Default::default()
        });
        assert_eq!(record.battery_level, Some(0));
    }

    #[test]
    fn sim_list_is_replaced_not_merged() {
        let mut record = DeviceRecord::new("A1");
        record.apply(&DevicePatch {
            sims: Some(vec![
                SimSlotSummary {
                    slot: 1,
                    active: true,
                    carrier: Some("Orange".into()),
                    ..Default::default()
                },
                SimSlotSummary {
                    slot: 2,
                    active: true,
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });
        record.apply(&DevicePatch {
            sims: Some(vec![SimSlotSummary {
                slot: 2,
                active: false,
                ..Default::default()
            }]),
            ..Default::default()
        });

        assert_eq!(record.sim_slots().len(), 1);
        assert_eq!(record.sim_slots()[0].slot, 2);
        assert!(!record.sim_slots()[0].active);
    }

    #[test]
    fn apply_reports_changes() {
        let mut record = DeviceRecord::new("A1");
        assert!(record.apply(&DevicePatch::presence(PresenceStatus::Online)));
        assert!(!record.apply(&DevicePatch::presence(PresenceStatus::Online)));
        assert!(!record.apply(&DevicePatch::default()));
    }

    #[test]
    fn patch_emptiness() {
        assert!(DevicePatch::default().is_empty());
        assert!(!DevicePatch::presence(PresenceStatus::Offline).is_empty());
        assert!(
            !DevicePatch {
                sims: Some(Vec::new()),
                ..Default::default()
            }
            .is_empty()
        );
    }

    #[test]
    fn new_record_defaults() {
        let record = DeviceRecord::new("D9");
        assert_eq!(record.status, PresenceStatus::Offline);
        assert!(record.sim_slots().is_empty());
        assert!(record.active_alarms().is_empty());
        assert!(record.battery_level.is_none());
        assert!(!record.in_maintenance());
    }

    #[test]
    fn to_patch_round_trips_through_apply() {
        let mut source = DeviceRecord::new("D1");
        source.apply(&DevicePatch {
            name: Some("Lobby".into()),
            status: Some(PresenceStatus::Online),
            signal_dbm: Some(-71),
            ..Default::default()
        });
        let mut target = DeviceRecord::new("D1");
        target.apply(&source.to_patch());
        assert_eq!(target, source);
    }

    #[test]
    fn valid_id_rejects_blank() {
        assert!(DeviceRecord::new("D1").has_valid_id());
        assert!(!DeviceRecord::new("").has_valid_id());
        assert!(!DeviceRecord::new("   ").has_valid_id());
    }

    #[test]
    fn alarm_entry_accepts_numeric_id_and_millis() {
        let entry: AlarmLogEntry = serde_json::from_value(json!({
            "id": 7,
            "device_id": "D1",
            "alarm_type": "low_battery",
            "severity": "critical",
            "message": "Battery at 3%",
            "created_at": 1_700_000_000_000i64
        }))
        .unwrap();
        assert_eq!(entry.id.as_deref(), Some("7"));
        assert_eq!(entry.severity, AlarmSeverity::Critical);
        assert_eq!(entry.status, AlarmStatus::Started);
        assert_eq!(entry.created_at.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn traffic_entry_accepts_rfc3339_and_blank_id() {
        let entry: TrafficLogEntry = serde_json::from_value(json!({
            "id": "",
            "message_id": "m-1",
            "device_id": "D1",
            "channel": "ussd",
            "direction": "outbound",
            "created_at": "2024-05-01T10:00:00Z"
        }))
        .unwrap();
        assert!(entry.id.is_none());
        assert_eq!(entry.channel, TrafficChannel::Ussd);
        assert_eq!(entry.direction, TrafficDirection::Outbound);
        assert_eq!(entry.created_at.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }
}
