//! Wire protocol types.
//!
//! Inbound frames are `{"type": string, "data": object, "timestamp"?: number}`.
//! Outbound frames are keepalive pings and device commands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::model::{
    AlarmSeverity, AlarmStatus, DevicePatch, PresenceStatus, TrafficChannel, TrafficDirection,
    wire,
};

/// A decoded inbound frame. `data` is kept as raw JSON until a handler
/// claims it, so subscribers see exactly what the server sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, SyncError> {
        let frame: InboundFrame = serde_json::from_str(text)?;
        if frame.kind.is_empty() {
            return Err(SyncError::Decode("frame has an empty type".to_string()));
        }
        Ok(frame)
    }

    /// Deserialize the payload into a handler-specific shape.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, SyncError> {
        Ok(T::deserialize(&self.data)?)
    }
}

/// Built-in handler selected by exact match on the frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Heartbeat,
    /// `Some` when the type itself names the status (`device_online`).
    Presence(Option<PresenceStatus>),
    AlarmRaised,
    AlarmClosed(AlarmStatus),
    Traffic(TrafficChannel, Option<TrafficDirection>),
    CommandAck,
    CommandFailed,
    AuthError,
    Pong,
}

impl EventKind {
    pub fn from_type(kind: &str) -> Option<Self> {
        Some(match kind {
            "device_heartbeat" | "heartbeat" => EventKind::Heartbeat,
            "device_online" => EventKind::Presence(Some(PresenceStatus::Online)),
            "device_offline" => EventKind::Presence(Some(PresenceStatus::Offline)),
            "device_status" => EventKind::Presence(None),
            "alarm" | "alarm_started" => EventKind::AlarmRaised,
            "alarm_resolved" => EventKind::AlarmClosed(AlarmStatus::Resolved),
            "alarm_stopped" => EventKind::AlarmClosed(AlarmStatus::Stopped),
            "sms_received" => {
                EventKind::Traffic(TrafficChannel::Sms, Some(TrafficDirection::Inbound))
            }
            "sms_sent" => EventKind::Traffic(TrafficChannel::Sms, Some(TrafficDirection::Outbound)),
            "sms_status" => EventKind::Traffic(TrafficChannel::Sms, None),
            "ussd_response" => EventKind::Traffic(TrafficChannel::Ussd, None),
            "call_event" => EventKind::Traffic(TrafficChannel::Call, None),
            "traffic_event" => EventKind::Traffic(TrafficChannel::Data, None),
            "command_ack" | "command_result" => EventKind::CommandAck,
            "command_failed" | "command_error" => EventKind::CommandFailed,
            "auth_error" | "session_expired" => EventKind::AuthError,
            "pong" => EventKind::Pong,
            _ => return None,
        })
    }
}

// =============================================================================
// Inbound payloads
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatData {
    pub device_id: String,
    #[serde(default, deserialize_with = "wire::opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub patch: DevicePatch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceData {
    pub device_id: String,
    #[serde(default)]
    pub status: Option<PresenceStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmData {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    pub device_id: String,
    #[serde(default, alias = "type")]
    pub alarm_type: String,
    #[serde(default)]
    pub severity: AlarmSeverity,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default, alias = "created_at", deserialize_with = "wire::opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlarmCloseData {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    pub device_id: String,
    #[serde(default, alias = "type")]
    pub alarm_type: Option<String>,
    #[serde(default, alias = "resolved_at", deserialize_with = "wire::opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrafficData {
    #[serde(default, deserialize_with = "wire::opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    pub device_id: String,
    #[serde(default)]
    pub direction: Option<TrafficDirection>,
    #[serde(default, alias = "phone_number")]
    pub peer: Option<String>,
    #[serde(default, alias = "message")]
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
    #[serde(default, alias = "created_at", deserialize_with = "wire::opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandResultData {
    pub command: Option<String>,
    pub device_id: Option<String>,
    pub request_id: Option<String>,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthErrorData {
    pub message: Option<String>,
}

// =============================================================================
// Outbound
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendSms {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u8>,
    pub to: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendUssd {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u8>,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmStart {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

/// Commands issued by the presentation layer, forwarded as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DeviceCommand {
    SendSms(SendSms),
    SendUssd(SendUssd),
    FindDevice(DeviceTarget),
    AlarmStart(AlarmStart),
    AlarmStop(DeviceTarget),
}

impl DeviceCommand {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::SendSms(_) => "send_sms",
            DeviceCommand::SendUssd(_) => "send_ussd",
            DeviceCommand::FindDevice(_) => "find_device",
            DeviceCommand::AlarmStart(_) => "alarm_start",
            DeviceCommand::AlarmStop(_) => "alarm_stop",
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            DeviceCommand::SendSms(c) => &c.device_id,
            DeviceCommand::SendUssd(c) => &c.device_id,
            DeviceCommand::FindDevice(c) => &c.device_id,
            DeviceCommand::AlarmStart(c) => &c.device_id,
            DeviceCommand::AlarmStop(c) => &c.device_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Ping { timestamp: DateTime<Utc> },
    Command(DeviceCommand),
}

impl OutboundFrame {
    pub fn encode(&self) -> Result<String, SyncError> {
        match self {
            OutboundFrame::Ping { timestamp } => Ok(serde_json::json!({
                "type": "ping",
                "timestamp": timestamp.timestamp_millis(),
            })
            .to_string()),
            OutboundFrame::Command(command) => Ok(serde_json::to_string(command)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn decode_frame_with_numeric_timestamp() {
        let frame = InboundFrame::decode(
            r#"{"type":"device_online","data":{"device_id":"D1"},"timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(frame.kind, "device_online");
        assert_eq!(
            frame.timestamp.map(|t| t.timestamp_millis()),
            Some(1_700_000_000_000)
        );
        let data: PresenceData = frame.payload().unwrap();
        assert_eq!(data.device_id, "D1");
    }

    #[test]
    fn decode_without_data_or_timestamp() {
        let frame = InboundFrame::decode(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(frame.data, Value::Null);
        assert!(frame.timestamp.is_none());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            InboundFrame::decode("not json"),
            Err(SyncError::Decode(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"data":{}}"#),
            Err(SyncError::Decode(_))
        ));
        assert!(matches!(
            InboundFrame::decode(r#"{"type":""}"#),
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    fn event_kinds_match_exactly() {
        assert_eq!(EventKind::from_type("heartbeat"), Some(EventKind::Heartbeat));
        assert_eq!(
            EventKind::from_type("alarm_stopped"),
            Some(EventKind::AlarmClosed(AlarmStatus::Stopped))
        );
        assert_eq!(EventKind::from_type("Heartbeat"), None);
        assert_eq!(EventKind::from_type("device_heartbeat_v2"), None);
    }

    #[test]
    fn heartbeat_payload_flattens_into_patch() {
        let frame = InboundFrame {
            kind: "device_heartbeat".into(),
            data: json!({
                "device_id": "A1",
                "battery_level": 80,
                "signal_dbm": -67,
                "sims": [{"slot": 1, "active": true, "carrier": "Vodafone"}],
                "timestamp": 1_700_000_000_000i64
            }),
            timestamp: None,
        };
        let data: HeartbeatData = frame.payload().unwrap();
        assert_eq!(data.device_id, "A1");
        assert_eq!(data.patch.battery_level, Some(80));
        assert_eq!(data.patch.signal_dbm, Some(-67));
        assert_eq!(data.patch.sims.as_ref().map(Vec::len), Some(1));
        assert!(data.patch.name.is_none());
        assert!(data.timestamp.is_some());
    }

    #[test]
    fn ping_encoding() {
        let ts = DateTime::from_timestamp_millis(1_234).unwrap();
        let encoded = OutboundFrame::Ping { timestamp: ts }.encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value, json!({"type": "ping", "timestamp": 1234}));
    }

    #[test]
    fn command_encoding() {
        let command = DeviceCommand::SendSms(SendSms {
            device_id: "D1".into(),
            slot: Some(2),
            to: "+15550100".into(),
            message: "hi".into(),
        });
        let encoded = OutboundFrame::Command(command.clone()).encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "send_sms",
                "data": {"device_id": "D1", "slot": 2, "to": "+15550100", "message": "hi"}
            })
        );
        assert_eq!(command.name(), "send_sms");
        assert_eq!(command.device_id(), "D1");

        let stop = OutboundFrame::Command(DeviceCommand::AlarmStop(DeviceTarget {
            device_id: "D2".into(),
        }))
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&stop).unwrap();
        assert_eq!(value, json!({"type": "alarm_stop", "data": {"device_id": "D2"}}));
    }
}
