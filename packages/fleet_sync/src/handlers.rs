//! Built-in domain event handlers.
//!
//! Handlers mutate the store and emit notifications. Anything that affects
//! the connection itself is returned as a [`HandlerOutcome`] for the driver to
//! act on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::auth::{Clock, SessionEnd};
use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::model::{
    AlarmLogEntry, AlarmStatus, PresenceStatus, TrafficChannel, TrafficDirection, TrafficLogEntry,
};
use crate::notify::{Correlation, NotificationCategory, NotificationCenter, Severity};
use crate::protocol::{
    AlarmCloseData, AlarmData, AuthErrorData, CommandResultData, EventKind, HeartbeatData,
    InboundFrame, PresenceData, TrafficData,
};
use crate::store::{AlarmMatch, FleetStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Continue,
    /// The server declared the session invalid.
    InvalidateSession(SessionEnd),
}

#[derive(Clone)]
pub struct EventHandlers {
    store: Arc<RwLock<FleetStore>>,
    notifications: Arc<RwLock<NotificationCenter>>,
    clock: Arc<dyn Clock>,
    metrics: Arc<SyncMetrics>,
}

impl EventHandlers {
    pub fn new(
        store: Arc<RwLock<FleetStore>>,
        notifications: Arc<RwLock<NotificationCenter>>,
        clock: Arc<dyn Clock>,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            store,
            notifications,
            clock,
            metrics,
        }
    }

    pub async fn handle(
        &self,
        kind: EventKind,
        frame: &InboundFrame,
    ) -> Result<HandlerOutcome, SyncError> {
        match kind {
            EventKind::Heartbeat => self.on_heartbeat(frame).await?,
            EventKind::Presence(status) => self.on_presence(frame, status).await?,
            EventKind::AlarmRaised => self.on_alarm(frame).await?,
            EventKind::AlarmClosed(status) => self.on_alarm_closed(frame, status).await?,
            EventKind::Traffic(channel, direction) => {
                self.on_traffic(frame, channel, direction).await?
            }
            EventKind::CommandAck => self.on_command_result(frame, true).await,
            EventKind::CommandFailed => self.on_command_result(frame, false).await,
            EventKind::AuthError => {
                let data: AuthErrorData = frame.payload().unwrap_or_default();
                let message = data
                    .message
                    .unwrap_or_else(|| "session rejected by server".to_string());
                info!(frame_type = %frame.kind, %message, "server ended the session");
                return Ok(HandlerOutcome::InvalidateSession(
                    SessionEnd::RemoteAuthError { message },
                ));
            }
            EventKind::Pong => debug!("pong"),
        }
        Ok(HandlerOutcome::Continue)
    }

    /// Payload time, then frame time, then now.
    fn event_time(&self, payload: Option<DateTime<Utc>>, frame: &InboundFrame) -> DateTime<Utc> {
        payload
            .or(frame.timestamp)
            .unwrap_or_else(|| self.clock.now())
    }

    async fn emit(
        &self,
        category: NotificationCategory,
        severity: Severity,
        title: String,
        message: String,
        correlation: Correlation,
    ) {
        self.notifications
            .write()
            .await
            .emit(category, severity, title, message, Some(correlation));
        self.metrics.notification_emitted();
    }

    async fn on_heartbeat(&self, frame: &InboundFrame) -> Result<(), SyncError> {
        let data: HeartbeatData = frame.payload()?;
        require_device_id(&data.device_id)?;

        let mut patch = data.patch;
        if patch.is_empty() {
            debug!(device_id = %data.device_id, "heartbeat without telemetry");
        }
        // Reporting at all means the device is up.
        patch.status.get_or_insert(PresenceStatus::Online);
        if patch.last_heartbeat.is_none() {
            patch.last_heartbeat = Some(self.event_time(data.timestamp, frame));
        }

        self.store.write().await.upsert(&data.device_id, &patch);
        Ok(())
    }

    async fn on_presence(
        &self,
        frame: &InboundFrame,
        status: Option<PresenceStatus>,
    ) -> Result<(), SyncError> {
        let data: PresenceData = frame.payload()?;
        require_device_id(&data.device_id)?;
        let status = status.or(data.status).ok_or_else(|| {
            SyncError::Decode(format!("{} frame without a status", frame.kind))
        })?;

        let changed = self.store.write().await.set_presence(&data.device_id, status);
        if changed {
            debug!(device_id = %data.device_id, status = status.as_str(), "presence changed");
        }
        Ok(())
    }

    async fn on_alarm(&self, frame: &InboundFrame) -> Result<(), SyncError> {
        let data: AlarmData = frame.payload()?;
        require_device_id(&data.device_id)?;

        let created_at = self.event_time(data.timestamp, frame);
        let entry = AlarmLogEntry {
            id: data.id,
            device_id: data.device_id,
            alarm_type: data.alarm_type,
            severity: data.severity,
            message: data.message,
            status: AlarmStatus::Started,
            group: data.group,
            site: data.site,
            created_at,
            resolved_at: None,
        };
        let correlation = Correlation {
            device_id: Some(entry.device_id.clone()),
            group: entry.group.clone(),
            site: entry.site.clone(),
        };
        let title = alarm_title(&entry.alarm_type, &entry.device_id);
        let message = entry.message.clone();
        let severity = entry.severity;

        if !self.store.write().await.append_alarm(entry) {
            return Ok(());
        }
        self.emit(
            NotificationCategory::Alarm,
            severity.into(),
            title,
            message,
            correlation,
        )
        .await;
        Ok(())
    }

    async fn on_alarm_closed(
        &self,
        frame: &InboundFrame,
        status: AlarmStatus,
    ) -> Result<(), SyncError> {
        let data: AlarmCloseData = frame.payload()?;
        require_device_id(&data.device_id)?;

        let at = self.event_time(data.timestamp, frame);
        let target = AlarmMatch {
            id: data.id,
            device_id: data.device_id.clone(),
            alarm_type: data.alarm_type.clone(),
        };
        let closed = self.store.write().await.close_alarm(&target, status, at);

        let verb = match status {
            AlarmStatus::Stopped => "stopped",
            _ => "resolved",
        };
        let (alarm_type, correlation) = match &closed {
            Some(entry) => (
                entry.alarm_type.clone(),
                Correlation {
                    device_id: Some(entry.device_id.clone()),
                    group: entry.group.clone(),
                    site: entry.site.clone(),
                },
            ),
            None => {
                debug!(device_id = %data.device_id, "no matching open alarm");
                (
                    data.alarm_type.unwrap_or_else(|| "alarm".to_string()),
                    Correlation::device(data.device_id.clone()),
                )
            }
        };

        self.emit(
            NotificationCategory::Alarm,
            Severity::Info,
            format!("Alarm {verb}"),
            format!("{alarm_type} on {} {verb}", data.device_id),
            correlation,
        )
        .await;
        Ok(())
    }

    async fn on_traffic(
        &self,
        frame: &InboundFrame,
        channel: TrafficChannel,
        direction: Option<TrafficDirection>,
    ) -> Result<(), SyncError> {
        let data: TrafficData = frame.payload()?;
        require_device_id(&data.device_id)?;

        let created_at = self.event_time(data.timestamp, frame);
        let entry = TrafficLogEntry {
            id: data.id,
            message_id: data.message_id,
            device_id: data.device_id,
            channel,
            direction: direction.or(data.direction).unwrap_or_default(),
            peer: data.peer,
            content: data.content,
            slot: data.slot,
            status: data.status,
            cost: data.cost,
            delivered_at: data.delivered_at,
            error: data.error,
            created_at,
        };
        self.store.write().await.append_traffic(entry);
        Ok(())
    }

    async fn on_command_result(&self, frame: &InboundFrame, ok: bool) {
        // Acks carry nothing the store needs; a bare frame still notifies.
        let data: CommandResultData = frame.payload().unwrap_or_default();
        let command = data.command.unwrap_or_else(|| "command".to_string());
        let correlation = Correlation {
            device_id: data.device_id,
            ..Default::default()
        };

        let (severity, title, message) = if ok {
            (
                Severity::Success,
                format!("{command} acknowledged"),
                data.message.unwrap_or_else(|| "Command accepted".to_string()),
            )
        } else {
            let failure = SyncError::CommandFailure {
                command: command.clone(),
                message: data
                    .error
                    .or(data.message)
                    .unwrap_or_else(|| "no reason given".to_string()),
            };
            (Severity::Error, format!("{command} failed"), failure.to_string())
        };

        self.emit(
            NotificationCategory::Command,
            severity,
            title,
            message,
            correlation,
        )
        .await;
    }
}

fn require_device_id(device_id: &str) -> Result<(), SyncError> {
    if device_id.trim().is_empty() {
        return Err(SyncError::Decode("frame without a device_id".to_string()));
    }
    Ok(())
}

fn alarm_title(alarm_type: &str, device_id: &str) -> String {
    if alarm_type.is_empty() {
        format!("Alarm on {device_id}")
    } else {
        format!("{alarm_type} on {device_id}")
    }
}
