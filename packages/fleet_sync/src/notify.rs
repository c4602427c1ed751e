//! Notification feed.
//!
//! A bounded, most-recent-first list of notifications plus an ephemeral alert
//! channel. Critical alerts never auto-dismiss; everything else carries the
//! configured dismiss duration.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::auth::Clock;
use crate::model::AlarmSeverity;

/// Default number of notifications kept.
pub const DEFAULT_CAPACITY: usize = 100;

/// Default lifetime of a dismissable alert.
pub const DEFAULT_DISMISS_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Alarm,
    Device,
    Command,
    Connection,
    Session,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

impl From<AlarmSeverity> for Severity {
    fn from(severity: AlarmSeverity) -> Self {
        match severity {
            AlarmSeverity::Info => Severity::Info,
            AlarmSeverity::Warning => Severity::Warning,
            AlarmSeverity::Error => Severity::Error,
            AlarmSeverity::Critical => Severity::Critical,
        }
    }
}

/// Optional link from a notification back to the fleet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correlation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site: Option<String>,
}

impl Correlation {
    pub fn device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub category: NotificationCategory,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(default)]
    pub correlation: Correlation,
}

/// Ephemeral user-facing alert. `dismiss_after == None` means it stays until
/// the user closes it.
#[derive(Debug, Clone)]
pub struct Alert {
    pub notification: Notification,
    pub dismiss_after: Option<Duration>,
}

pub struct NotificationCenter {
    items: VecDeque<Notification>,
    capacity: usize,
    dismiss_after: Duration,
    clock: Arc<dyn Clock>,
    alert_tx: broadcast::Sender<Alert>,
}

impl NotificationCenter {
    pub fn new(capacity: usize, dismiss_after: Duration, clock: Arc<dyn Clock>) -> Self {
        let (alert_tx, _) = broadcast::channel(64);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            dismiss_after,
            clock,
            alert_tx,
        }
    }

    /// Subscribe to ephemeral alerts.
    pub fn alerts(&self) -> broadcast::Receiver<Alert> {
        self.alert_tx.subscribe()
    }

    /// Record a notification and raise its alert. Returns the stored entry.
    pub fn emit(
        &mut self,
        category: NotificationCategory,
        severity: Severity,
        title: impl Into<String>,
        message: impl Into<String>,
        correlation: Option<Correlation>,
    ) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            category,
            severity,
            title: title.into(),
            message: message.into(),
            timestamp: self.clock.now(),
            read: false,
            correlation: correlation.unwrap_or_default(),
        };

        self.items.push_front(notification.clone());
        self.items.truncate(self.capacity);

        let dismiss_after = match severity {
            Severity::Critical => None,
            _ => Some(self.dismiss_after),
        };
        let _ = self.alert_tx.send(Alert {
            notification: notification.clone(),
            dismiss_after,
        });

        notification
    }

    /// Returns false when no notification has that id.
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        for notification in self.items.iter_mut() {
            notification.read = true;
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<Notification> {
        let index = self.items.iter().position(|n| n.id == id)?;
        self.items.remove(index)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Most recent first.
    pub fn list(&self) -> impl Iterator<Item = &Notification> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FixedClock;

    fn center() -> NotificationCenter {
        NotificationCenter::new(
            DEFAULT_CAPACITY,
            DEFAULT_DISMISS_AFTER,
            Arc::new(FixedClock::epoch()),
        )
    }

    fn info(center: &mut NotificationCenter, n: usize) -> Notification {
        center.emit(
            NotificationCategory::Device,
            Severity::Info,
            format!("n{n}"),
            "msg",
            None,
        )
    }

    #[test]
    fn keeps_the_hundred_most_recent_first() {
        let mut center = center();
        for n in 0..150 {
            info(&mut center, n);
        }
        assert_eq!(center.len(), 100);
        let titles: Vec<&str> = center.list().map(|n| n.title.as_str()).collect();
        assert_eq!(titles[0], "n149");
        assert_eq!(titles[99], "n50");
    }

    #[test]
    fn read_state_operations() {
        let mut center = center();
        let a = info(&mut center, 1);
        let b = info(&mut center, 2);
        assert_eq!(center.unread_count(), 2);

        assert!(center.mark_read(&a.id));
        assert!(!center.mark_read("missing"));
        assert_eq!(center.unread_count(), 1);

        center.mark_all_read();
        assert_eq!(center.unread_count(), 0);

        assert_eq!(center.remove(&b.id).map(|n| n.title), Some("n2".to_string()));
        assert!(center.remove(&b.id).is_none());
        assert_eq!(center.len(), 1);

        center.clear();
        assert!(center.is_empty());
    }

    #[test]
    fn critical_alerts_never_auto_dismiss() {
        let mut center = center();
        let mut alerts = center.alerts();

        center.emit(
            NotificationCategory::Alarm,
            Severity::Critical,
            "Device offline",
            "D1 stopped reporting",
            Some(Correlation::device("D1")),
        );
        center.emit(
            NotificationCategory::Command,
            Severity::Success,
            "SMS sent",
            "ok",
            None,
        );

        let critical = alerts.try_recv().unwrap();
        assert_eq!(critical.dismiss_after, None);
        assert_eq!(
            critical.notification.correlation.device_id.as_deref(),
            Some("D1")
        );
        let success = alerts.try_recv().unwrap();
        assert_eq!(success.dismiss_after, Some(DEFAULT_DISMISS_AFTER));
    }

    #[test]
    fn alarm_severity_maps_onto_notification_severity() {
        assert_eq!(Severity::from(AlarmSeverity::Critical), Severity::Critical);
        assert_eq!(Severity::from(AlarmSeverity::Info), Severity::Info);
    }

    #[test]
    fn timestamps_come_from_the_clock() {
        let mut center = center();
        let n = info(&mut center, 0);
        assert_eq!(n.timestamp, FixedClock::epoch().now());
    }
}
