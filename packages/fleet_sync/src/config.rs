use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::notify::{DEFAULT_CAPACITY, DEFAULT_DISMISS_AFTER};

/// Engine tunables. Every field has a default, so a partial TOML table or a
/// handful of environment variables is enough to configure it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// WebSocket endpoint of the gateway server.
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Force a reconnect when a ping goes unanswered this long. Off when unset.
    #[serde(default)]
    pub pong_timeout_secs: Option<u64>,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_alert_dismiss_secs")]
    pub alert_dismiss_secs: u64,
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            pong_timeout_secs: None,
            notification_capacity: default_notification_capacity(),
            alert_dismiss_secs: default_alert_dismiss_secs(),
            command_buffer: default_command_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SyncConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    /// `None` disables half-open detection. Zero counts as disabled.
    pub fn pong_timeout(&self) -> Option<Duration> {
        self.pong_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn alert_dismiss_after(&self) -> Duration {
        Duration::from_secs(self.alert_dismiss_secs)
    }
}

fn default_url() -> String {
    "ws://127.0.0.1:8080/ws".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_reconnect_delay_secs() -> u64 {
    3
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_notification_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_alert_dismiss_secs() -> u64 {
    DEFAULT_DISMISS_AFTER.as_secs()
}

fn default_command_buffer() -> usize {
    64
}

fn default_event_buffer() -> usize {
    256
}
