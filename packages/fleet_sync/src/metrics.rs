//! Engine metrics for observability
//!
//! Counters are updated from the connection driver and read through a
//! serializable snapshot.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    // Connection metrics
    /// Transport open attempts, including the first
    pub connect_attempts: AtomicU64,
    /// Opens that reached the connected state
    pub connections_opened: AtomicU64,
    /// Reconnect timers that fired
    pub reconnect_attempts: AtomicU64,
    /// Terminal auth failures (expired, rejected or remote auth error)
    pub auth_failures: AtomicU64,

    // Message metrics
    /// Frames received from the server
    pub frames_received: AtomicU64,
    /// Frames that failed to decode
    pub decode_errors: AtomicU64,
    /// Frames with no built-in handler
    pub unknown_types: AtomicU64,
    /// Keepalive pings sent
    pub pings_sent: AtomicU64,
    /// Device commands forwarded to the server
    pub commands_sent: AtomicU64,
    /// Commands rejected because no connection was open
    pub commands_rejected: AtomicU64,

    /// Notifications emitted by handlers and the driver
    pub notifications_emitted: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_attempted(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect_attempted(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn unknown_type(&self) {
        self.unknown_types.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ping_sent(&self) {
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn notification_emitted(&self) {
        self.notifications_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connection: ConnectionMetrics {
                attempts: self.connect_attempts.load(Ordering::Relaxed),
                opened: self.connections_opened.load(Ordering::Relaxed),
                reconnects: self.reconnect_attempts.load(Ordering::Relaxed),
                auth_failures: self.auth_failures.load(Ordering::Relaxed),
            },
            frames: FrameMetrics {
                received: self.frames_received.load(Ordering::Relaxed),
                decode_errors: self.decode_errors.load(Ordering::Relaxed),
                unknown_types: self.unknown_types.load(Ordering::Relaxed),
                pings_sent: self.pings_sent.load(Ordering::Relaxed),
                commands_sent: self.commands_sent.load(Ordering::Relaxed),
                commands_rejected: self.commands_rejected.load(Ordering::Relaxed),
            },
            notifications_emitted: self.notifications_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub connection: ConnectionMetrics,
    pub frames: FrameMetrics,
    pub notifications_emitted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub attempts: u64,
    pub opened: u64,
    pub reconnects: u64,
    pub auth_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub received: u64,
    pub decode_errors: u64,
    pub unknown_types: u64,
    pub pings_sent: u64,
    pub commands_sent: u64,
    pub commands_rejected: u64,
}
