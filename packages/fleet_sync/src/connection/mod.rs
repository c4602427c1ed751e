//! Connection lifecycle: state, close classification and the driver task.

mod driver;

use serde::{Deserialize, Serialize};

pub use driver::{FleetSync, FleetSyncBuilder, SessionCallback, Visibility};

use crate::transport::close_code;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Observable connection status, published on a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Reconnect attempts since the last successful open.
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Clean close; stay disconnected.
    Normal,
    /// The server rejected the credential; end the session.
    AuthFailure,
    /// Anything else; eligible for a bounded retry.
    Transient,
}

const AUTH_REASON_MARKERS: &[&str] = &[
    "unauthorized",
    "authentication",
    "token expired",
    "invalid token",
];

pub fn classify_close(code: u16, reason: &str) -> CloseClass {
    match code {
        close_code::NORMAL => CloseClass::Normal,
        close_code::UNAUTHORIZED | close_code::FORBIDDEN | close_code::POLICY_VIOLATION => {
            CloseClass::AuthFailure
        }
        _ => {
            let reason = reason.to_ascii_lowercase();
            if AUTH_REASON_MARKERS.iter().any(|m| reason.contains(m)) {
                CloseClass::AuthFailure
            } else {
                CloseClass::Transient
            }
        }
    }
}
