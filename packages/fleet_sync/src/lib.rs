//! Real-time synchronization engine for a fleet of SIM gateway devices.
//!
//! A single driver task owns the WebSocket connection to the gateway server.
//! Inbound frames are routed to external subscribers and built-in handlers,
//! which merge device state into a live [`FleetStore`] and raise
//! [`Notification`]s. The host talks to the driver through a cloneable
//! [`FleetSync`] handle.
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleet_sync::{Credential, FleetSync, SyncConfig, SystemClock, TokenAuth, WsTransport};
//!
//! # async fn demo() -> fleet_sync::Result<()> {
//! let credential = Credential::new("token", None);
//! let auth = Arc::new(TokenAuth::new(credential.clone(), chrono::Duration::seconds(30), SystemClock));
//! let engine = FleetSync::builder(SyncConfig::default(), auth, Arc::new(WsTransport::new())).spawn();
//! engine.connect(credential).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod connection;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod protocol;
pub mod reconcile;
pub mod router;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use auth::{AuthProvider, Clock, Credential, SessionEnd, SystemClock, TokenAuth};
pub use config::SyncConfig;
pub use connection::{
    CloseClass, ConnectionState, ConnectionStatus, FleetSync, FleetSyncBuilder, SessionCallback,
    Visibility, classify_close,
};
pub use error::{Result, SyncError};
pub use metrics::MetricsSnapshot;
pub use model::{
    AlarmLogEntry, AlarmSeverity, AlarmStatus, DevicePatch, DeviceRecord, PresenceStatus,
    SimSlotSummary, TrafficChannel, TrafficDirection, TrafficLogEntry,
};
pub use notify::{Alert, Correlation, Notification, NotificationCategory, NotificationCenter};
pub use protocol::{DeviceCommand, InboundFrame};
pub use reconcile::{LogIdentity, dedup_logs, merge_devices};
pub use router::{FrameCallback, Subscription};
pub use store::{FleetStore, StoreChange};
pub use transport::{TransportFactory, WsTransport};
