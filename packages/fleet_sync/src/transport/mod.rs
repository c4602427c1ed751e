//! Transport seam.
//!
//! The connection driver never awaits a socket directly. A factory opens a
//! link and everything the link observes comes back as [`TransportEvent`]s on
//! the driver's event channel, stamped with the generation of the attempt
//! that produced them.

pub mod ws;

use tokio::sync::mpsc;

use crate::auth::Credential;
use crate::error::SyncError;

pub use ws::WsTransport;

/// Close codes the driver sends or classifies.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const ABNORMAL: u16 = 1006;
    pub const POLICY_VIOLATION: u16 = 1008;
    pub const UNAUTHORIZED: u16 = 4001;
    pub const FORBIDDEN: u16 = 4003;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Where a link reports what happens to it.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::Sender<TaggedEvent>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::Sender<TaggedEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the driver is gone.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TaggedEvent {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// One open (or opening) connection.
pub trait TransportLink: Send + Sync {
    fn send(&mut self, text: String) -> Result<(), SyncError>;
    /// Close with `code`. Events reported after this are ignored by the driver.
    fn close(&mut self, code: u16, reason: &str);
}

pub trait TransportFactory: Send + Sync {
    /// Start opening a link. Must not block: the outcome arrives on `events`.
    fn open(
        &self,
        endpoint: &str,
        credential: &Credential,
        events: EventSink,
    ) -> Box<dyn TransportLink>;
}
