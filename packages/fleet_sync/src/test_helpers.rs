use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, watch};

use crate::auth::{AuthProvider, Clock, Credential, SessionEnd};
use crate::config::SyncConfig;
use crate::connection::{FleetSync, SessionCallback, Visibility};
use crate::error::SyncError;
use crate::handlers::EventHandlers;
use crate::metrics::SyncMetrics;
use crate::notify::{DEFAULT_CAPACITY, DEFAULT_DISMISS_AFTER, NotificationCenter};
use crate::store::FleetStore;
use crate::transport::{EventSink, TransportEvent, TransportFactory, TransportLink};

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// 2023-11-14T22:13:20Z
    pub fn epoch() -> Self {
        Self(DateTime::from_timestamp(1_700_000_000, 0).expect("valid timestamp"))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The shared state handlers write into, without a driver around it.
pub struct EngineParts {
    pub store: Arc<RwLock<FleetStore>>,
    pub notifications: Arc<RwLock<NotificationCenter>>,
    pub metrics: Arc<SyncMetrics>,
    pub clock: Arc<dyn Clock>,
}

impl EngineParts {
    pub fn handlers(&self) -> EventHandlers {
        EventHandlers::new(
            self.store.clone(),
            self.notifications.clone(),
            self.clock.clone(),
            self.metrics.clone(),
        )
    }
}

pub fn engine_parts(clock: Arc<dyn Clock>) -> EngineParts {
    EngineParts {
        store: Arc::new(RwLock::new(FleetStore::new())),
        notifications: Arc::new(RwLock::new(NotificationCenter::new(
            DEFAULT_CAPACITY,
            DEFAULT_DISMISS_AFTER,
            clock.clone(),
        ))),
        metrics: Arc::new(SyncMetrics::new()),
        clock,
    }
}

// =============================================================================
// In-memory transport
// =============================================================================

#[derive(Debug, Clone)]
pub struct OpenRecord {
    pub endpoint: String,
    pub token: String,
    pub generation: u64,
}

#[derive(Default)]
struct MockState {
    opens: Vec<OpenRecord>,
    sinks: Vec<EventSink>,
    sent: Vec<String>,
    closes: Vec<(u16, String)>,
}

/// Records every open, send and close. Tests drive the far side by emitting
/// events on the most recently opened link.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl TransportLink for MockLink {
    fn send(&mut self, text: String) -> Result<(), SyncError> {
        self.state.lock().unwrap().sent.push(text);
        Ok(())
    }

    fn close(&mut self, code: u16, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .closes
            .push((code, reason.to_string()));
    }
}

impl TransportFactory for MockTransport {
    fn open(
        &self,
        endpoint: &str,
        credential: &Credential,
        events: EventSink,
    ) -> Box<dyn TransportLink> {
        let mut state = self.state.lock().unwrap();
        state.opens.push(OpenRecord {
            endpoint: endpoint.to_string(),
            token: credential.token.clone(),
            generation: events.generation(),
        });
        state.sinks.push(events);
        Box::new(MockLink {
            state: self.state.clone(),
        })
    }
}

impl MockTransport {
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().opens.len()
    }

    pub fn opens(&self) -> Vec<OpenRecord> {
        self.state.lock().unwrap().opens.clone()
    }

    pub fn sent(&self) -> Vec<serde_json::Value> {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent frames are json"))
            .collect()
    }

    pub fn closes(&self) -> Vec<(u16, String)> {
        self.state.lock().unwrap().closes.clone()
    }

    /// Emit on the latest link.
    pub async fn emit(&self, event: TransportEvent) {
        let sink = self
            .state
            .lock()
            .unwrap()
            .sinks
            .last()
            .cloned()
            .expect("no link opened");
        sink.emit(event).await;
    }

    pub async fn accept(&self) {
        self.emit(TransportEvent::Opened).await;
    }

    pub async fn close(&self, code: u16, reason: &str) {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        })
        .await;
    }

    pub async fn deliver(&self, frame: serde_json::Value) {
        self.emit(TransportEvent::Message(frame.to_string())).await;
    }
}

// =============================================================================
// Auth
// =============================================================================

pub struct RecordingAuth {
    credential: Mutex<Option<Credential>>,
    expired: AtomicBool,
    logouts: AtomicUsize,
}

impl RecordingAuth {
    pub fn new(credential: Option<Credential>) -> Arc<Self> {
        Arc::new(Self {
            credential: Mutex::new(credential),
            expired: AtomicBool::new(false),
            logouts: AtomicUsize::new(0),
        })
    }

    pub fn set_expired(&self, expired: bool) {
        self.expired.store(expired, Ordering::SeqCst);
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

impl AuthProvider for RecordingAuth {
    fn current_credential(&self) -> Option<Credential> {
        self.credential.lock().unwrap().clone()
    }

    fn is_expired(&self, _credential: &Credential) -> bool {
        self.expired.load(Ordering::SeqCst)
    }

    fn logout(&self) {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        *self.credential.lock().unwrap() = None;
    }
}

// =============================================================================
// Engine harness
// =============================================================================

pub fn token() -> Credential {
    Credential::new("test-token", None)
}

pub struct Harness {
    pub engine: FleetSync,
    pub transport: MockTransport,
    pub auth: Arc<RecordingAuth>,
    pub sessions: Arc<Mutex<Vec<SessionEnd>>>,
    pub visibility: watch::Sender<Visibility>,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        let transport = MockTransport::default();
        let auth = RecordingAuth::new(Some(token()));
        let sessions = Arc::new(Mutex::new(Vec::new()));
        let (visibility, visibility_rx) = watch::channel(Visibility::Foreground);

        let recorded = sessions.clone();
        let callback: SessionCallback =
            Arc::new(move |end: SessionEnd| recorded.lock().unwrap().push(end));

        let engine = FleetSync::builder(config, auth.clone(), Arc::new(transport.clone()))
            .clock(Arc::new(FixedClock::epoch()))
            .foreground_signal(visibility_rx)
            .on_session_end(callback)
            .spawn();

        Self {
            engine,
            transport,
            auth,
            sessions,
            visibility,
        }
    }

    pub fn sessions(&self) -> Vec<SessionEnd> {
        self.sessions.lock().unwrap().clone()
    }

    /// Connect and complete the handshake.
    pub async fn connected(config: SyncConfig) -> Self {
        let harness = Self::new(config);
        harness.engine.connect(token()).await.unwrap();
        harness.transport.accept().await;
        settle().await;
        harness
    }
}

/// Let the driver task drain its queues.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
