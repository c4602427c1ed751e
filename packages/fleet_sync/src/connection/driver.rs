use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CloseClass, ConnectionState, ConnectionStatus, classify_close};
use crate::auth::{AuthProvider, Clock, Credential, SessionEnd, SystemClock};
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::handlers::{EventHandlers, HandlerOutcome};
use crate::metrics::{MetricsSnapshot, SyncMetrics};
use crate::notify::{NotificationCategory, NotificationCenter, Severity};
use crate::protocol::{DeviceCommand, OutboundFrame};
use crate::router::{FrameCallback, MessageRouter, SubscriberRegistry, Subscription};
use crate::store::FleetStore;
use crate::transport::{
    EventSink, TaggedEvent, TransportEvent, TransportFactory, TransportLink, close_code,
};

/// Called once when the session ends for good (expired, rejected or revoked).
pub type SessionCallback = Arc<dyn Fn(SessionEnd) + Send + Sync>;

/// Host application visibility, fed in by whoever knows it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

enum DriverCommand {
    Connect {
        credential: Option<Credential>,
        respond_to: oneshot::Sender<()>,
    },
    Disconnect {
        respond_to: oneshot::Sender<()>,
    },
    Reconnect {
        respond_to: oneshot::Sender<()>,
    },
    Send {
        command: DeviceCommand,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

pub struct FleetSyncBuilder {
    config: SyncConfig,
    auth: Arc<dyn AuthProvider>,
    transport: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
    foreground: Option<watch::Receiver<Visibility>>,
    on_session_end: Option<SessionCallback>,
}

impl FleetSyncBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Reconnect when the host returns to the foreground with the transport
    /// closed.
    pub fn foreground_signal(mut self, signal: watch::Receiver<Visibility>) -> Self {
        self.foreground = Some(signal);
        self
    }

    pub fn on_session_end(mut self, callback: SessionCallback) -> Self {
        self.on_session_end = Some(callback);
        self
    }

    /// Spawn the driver task. Requires a tokio runtime.
    pub fn spawn(self) -> FleetSync {
        let metrics = Arc::new(SyncMetrics::new());
        let store = Arc::new(RwLock::new(FleetStore::new()));
        let notifications = Arc::new(RwLock::new(NotificationCenter::new(
            self.config.notification_capacity,
            self.config.alert_dismiss_after(),
            self.clock.clone(),
        )));
        let subscribers = SubscriberRegistry::new();
        let handlers = EventHandlers::new(
            store.clone(),
            notifications.clone(),
            self.clock.clone(),
            metrics.clone(),
        );
        let router = MessageRouter::new(subscribers.clone(), handlers, metrics.clone());

        let (command_tx, command_rx) = mpsc::channel(self.config.command_buffer.max(1));
        let (event_tx, event_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let cancel = CancellationToken::new();

        let driver = Driver {
            config: self.config,
            auth: self.auth,
            transport: self.transport,
            clock: self.clock,
            router,
            metrics: metrics.clone(),
            notifications: notifications.clone(),
            on_session_end: self.on_session_end,
            status_tx,
            event_tx,
            link: None,
            generation: 0,
            credential: None,
            manual_disconnect: false,
            session_ended: false,
            retry_at: None,
            next_ping: None,
            pong_deadline: None,
        };
        tokio::spawn(driver.run(command_rx, event_rx, self.foreground, cancel.clone()));

        FleetSync {
            commands: command_tx,
            status: status_rx,
            store,
            notifications,
            subscribers,
            metrics,
            cancel,
        }
    }
}

/// Handle to the sync engine. Cheap to clone; the driver task stops when
/// `shutdown` is called or every handle is dropped.
#[derive(Clone)]
pub struct FleetSync {
    commands: mpsc::Sender<DriverCommand>,
    status: watch::Receiver<ConnectionStatus>,
    store: Arc<RwLock<FleetStore>>,
    notifications: Arc<RwLock<NotificationCenter>>,
    subscribers: SubscriberRegistry,
    metrics: Arc<SyncMetrics>,
    cancel: CancellationToken,
}

impl FleetSync {
    pub fn builder(
        config: SyncConfig,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn TransportFactory>,
    ) -> FleetSyncBuilder {
        FleetSyncBuilder {
            config,
            auth,
            transport,
            clock: Arc::new(SystemClock),
            foreground: None,
            on_session_end: None,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> DriverCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Connect with `credential`. A no-op while connecting or connected.
    pub async fn connect(&self, credential: Credential) -> Result<()> {
        self.request(|respond_to| DriverCommand::Connect {
            credential: Some(credential),
            respond_to,
        })
        .await
    }

    /// Connect with the auth provider's current credential, or the last one
    /// used.
    pub async fn connect_current(&self) -> Result<()> {
        self.request(|respond_to| DriverCommand::Connect {
            credential: None,
            respond_to,
        })
        .await
    }

    /// Close intentionally. No reconnect follows.
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|respond_to| DriverCommand::Disconnect { respond_to })
            .await
    }

    /// Close whatever is open and connect again.
    pub async fn reconnect(&self) -> Result<()> {
        self.request(|respond_to| DriverCommand::Reconnect { respond_to })
            .await
    }

    /// Forward a device command. Fails with `NotConnected` unless connected.
    pub async fn send_command(&self, command: DeviceCommand) -> Result<()> {
        self.request(|respond_to| DriverCommand::Send {
            command,
            respond_to,
        })
        .await?
    }

    /// Disconnect and stop the driver task.
    pub async fn shutdown(&self) {
        let _ = self
            .request(|respond_to| DriverCommand::Shutdown { respond_to })
            .await;
        self.cancel.cancel();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn store(&self) -> Arc<RwLock<FleetStore>> {
        self.store.clone()
    }

    pub fn notifications(&self) -> Arc<RwLock<NotificationCenter>> {
        self.notifications.clone()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub async fn subscribe(
        &self,
        frame_type: impl Into<String>,
        callback: FrameCallback,
    ) -> Subscription {
        self.subscribers.subscribe(frame_type, callback).await
    }

    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.subscribers.unsubscribe(subscription).await
    }
}

struct Driver {
    config: SyncConfig,
    auth: Arc<dyn AuthProvider>,
    transport: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
    router: MessageRouter,
    metrics: Arc<SyncMetrics>,
    notifications: Arc<RwLock<NotificationCenter>>,
    on_session_end: Option<SessionCallback>,
    status_tx: watch::Sender<ConnectionStatus>,
    event_tx: mpsc::Sender<TaggedEvent>,

    link: Option<Box<dyn TransportLink>>,
    /// Bumped on every open and every intentional close; events carrying an
    /// older generation are dropped.
    generation: u64,
    credential: Option<Credential>,
    manual_disconnect: bool,
    /// Guards the logout side effects so they run once per session.
    session_ended: bool,

    retry_at: Option<Instant>,
    next_ping: Option<Instant>,
    pong_deadline: Option<Instant>,
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolves with the new visibility; pends forever once the sender is gone.
async fn visibility_change(signal: &mut Option<watch::Receiver<Visibility>>) -> Visibility {
    let Some(rx) = signal.as_mut() else {
        return std::future::pending().await;
    };
    match rx.changed().await {
        Ok(()) => *rx.borrow_and_update(),
        Err(_) => {
            *signal = None;
            std::future::pending().await
        }
    }
}

impl Driver {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<DriverCommand>,
        mut events: mpsc::Receiver<TaggedEvent>,
        mut foreground: Option<watch::Receiver<Visibility>>,
        cancel: CancellationToken,
    ) {
        debug!(url = %self.config.url, "sync driver started");
        loop {
            let retry_at = self.retry_at;
            let next_ping = self.next_ping;
            let pong_deadline = self.pong_deadline;

            tokio::select! {
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(DriverCommand::Shutdown { respond_to }) => {
                        self.disconnect();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(tagged) = events.recv() => self.handle_event(tagged).await,
                _ = wait_until(retry_at) => self.fire_reconnect().await,
                _ = wait_until(next_ping) => self.send_ping(),
                _ = wait_until(pong_deadline) => self.pong_timed_out().await,
                visibility = visibility_change(&mut foreground) => {
                    if visibility == Visibility::Foreground {
                        self.resume_foreground().await;
                    }
                }
            }
        }
        self.drop_link(close_code::GOING_AWAY, "client shutdown");
        debug!("sync driver stopped");
    }

    async fn handle_command(&mut self, command: DriverCommand) {
        match command {
            DriverCommand::Connect {
                credential,
                respond_to,
            } => {
                self.connect(credential).await;
                let _ = respond_to.send(());
            }
            DriverCommand::Disconnect { respond_to } => {
                self.disconnect();
                let _ = respond_to.send(());
            }
            DriverCommand::Reconnect { respond_to } => {
                self.reconnect().await;
                let _ = respond_to.send(());
            }
            DriverCommand::Send {
                command,
                respond_to,
            } => {
                let _ = respond_to.send(self.send_command(command));
            }
            // Handled by the run loop.
            DriverCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    fn state(&self) -> ConnectionState {
        self.status_tx.borrow().state
    }

    fn set_status(&self, state: ConnectionState, last_error: Option<String>) {
        self.status_tx.send_modify(|status| {
            status.state = state;
            status.last_error = last_error;
        });
    }

    fn retry_count(&self) -> u32 {
        self.status_tx.borrow().retry_count
    }

    fn set_retry_count(&self, retry_count: u32) {
        self.status_tx
            .send_modify(|status| status.retry_count = retry_count);
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn connect(&mut self, credential: Option<Credential>) {
        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            debug!("connect ignored, already connecting or connected");
            return;
        }

        let credential = credential
            .or_else(|| self.auth.current_credential())
            .or_else(|| self.credential.clone());
        let Some(credential) = credential else {
            warn!("connect requested without a credential");
            self.set_status(
                ConnectionState::Disconnected,
                Some("no credential available".to_string()),
            );
            return;
        };

        self.manual_disconnect = false;
        self.session_ended = false;
        self.retry_at = None;
        self.set_retry_count(0);
        self.credential = Some(credential);
        self.open().await;
    }

    /// Open a link with the stored credential, checking expiry first.
    async fn open(&mut self) {
        let Some(credential) = self.credential.clone() else {
            self.set_status(
                ConnectionState::Disconnected,
                Some("no credential available".to_string()),
            );
            return;
        };
        if self.auth.is_expired(&credential) {
            self.end_session(SessionEnd::Expired).await;
            return;
        }

        // Replace anything still half-open (e.g. an errored link whose close
        // never arrived).
        self.drop_link(close_code::NORMAL, "superseded");
        self.generation += 1;
        self.metrics.connect_attempted();
        info!(
            generation = self.generation,
            attempt = self.retry_count(),
            url = %self.config.url,
            "connecting"
        );
        self.status_tx
            .send_modify(|status| status.state = ConnectionState::Connecting);

        let sink = EventSink::new(self.generation, self.event_tx.clone());
        self.link = Some(self.transport.open(&self.config.url, &credential, sink));
    }

    fn disconnect(&mut self) {
        self.manual_disconnect = true;
        self.clear_timers();
        self.drop_link(close_code::NORMAL, "client disconnect");
        self.set_retry_count(0);
        self.set_status(ConnectionState::Disconnected, None);
        info!("disconnected");
    }

    async fn reconnect(&mut self) {
        info!("forced reconnect");
        self.clear_timers();
        self.drop_link(close_code::NORMAL, "client reconnect");
        self.set_status(ConnectionState::Disconnected, None);
        self.connect(None).await;
    }

    async fn resume_foreground(&mut self) {
        if self.manual_disconnect
            || matches!(
                self.state(),
                ConnectionState::Connecting | ConnectionState::Connected
            )
        {
            return;
        }
        if self.credential.is_none() && self.auth.current_credential().is_none() {
            debug!("foreground resume without a credential");
            return;
        }
        info!("foreground resume, reconnecting");
        self.connect(None).await;
    }

    async fn fire_reconnect(&mut self) {
        self.retry_at = None;
        self.metrics.reconnect_attempted();
        self.open().await;
    }

    /// Close the current link (if any) and make its pending events stale.
    fn drop_link(&mut self, code: u16, reason: &str) {
        if let Some(mut link) = self.link.take() {
            link.close(code, reason);
            self.generation += 1;
        }
        self.next_ping = None;
        self.pong_deadline = None;
    }

    fn clear_timers(&mut self) {
        self.retry_at = None;
        self.next_ping = None;
        self.pong_deadline = None;
    }

    /// Terminal auth failure: log out once, tell the host, stay disconnected.
    async fn end_session(&mut self, reason: SessionEnd) {
        self.clear_timers();
        self.drop_link(close_code::NORMAL, "session ended");
        self.credential = None;
        self.set_retry_count(0);

        let error = match &reason {
            SessionEnd::Expired => SyncError::SessionExpired,
            SessionEnd::Rejected { reason } => SyncError::AuthFailure {
                reason: reason.clone(),
            },
            SessionEnd::RemoteAuthError { message } => SyncError::AuthFailure {
                reason: message.clone(),
            },
        };
        warn!(code = error.error_code(), "session ended: {error}");
        self.set_status(ConnectionState::Disconnected, Some(error.to_string()));

        if self.session_ended {
            return;
        }
        self.session_ended = true;
        self.metrics.auth_failed();
        self.auth.logout();
        self.notify_connection(
            NotificationCategory::Session,
            Severity::Warning,
            "Session ended",
            error.to_string(),
        )
        .await;
        if let Some(callback) = &self.on_session_end {
            callback(reason);
        }
    }

    async fn notify_connection(
        &self,
        category: NotificationCategory,
        severity: Severity,
        title: &str,
        message: String,
    ) {
        self.notifications
            .write()
            .await
            .emit(category, severity, title, message, None);
        self.metrics.notification_emitted();
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    async fn handle_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation {
            debug!(
                generation = tagged.generation,
                current = self.generation,
                "stale transport event"
            );
            return;
        }

        match tagged.event {
            TransportEvent::Opened => {
                self.metrics.connection_opened();
                self.status_tx.send_modify(|status| {
                    status.state = ConnectionState::Connected;
                    status.retry_count = 0;
                    status.last_error = None;
                });
                self.next_ping = Some(Instant::now() + self.config.heartbeat_interval());
                self.pong_deadline = None;
                info!(generation = self.generation, "connected");
            }
            TransportEvent::Message(text) => {
                self.metrics.frame_received();
                // Any inbound traffic proves the link is alive.
                self.pong_deadline = None;
                if let HandlerOutcome::InvalidateSession(reason) = self.router.route(&text).await {
                    self.end_session(reason).await;
                }
            }
            TransportEvent::Error(message) => {
                warn!(error = %message, "transport error");
                let state = match self.state() {
                    ConnectionState::Connected => ConnectionState::Error,
                    _ => ConnectionState::Disconnected,
                };
                self.set_status(state, Some(SyncError::Transport(message).to_string()));
            }
            TransportEvent::Closed { code, reason } => {
                self.link = None;
                self.next_ping = None;
                self.pong_deadline = None;
                self.on_closed(code, &reason).await;
            }
        }
    }

    async fn on_closed(&mut self, code: u16, reason: &str) {
        match classify_close(code, reason) {
            CloseClass::Normal => {
                info!(code, "connection closed");
                self.set_retry_count(0);
                self.set_status(ConnectionState::Disconnected, None);
            }
            CloseClass::AuthFailure => {
                let reason = if reason.is_empty() {
                    format!("closed with code {code}")
                } else {
                    reason.to_string()
                };
                self.end_session(SessionEnd::Rejected { reason }).await;
            }
            CloseClass::Transient => {
                let error = SyncError::Transport(if reason.is_empty() {
                    format!("connection closed with code {code}")
                } else {
                    format!("connection closed with code {code}: {reason}")
                });
                let attempts = self.retry_count();
                if attempts < self.config.max_reconnect_attempts {
                    let attempt = attempts + 1;
                    warn!(
                        code,
                        attempt,
                        max = self.config.max_reconnect_attempts,
                        "connection lost, scheduling reconnect"
                    );
                    self.set_retry_count(attempt);
                    self.set_status(ConnectionState::Disconnected, Some(error.to_string()));
                    self.retry_at = Some(Instant::now() + self.config.reconnect_delay());
                } else {
                    error!(code, attempts, "giving up on reconnecting");
                    let message = format!("gave up after {attempts} reconnect attempts: {error}");
                    self.set_status(ConnectionState::Disconnected, Some(message.clone()));
                    self.notify_connection(
                        NotificationCategory::Connection,
                        Severity::Error,
                        "Connection lost",
                        message,
                    )
                    .await;
                }
            }
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn send_frame(&mut self, frame: &OutboundFrame) -> Result<()> {
        let text = frame.encode()?;
        let link = self.link.as_mut().ok_or(SyncError::NotConnected)?;
        link.send(text)
    }

    fn send_ping(&mut self) {
        self.next_ping = Some(Instant::now() + self.config.heartbeat_interval());
        if self.state() != ConnectionState::Connected {
            return;
        }
        let ping = OutboundFrame::Ping {
            timestamp: self.clock.now(),
        };
        match self.send_frame(&ping) {
            Ok(()) => {
                self.metrics.ping_sent();
                if let Some(timeout) = self.config.pong_timeout() {
                    self.pong_deadline
                        .get_or_insert_with(|| Instant::now() + timeout);
                }
            }
            Err(e) => warn!(error = %e, "failed to send keepalive"),
        }
    }

    async fn pong_timed_out(&mut self) {
        warn!("keepalive unanswered, dropping connection");
        self.drop_link(close_code::GOING_AWAY, "keepalive timeout");
        self.on_closed(close_code::ABNORMAL, "keepalive timeout")
            .await;
    }

    fn send_command(&mut self, command: DeviceCommand) -> Result<()> {
        if self.state() != ConnectionState::Connected {
            self.metrics.command_rejected();
            return Err(SyncError::NotConnected);
        }
        let name = command.name();
        let device_id = command.device_id().to_string();
        self.send_frame(&OutboundFrame::Command(command))?;
        self.metrics.command_sent();
        info!(command = name, device_id = %device_id, "command sent");
        Ok(())
    }
}
