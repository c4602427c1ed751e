//! Inbound frame routing.
//!
//! Every decoded frame goes to the external subscribers registered for its
//! type (in registration order), then to at most one built-in handler.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::handlers::{EventHandlers, HandlerOutcome};
use crate::metrics::SyncMetrics;
use crate::protocol::{EventKind, InboundFrame};

pub type FrameCallback = Arc<dyn Fn(&InboundFrame) + Send + Sync>;

/// Handle returned by `subscribe`; pass it back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: String,
    id: u64,
}

impl Subscription {
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    by_kind: HashMap<String, Vec<(u64, FrameCallback)>>,
}

/// Shared between the engine handle (which registers) and the router (which
/// calls).
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, kind: impl Into<String>, callback: FrameCallback) -> Subscription {
        let kind = kind.into();
        let mut registry = self.inner.write().await;
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .by_kind
            .entry(kind.clone())
            .or_default()
            .push((id, callback));
        Subscription { kind, id }
    }

    /// Removes exactly the callback behind `subscription`. Returns false if it
    /// was already gone.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let mut registry = self.inner.write().await;
        let Some(callbacks) = registry.by_kind.get_mut(&subscription.kind) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != subscription.id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            registry.by_kind.remove(&subscription.kind);
        }
        removed
    }

    /// Invoke the callbacks for the frame's type. Returns how many ran.
    pub async fn notify(&self, frame: &InboundFrame) -> usize {
        // Snapshot so callbacks run without the lock held.
        let callbacks: Vec<FrameCallback> = {
            let registry = self.inner.read().await;
            match registry.by_kind.get(&frame.kind) {
                Some(callbacks) => callbacks.iter().map(|(_, cb)| cb.clone()).collect(),
                None => return 0,
            }
        };
        for callback in &callbacks {
            callback(frame);
        }
        callbacks.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_kind.values().map(Vec::len).sum()
    }
}

pub struct MessageRouter {
    subscribers: SubscriberRegistry,
    handlers: EventHandlers,
    metrics: Arc<SyncMetrics>,
}

impl MessageRouter {
    pub fn new(
        subscribers: SubscriberRegistry,
        handlers: EventHandlers,
        metrics: Arc<SyncMetrics>,
    ) -> Self {
        Self {
            subscribers,
            handlers,
            metrics,
        }
    }

    /// Route one raw text frame. Never fails: decode and handler errors are
    /// logged and the frame is dropped.
    pub async fn route(&self, text: &str) -> HandlerOutcome {
        let frame = match InboundFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.metrics.decode_error();
                warn!(error = %e, "dropping malformed frame");
                return HandlerOutcome::Continue;
            }
        };

        self.subscribers.notify(&frame).await;

        let Some(kind) = EventKind::from_type(&frame.kind) else {
            self.metrics.unknown_type();
            debug!(frame_type = %frame.kind, "no handler for frame type");
            return HandlerOutcome::Continue;
        };

        match self.handlers.handle(kind, &frame).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.decode_error();
                warn!(frame_type = %frame.kind, error = %e, "handler rejected frame");
                HandlerOutcome::Continue
            }
        }
    }
}
