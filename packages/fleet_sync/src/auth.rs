//! Collaborator seams: credentials, the auth subsystem, and wall-clock time.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// An externally issued bearer credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Expired at `now`, treating tokens within `leeway` of expiry as expired.
    /// A credential without an expiry never expires locally.
    pub fn expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now + leeway >= expires_at,
            None => false,
        }
    }
}

// Keep tokens out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// The authentication subsystem, as seen by the sync engine.
pub trait AuthProvider: Send + Sync {
    fn current_credential(&self) -> Option<Credential>;
    fn is_expired(&self, credential: &Credential) -> bool;
    /// Drop the cached session. Called once per terminal auth failure.
    fn logout(&self);
}

/// Why the session ended; handed to the session-invalidated callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The credential expired before a connection attempt.
    Expired,
    /// The server closed the connection with an auth-failure code or reason.
    Rejected { reason: String },
    /// The server pushed an explicit auth error frame.
    RemoteAuthError { message: String },
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Auth provider backed by a single configured token.
pub struct TokenAuth<C: Clock> {
    credential: Mutex<Option<Credential>>,
    leeway: Duration,
    clock: C,
    logged_out: AtomicBool,
}

impl<C: Clock> TokenAuth<C> {
    pub fn new(credential: Credential, leeway: Duration, clock: C) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            leeway,
            clock,
            logged_out: AtomicBool::new(false),
        }
    }

    pub fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }
}

impl<C: Clock> AuthProvider for TokenAuth<C> {
    fn current_credential(&self) -> Option<Credential> {
        match self.credential.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn is_expired(&self, credential: &Credential) -> bool {
        credential.expired_at(self.clock.now(), self.leeway)
    }

    fn logout(&self) {
        match self.credential.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        self.logged_out.store(true, Ordering::SeqCst);
        info!("session cleared");
    }
}
