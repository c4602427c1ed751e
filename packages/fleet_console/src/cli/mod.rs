mod command;
mod watch;

pub use command::run_command;
pub use watch::watch;

use anyhow::{Context, Result, bail};
use fleet_sync::{ConnectionState, ConnectionStatus, FleetSync};
use std::time::Duration;

/// Block until the engine reports `Connected`, or fail with the engine's
/// last error once the attempt has failed.
async fn wait_connected(engine: &FleetSync, timeout: Duration) -> Result<()> {
    let mut status_rx = engine.watch_status();
    let status: ConnectionStatus = tokio::time::timeout(
        timeout,
        status_rx.wait_for(|s| s.is_connected() || failed(s)),
    )
    .await
    .context("timed out waiting for the connection")?
    .context("sync engine stopped")?
    .clone();

    if !status.is_connected() {
        bail!(
            "connection failed: {}",
            status.last_error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// A refused socket, an expired token and a rejected credential all leave
/// the engine disconnected with an error set.
fn failed(status: &ConnectionStatus) -> bool {
    match status.state {
        ConnectionState::Error => true,
        ConnectionState::Disconnected => status.last_error.is_some(),
        ConnectionState::Connecting | ConnectionState::Connected => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_sync::transport::{EventSink, TransportEvent, TransportLink, close_code};
    use fleet_sync::{Credential, SyncConfig, SystemClock, TokenAuth, TransportFactory};
    use std::sync::Arc;

    /// Every open fails the way a refused TCP connect does.
    struct RefusingTransport;

    struct DeadLink;

    impl TransportLink for DeadLink {
        fn send(&mut self, _text: String) -> fleet_sync::Result<()> {
            Err(fleet_sync::SyncError::NotConnected)
        }

        fn close(&mut self, _code: u16, _reason: &str) {}
    }

    impl TransportFactory for RefusingTransport {
        fn open(
            &self,
            _endpoint: &str,
            _credential: &Credential,
            events: EventSink,
        ) -> Box<dyn TransportLink> {
            tokio::spawn(async move {
                events
                    .emit(TransportEvent::Error("connection refused".into()))
                    .await;
                events
                    .emit(TransportEvent::Closed {
                        code: close_code::ABNORMAL,
                        reason: "connection refused".into(),
                    })
                    .await;
            });
            Box::new(DeadLink)
        }
    }

    fn engine(credential: &Credential) -> FleetSync {
        let auth = Arc::new(TokenAuth::new(
            credential.clone(),
            chrono::Duration::zero(),
            SystemClock,
        ));
        FleetSync::builder(SyncConfig::default(), auth, Arc::new(RefusingTransport)).spawn()
    }

    #[tokio::test]
    async fn test_refused_connection_fails_fast_with_cause() {
        let credential = Credential::new("t", None);
        let engine = engine(&credential);
        engine.connect(credential).await.unwrap();

        let started = std::time::Instant::now();
        let err = wait_connected(&engine, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(30));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_expired_token_fails_fast() {
        let expired_at = chrono::Utc::now() - chrono::Duration::hours(1);
        let credential = Credential::new("t", Some(expired_at));
        let engine = engine(&credential);
        engine.connect(credential).await.unwrap();

        let err = wait_connected(&engine, Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("session expired"), "{err}");
        engine.shutdown().await;
    }

    #[test]
    fn test_failed_predicate() {
        let mut status = ConnectionStatus::default();
        assert!(!failed(&status));
        status.last_error = Some("boom".into());
        assert!(failed(&status));
        status.state = ConnectionState::Connecting;
        assert!(!failed(&status));
        status.state = ConnectionState::Error;
        assert!(failed(&status));
    }
}
