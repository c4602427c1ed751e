use anyhow::{Context, Result};
use fleet_sync::notify::Severity;
use fleet_sync::{Credential, FleetSync, StoreChange, Visibility};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Stream the live feed until Ctrl-C.
///
/// On unix, `SIGUSR1` is treated as the app returning to the foreground,
/// which reconnects if the session dropped while nobody was looking.
pub async fn watch(
    engine: &FleetSync,
    credential: Credential,
    visibility: watch::Sender<Visibility>,
) -> Result<()> {
    let mut status_rx = engine.watch_status();
    let mut changes = engine.store().read().await.subscribe();
    let mut alerts = engine.notifications().read().await.alerts();

    engine
        .connect(credential)
        .await
        .context("failed to start connection")?;

    let mut foreground = foreground_signal()?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, disconnecting");
                break;
            }
            changed = status_rx.changed() => {
                if changed.is_err() {
                    warn!("sync engine stopped");
                    break;
                }
                let status = status_rx.borrow_and_update().clone();
                match &status.last_error {
                    Some(err) => warn!(state = ?status.state, retry = status.retry_count, %err, "connection"),
                    None => info!(state = ?status.state, retry = status.retry_count, "connection"),
                }
            }
            change = changes.recv() => match change {
                Ok(change) => log_change(engine, change).await,
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "store feed lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            alert = alerts.recv() => match alert {
                Ok(alert) => {
                    let n = &alert.notification;
                    match n.severity {
                        Severity::Error | Severity::Critical => {
                            error!(category = ?n.category, title = %n.title, "{}", n.message)
                        }
                        Severity::Warning => {
                            warn!(category = ?n.category, title = %n.title, "{}", n.message)
                        }
                        Severity::Info | Severity::Success => {
                            info!(category = ?n.category, title = %n.title, "{}", n.message)
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => debug!(skipped = n, "alert feed lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            Some(()) = next_foreground(&mut foreground) => {
                debug!("foreground signal received");
                visibility.send_replace(Visibility::Foreground);
            }
        }
    }

    let metrics = engine.metrics();
    info!(
        frames = metrics.frames.received,
        reconnects = metrics.connection.reconnects,
        auth_failures = metrics.connection.auth_failures,
        "session summary"
    );
    engine.disconnect().await.ok();
    Ok(())
}

async fn log_change(engine: &FleetSync, change: StoreChange) {
    let store = engine.store();
    let store = store.read().await;
    match change {
        StoreChange::DeviceCreated { device_id } => {
            info!(%device_id, total = store.device_count(), "device joined")
        }
        StoreChange::DeviceUpdated { device_id } => {
            if let Some(device) = store.device(&device_id) {
                debug!(
                    %device_id,
                    status = ?device.status,
                    battery = ?device.battery_level,
                    signal = ?device.signal_dbm,
                    "device updated"
                );
            }
        }
        StoreChange::AlarmAppended { device_id } => {
            let open = store.open_alarms_for(&device_id).len();
            info!(%device_id, open, "alarm raised")
        }
        StoreChange::AlarmClosed { device_id, status } => {
            info!(%device_id, ?status, "alarm closed")
        }
        StoreChange::TrafficAppended { device_id } => debug!(%device_id, "traffic"),
        StoreChange::LogsTrimmed => debug!("logs trimmed"),
    }
}

#[cfg(unix)]
type ForegroundSignal = tokio::signal::unix::Signal;
#[cfg(not(unix))]
type ForegroundSignal = ();

#[cfg(unix)]
fn foreground_signal() -> Result<Option<ForegroundSignal>> {
    use tokio::signal::unix::{SignalKind, signal};
    let sig = signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?;
    Ok(Some(sig))
}

#[cfg(not(unix))]
fn foreground_signal() -> Result<Option<ForegroundSignal>> {
    Ok(None)
}

#[cfg(unix)]
async fn next_foreground(signal: &mut Option<ForegroundSignal>) -> Option<()> {
    match signal {
        Some(sig) => sig.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(not(unix))]
async fn next_foreground(_signal: &mut Option<ForegroundSignal>) -> Option<()> {
    std::future::pending().await
}
