use anyhow::{Context, Result, bail};
use fleet_sync::protocol::CommandResultData;
use fleet_sync::{Credential, DeviceCommand, FleetSync, FrameCallback, InboundFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const RESULT_TYPES: &[&str] = &[
    "command_ack",
    "command_result",
    "command_failed",
    "command_error",
];

/// Connect, send one device command, and wait for the server's verdict.
pub async fn run_command(
    engine: &FleetSync,
    credential: Credential,
    command: DeviceCommand,
    timeout: Duration,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundFrame>();
    let mut subscriptions = Vec::with_capacity(RESULT_TYPES.len());
    for frame_type in RESULT_TYPES {
        let tx = tx.clone();
        let callback: FrameCallback = Arc::new(move |frame: &InboundFrame| {
            let _ = tx.send(frame.clone());
        });
        subscriptions.push(engine.subscribe(*frame_type, callback).await);
    }

    engine
        .connect(credential)
        .await
        .context("failed to start connection")?;
    super::wait_connected(engine, timeout).await?;

    let name = command.name();
    let device_id = command.device_id().to_string();
    engine
        .send_command(command)
        .await
        .with_context(|| format!("failed to send {name}"))?;
    info!(command = name, %device_id, "sent, waiting for result");

    let verdict = tokio::time::timeout(timeout, async {
        while let Some(frame) = rx.recv().await {
            let result: CommandResultData = frame.payload().unwrap_or_default();
            if !concerns(&result, name, &device_id) {
                debug!(kind = %frame.kind, "ignoring result for another command");
                continue;
            }
            return Some((frame.kind, result));
        }
        None
    })
    .await;

    for subscription in &subscriptions {
        if !engine.unsubscribe(subscription).await {
            debug!(kind = subscription.kind(), "subscription already gone");
        }
    }
    engine.disconnect().await.ok();

    let (kind, result) = verdict
        .with_context(|| format!("no result for {name} within {}s", timeout.as_secs()))?
        .context("sync engine stopped")?;

    match kind.as_str() {
        "command_ack" | "command_result" => {
            let message = result.message.unwrap_or_else(|| "acknowledged".to_string());
            println!("{name} on {device_id}: {message}");
            Ok(())
        }
        _ => {
            let reason = result
                .error
                .or(result.message)
                .unwrap_or_else(|| "rejected by server".to_string());
            bail!("{name} on {device_id} failed: {reason}")
        }
    }
}

/// Results that name a different command or device belong to someone else.
fn concerns(result: &CommandResultData, name: &str, device_id: &str) -> bool {
    result.command.as_deref().is_none_or(|c| c == name)
        && result.device_id.as_deref().is_none_or(|d| d == device_id)
}
