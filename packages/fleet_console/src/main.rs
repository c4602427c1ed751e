use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use fleet_sync::protocol::{AlarmStart, DeviceTarget, SendSms, SendUssd};
use fleet_sync::{
    DeviceCommand, FleetSync, SessionCallback, SessionEnd, SystemClock, TokenAuth, Visibility,
    WsTransport,
};

mod cli;
mod config;

use config::ConsoleConfig;

#[derive(Parser)]
#[command(name = "fleet-console")]
#[command(about = "Live console for a fleet of SIM gateway devices")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.fleet-console)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Override the server endpoint
    #[arg(long, global = true)]
    url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and stream the live feed until Ctrl-C
    Watch,

    /// Send an SMS from a device
    SendSms(SendSmsArgs),

    /// Run a USSD code on a device
    SendUssd(SendUssdArgs),

    /// Make a device beep and flash
    FindDevice(DeviceArgs),

    /// Start a device's alarm
    AlarmStart(AlarmStartArgs),

    /// Stop a device's alarm
    AlarmStop(DeviceArgs),
}

#[derive(Parser)]
struct DeviceArgs {
    device_id: String,

    /// Seconds to wait for the server's acknowledgement
    #[arg(long, default_value = "15")]
    timeout: u64,
}

#[derive(Parser)]
struct SendSmsArgs {
    #[command(flatten)]
    device: DeviceArgs,

    /// Recipient phone number
    to: String,

    message: String,

    /// SIM slot to send from
    #[arg(long)]
    slot: Option<u8>,
}

#[derive(Parser)]
struct SendUssdArgs {
    #[command(flatten)]
    device: DeviceArgs,

    /// USSD code, e.g. *100#
    code: String,

    #[arg(long)]
    slot: Option<u8>,
}

#[derive(Parser)]
struct AlarmStartArgs {
    #[command(flatten)]
    device: DeviceArgs,

    /// Stop automatically after this many seconds
    #[arg(long)]
    duration_secs: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "fleet_console=debug,fleet_sync=debug,info"
    } else {
        "fleet_console=info,fleet_sync=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let data_dir = config::resolve_data_dir(cli.data_dir)?;
    let mut config: ConsoleConfig = config::load_config(&data_dir)
        .extract()
        .context("failed to load configuration")?;
    if let Some(url) = cli.url {
        config.connection.url = url;
    }
    let credential = config.auth.credential()?;
    info!(url = %config.connection.url, data_dir = %data_dir.display(), "starting");

    let auth = Arc::new(TokenAuth::new(
        credential.clone(),
        config.auth.leeway(),
        SystemClock,
    ));
    let on_session_end: SessionCallback = Arc::new(|end: SessionEnd| {
        warn!(?end, "session ended, a new token is required");
    });
    let (visibility_tx, visibility_rx) = tokio::sync::watch::channel(Visibility::Foreground);

    let engine = FleetSync::builder(config.connection, auth, Arc::new(WsTransport::new()))
        .foreground_signal(visibility_rx)
        .on_session_end(on_session_end)
        .spawn();

    let result = match cli.command {
        Commands::Watch => cli::watch(&engine, credential, visibility_tx).await,
        Commands::SendSms(args) => {
            let command = DeviceCommand::SendSms(SendSms {
                device_id: args.device.device_id,
                slot: args.slot,
                to: args.to,
                message: args.message,
            });
            cli::run_command(&engine, credential, command, timeout(args.device.timeout)).await
        }
        Commands::SendUssd(args) => {
            let command = DeviceCommand::SendUssd(SendUssd {
                device_id: args.device.device_id,
                slot: args.slot,
                code: args.code,
            });
            cli::run_command(&engine, credential, command, timeout(args.device.timeout)).await
        }
        Commands::FindDevice(args) => {
            let command = DeviceCommand::FindDevice(DeviceTarget {
                device_id: args.device_id,
            });
            cli::run_command(&engine, credential, command, timeout(args.timeout)).await
        }
        Commands::AlarmStart(args) => {
            let command = DeviceCommand::AlarmStart(AlarmStart {
                device_id: args.device.device_id,
                duration_secs: args.duration_secs,
            });
            cli::run_command(&engine, credential, command, timeout(args.device.timeout)).await
        }
        Commands::AlarmStop(args) => {
            let command = DeviceCommand::AlarmStop(DeviceTarget {
                device_id: args.device_id,
            });
            cli::run_command(&engine, credential, command, timeout(args.timeout)).await
        }
    };

    engine.shutdown().await;
    result
}

fn timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.max(1))
}
