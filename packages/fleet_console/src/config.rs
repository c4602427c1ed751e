use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fleet_sync::{Credential, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// Unified config (figment-deserialized from defaults / fleet.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   fleet.toml:      [connection]
//                    url = "wss://fleet.example.com/ws"
//
//   env var:         FLEET_CONNECTION__URL=wss://...   (double underscore = nesting)
//
//   (single underscore stays within field names: FLEET_AUTH__EXPIRES_AT)

pub const CONFIG_FILE: &str = "fleet.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub connection: SyncConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Credential material (lives under `[auth]` in fleet.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// Treat the token as expired this many seconds early.
    #[serde(default = "default_expiry_leeway_secs")]
    pub expiry_leeway_secs: i64,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            token: None,
            expires_at: None,
            expiry_leeway_secs: default_expiry_leeway_secs(),
        }
    }
}

impl AuthFileConfig {
    pub fn credential(&self) -> Result<Credential> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .context("no auth token configured; set [auth] token or FLEET_AUTH__TOKEN")?;
        Ok(Credential::new(token, self.expires_at))
    }

    pub fn leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.expiry_leeway_secs.max(0))
    }
}

fn default_expiry_leeway_secs() -> i64 {
    30
}

/// Build a figment that layers: defaults → fleet.toml → FLEET_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `FLEET_AUTH__TOKEN=abc`  →  `auth.token = "abc"`
///   `FLEET_CONNECTION__RECONNECT_DELAY_SECS=5`  →  `connection.reconnect_delay_secs = 5`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(ConsoleConfig::default()))
        .merge(Toml::file(data_dir.join(CONFIG_FILE)))
        .merge(Env::prefixed("FLEET_").split("__"))
}

/// `--data-dir`, or `~/.fleet-console`. Created if missing.
pub fn resolve_data_dir(custom_dir: Option<PathBuf>) -> Result<PathBuf> {
    let data_dir = match custom_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .context("could not find home directory")?
            .join(".fleet-console"),
    };
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("failed to create data directory: {:?}", data_dir))?;
    Ok(data_dir)
}
