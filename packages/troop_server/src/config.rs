use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::transport::DEFAULT_MAX_FRAME_BYTES;

// =============================================================================
// File config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [server]
//                    port = 57890
//
//   env var:         TROOP_SERVER__PORT=57890   (double underscore = nesting)
//
// CLI flags are applied on top by the binary.

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub log: LogFileConfig,
}

/// Relay tuning knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Shared performer password. Blank means "no password".
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_max_frame_kb")]
    pub max_frame_kb: usize,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            password: String::new(),
            max_frame_kb: default_max_frame_kb(),
            send_timeout_ms: default_send_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

/// Session log toggle (lives under `[log]` in config.toml).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LogFileConfig {
    #[serde(default)]
    pub enabled: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    57890
}
fn default_max_frame_kb() -> usize {
    DEFAULT_MAX_FRAME_BYTES / 1024
}
fn default_send_timeout_ms() -> u64 {
    2000
}
fn default_shutdown_grace_ms() -> u64 {
    500
}
fn default_outbox_capacity() -> usize {
    256
}

/// Build a figment that layers: defaults → config.toml → TROOP_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `TROOP_SERVER__PORT=6000`  →  `server.port = 6000`
///   `TROOP_LOG__ENABLED=true`  →  `log.enabled = true`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("TROOP_").split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig, fixed for the server's lifetime)
// =============================================================================

/// Values the relay core is started with.
#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub host: String,
    /// Requested port; the listener scans upward if it is busy.
    pub port: u16,
    pub password: String,
    pub max_frame_bytes: usize,
    /// Upper bound on one send into a client's outbox
    pub send_timeout: Duration,
    /// Pause between the final notice and stopping
    pub shutdown_grace: Duration,
    pub outbox_capacity: usize,
    /// Directory for session logs; `None` disables them
    pub session_log_dir: Option<PathBuf>,
}

impl RelayConfig {
    pub fn from_file(fc: &FileConfig, logs_dir: &Path) -> Self {
        Self {
            host: fc.server.host.clone(),
            port: fc.server.port,
            password: fc.server.password.clone(),
            max_frame_bytes: fc.server.max_frame_kb * 1024,
            send_timeout: Duration::from_millis(fc.server.send_timeout_ms),
            shutdown_grace: Duration::from_millis(fc.server.shutdown_grace_ms),
            outbox_capacity: fc.server.outbox_capacity.max(1),
            session_log_dir: fc.log.enabled.then(|| logs_dir.to_path_buf()),
        }
    }

    /// Loopback config on an ephemeral port, for tests and embedding.
    pub fn local() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Self::default()
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default(), Path::new("logs"))
    }
}

// =============================================================================
// Directory layout (derived from --data-dir, not tunable via figment)
// =============================================================================

#[derive(Clone, Debug)]
pub struct TroopDirs {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl TroopDirs {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".troop"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let logs_dir = data_dir.join("logs");

        info!("Data directory: {}", data_dir.display());

        Ok(Self { data_dir, logs_dir })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
