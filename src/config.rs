use clap::Parser;
use figment::{
    providers::{Data, Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::gateway::StorageBackend;
use crate::state::Heartbeat;

/// Command-line flags. Only flags actually given (or set through their env
/// var) are serialized, so an unset flag never masks the TOML file.
#[derive(Parser, Serialize, Clone, Debug)]
#[command(name = "chat-relay", version, about = "Real-time chat relay server")]
pub struct Cli {
    /// Port to listen on [default: 8000]
    #[arg(long, env = "RELAY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "RELAY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file
    #[arg(long, default_value = "./relay.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (SQLite database) [default: ./data]
    #[arg(long, env = "RELAY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Storage backend: "sqlite" or "memory" [default: sqlite]
    #[arg(long, env = "RELAY_STORAGE")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
}

/// Effective server configuration after all layers are merged.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub storage: String,

    /// Presence broadcast settings ([presence] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceConfig>,

    /// Ping/pong settings ([heartbeat] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<HeartbeatConfig>,
}

/// Presence fan-out configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PresenceConfig {
    /// Broadcast an "offline" presence event when a user's last connection
    /// closes (default: false, offline is only persisted)
    #[serde(default)]
    pub broadcast_offline: bool,
}

/// Connection heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

impl From<&HeartbeatConfig> for Heartbeat {
    fn from(config: &HeartbeatConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs.max(1)),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            storage: "sqlite".to_string(),
            presence: Some(PresenceConfig::default()),
            heartbeat: Some(HeartbeatConfig::default()),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(Cli::parse())
    }

    pub fn load_from(cli: Cli) -> Result<Self, figment::Error> {
        Self::figment(Toml::file(&cli.config), cli).extract()
    }

    fn figment(toml: Data<Toml>, cli: Cli) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(Serialized::defaults(cli))
    }

    pub fn broadcast_offline(&self) -> bool {
        self.presence.as_ref().is_some_and(|p| p.broadcast_offline)
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.as_ref().map(Heartbeat::from).unwrap_or_default()
    }

    pub fn storage_backend(&self) -> Result<StorageBackend, String> {
        self.storage.parse()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8000)
# port = 8000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# Storage backend: "sqlite" (default) or "memory" (lost on restart)
# storage = "sqlite"

# ---- Presence ----
# [presence]

# Broadcast "offline" when a user's last connection closes.
# Default false: offline transitions are persisted but not broadcast.
# broadcast_offline = false

# ---- Heartbeat ----
# [heartbeat]
# ping_interval_secs = 30
# pong_timeout_secs = 10
"#
    .to_string()
}
