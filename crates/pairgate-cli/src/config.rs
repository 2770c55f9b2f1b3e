use anyhow::Context;
use pairgate_channels::BridgeConfig;
use pairgate_session::SessionConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Top-level `pairgate.toml`. Every section is optional.
#[derive(Debug, Deserialize)]
pub struct PairgateConfig {
    /// Root for everything Pairgate writes. Credentials live under `credentials/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// HTTP listener.
    #[serde(default)]
    pub server: ServerConfig,
    /// Session lifecycle.
    #[serde(default)]
    pub sessions: SessionsConfig,
    /// Sidecar that speaks the chat protocol.
    #[serde(default)]
    pub bridge: BridgeConfig,
    /// API keys.
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for PairgateConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            sessions: SessionsConfig::default(),
            bridge: BridgeConfig::default(),
            security: SecurityConfig::default(),
        }
    }
}

/// `[server]`: where the gateway listens.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Overridden by `--host`.
    #[serde(default = "default_host")]
    pub host: String,
    /// Overridden by `--port`, then by `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// `[sessions]`: lifecycle tunables.
#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    /// How long `create-session` waits for a pairing code.
    #[serde(default = "default_auth_timeout_secs")]
    pub auth_timeout_secs: u64,
    /// How long a disconnected session stays registered. 0 keeps it forever.
    #[serde(default = "default_disconnected_ttl_secs")]
    pub disconnected_ttl_secs: u64,
    /// Seconds between pruning passes.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    /// Answer an inbound `!ping` with `pong`.
    #[serde(default)]
    pub ping_reply: bool,
    /// Draw each pairing code as a QR on stderr.
    #[serde(default)]
    pub print_qr: bool,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            auth_timeout_secs: default_auth_timeout_secs(),
            disconnected_ttl_secs: default_disconnected_ttl_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            ping_reply: false,
            print_qr: false,
        }
    }
}

impl SessionsConfig {
    /// Manager settings derived from this section.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            auth_timeout: Duration::from_secs(self.auth_timeout_secs),
            ping_reply: self.ping_reply,
            print_qr: self.print_qr,
        }
    }

    /// TTL for disconnected sessions, `None` when pruning is off.
    pub fn disconnected_ttl(&self) -> Option<Duration> {
        (self.disconnected_ttl_secs > 0).then(|| Duration::from_secs(self.disconnected_ttl_secs))
    }

    /// How often the pruner runs, at least once a second.
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }
}

/// `[security]`
#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    /// Accepted API keys. Empty leaves the API open.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_auth_timeout_secs() -> u64 {
    60
}
fn default_disconnected_ttl_secs() -> u64 {
    3600
}
fn default_prune_interval_secs() -> u64 {
    300
}

impl PairgateConfig {
    /// Load the config file, falling back to defaults when it does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => Self::parse(&raw)
                .with_context(|| format!("Failed to parse config file '{}'", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read config file '{}'", path.display())),
        }
    }

    /// Parse TOML text.
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Directory holding one credential directory per session.
    pub fn credentials_dir(&self) -> PathBuf {
        self.data_dir.join("credentials")
    }
}

/// Pick the listening port: an explicit flag, then `PORT`, then the config.
pub fn resolve_port(flag: Option<u16>, env: Option<&str>, configured: u16) -> anyhow::Result<u16> {
    if let Some(port) = flag {
        return Ok(port);
    }
    match env.map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("PORT must be a port number, got '{raw}'")),
        None => Ok(configured),
    }
}
