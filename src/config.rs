use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4501;
const DEFAULT_CHANNEL_NAME: &str = "deep_link_channel";
const DEFAULT_METHOD: &str = "handleDeepLink";

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ─── ChannelConfig ────────────────────────────────────────────────────────────

/// Delivery-bridge identifiers (`[channel]` in config.toml).
///
/// These must match what the embedded runtime opens and listens for; change
/// them only together with the runtime side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Name the runtime passes in its `channel.open` handshake.
    /// Default: `deep_link_channel`.
    pub name: String,
    /// Method invoked on the runtime for every delivered link.
    /// Default: `handleDeepLink`.
    pub method: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CHANNEL_NAME.to_string(),
            method: DEFAULT_METHOD.to_string(),
        }
    }
}

// ─── HostConfig ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub port: u16,
    /// Bind address for the local socket (DEEPLINKD_BIND env var, default: "127.0.0.1").
    pub bind_address: String,
    pub data_dir: PathBuf,
    /// Log level filter string, e.g. "info" or "deeplinkd=debug".
    pub log: String,
    /// Log output format: "pretty" (default) | "json" (structured for log aggregators).
    pub log_format: String,
    /// Delivery-bridge channel and method names.
    pub channel: ChannelConfig,
}

/// Optional overrides read from `{data_dir}/config.toml` — all fields are
/// optional; absent fields fall through to the next layer.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    port: Option<u16>,
    bind_address: Option<String>,
    log: Option<String>,
    log_format: Option<String>,
    /// Delivery-bridge identifiers (`[channel]`).
    channel: Option<ChannelConfig>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

impl HostConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
        bind_address: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let bind_address = bind_address
            .or(std::env::var("DEEPLINKD_BIND").ok().filter(|s| !s.is_empty()))
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        let log_format = std::env::var("DEEPLINKD_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let channel = toml.channel.unwrap_or_default();

        Self {
            port,
            bind_address,
            data_dir,
            log,
            log_format,
            channel,
        }
    }

    /// `host:port` string for the local socket.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/deeplinkd
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("deeplinkd");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/deeplinkd or ~/.local/share/deeplinkd
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("deeplinkd");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("deeplinkd");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\deeplinkd
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("deeplinkd");
        }
    }
    // Fallback
    PathBuf::from(".deeplinkd")
}
