//! Layered server settings.
//!
//! Three layers, in priority order:
//!
//! 1. **Compiled defaults** — [`RelaySettings::default()`]
//! 2. **Config file** — `relay.json`, if present (fields are individually
//!    optional and merge over the defaults)
//! 3. **Environment variables** — `RELAY_*` overrides (highest priority)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default typing-flag expiry, matching the interval deployed clients used
/// when the timer still lived client-side.
const DEFAULT_TYPING_EXPIRY_MS: u64 = 2_000;

/// Default per-connection outbound queue capacity.
const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Effective server settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RelaySettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Fanout/typing tunables.
    pub chat: ChatSettings,
    /// Durable storage settings.
    pub storage: StorageSettings,
}

/// Listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

/// Fanout/typing tunables.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatSettings {
    /// Typing-flag expiry in milliseconds.
    pub typing_expiry_ms: u64,
    /// Per-connection outbound queue capacity, in frames.
    pub outbound_queue: usize,
}

/// Durable storage settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageSettings {
    /// `SQLite` database path.
    pub db_path: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 5000,
        }
    }
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            typing_expiry_ms: DEFAULT_TYPING_EXPIRY_MS,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("relay.sqlite"),
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            chat: ChatSettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl RelaySettings {
    /// Load settings: defaults, then the config file (if given and
    /// readable), then `RELAY_*` env overrides.
    ///
    /// A missing or unparsable file is logged and skipped — the server
    /// always comes up with usable settings.
    pub fn load(config_path: Option<&Path>) -> Self {
        let mut settings = match config_path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable config file, using defaults");
                    Self::default()
                }
            },
            None => Self::default(),
        };
        settings.apply_env_overrides();
        settings
    }

    /// The typing expiry as a [`Duration`].
    pub fn typing_expiry(&self) -> Duration {
        Duration::from_millis(self.chat.typing_expiry_ms)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("RELAY_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_parsed("RELAY_PORT") {
            self.server.port = port;
        }
        if let Ok(path) = std::env::var("RELAY_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Some(expiry) = env_parsed("RELAY_TYPING_EXPIRY_MS") {
            self.chat.typing_expiry_ms = expiry;
        }
        if let Some(queue) = env_parsed("RELAY_OUTBOUND_QUEUE") {
            self.chat.outbound_queue = queue;
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable env override");
                None
            }
        },
        Err(_) => None,
    }
}
