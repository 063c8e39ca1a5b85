use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Category;

const CONFIG_FILE: &str = "client.json";

/// Client configuration loaded from `client.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub server_url: String,
    pub player_name: Option<String>,
    pub category: Category,
    pub connect_timeout_ms: u64,
    /// How long a create/join/start/queue request may go unanswered.
    pub request_timeout_ms: u64,
    pub reconnection: ReconnectConfig,
    pub chat_history: usize,
    pub outbound_buffer: usize,
    /// Extra query pairs sent with the handshake, e.g. `token`.
    pub query: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub attempts: u32,
    pub delay_ms: u64,
    pub delay_max_ms: u64,
    pub randomization_factor: f64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            player_name: None,
            category: Category::All,
            connect_timeout_ms: 20_000,
            request_timeout_ms: 10_000,
            reconnection: ReconnectConfig::default(),
            chat_history: 100,
            outbound_buffer: 64,
            query: BTreeMap::new(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            attempts: 5,
            delay_ms: 1_000,
            delay_max_ms: 5_000,
            randomization_factor: 0.5,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Apply `TRIVIA_SERVER_URL` and `TRIVIA_PLAYER_NAME` overrides.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup("TRIVIA_SERVER_URL").filter(|v| !v.trim().is_empty()) {
            self.server_url = url;
        }
        if let Some(name) = lookup("TRIVIA_PLAYER_NAME").filter(|v| !v.trim().is_empty()) {
            self.player_name = Some(name);
        }
        self
    }
}

/// Directory holding the config file, `CONFIG_PATH` or `./config`.
pub fn config_dir() -> PathBuf {
    std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"))
}

/// Initialize the config directory with defaults if missing.
pub fn init_in(base: &Path) -> Result<(), ConfigError> {
    if !base.exists() {
        fs::create_dir_all(base).map_err(|source| ConfigError::Io {
            path: base.to_path_buf(),
            source,
        })?;
    }

    let path = base.join(CONFIG_FILE);
    if !path.exists() {
        let data = serde_json::to_string_pretty(&ClientConfig::default())
            .map_err(|source| ConfigError::Parse { path: path.clone(), source })?;
        fs::write(&path, data).map_err(|source| ConfigError::Io { path: path.clone(), source })?;
        tracing::info!("Wrote default config to {}", path.display());
    }
    Ok(())
}

/// Load the client configuration from `base`, environment overrides applied.
pub fn load_client_config(base: &Path) -> Result<ClientConfig, ConfigError> {
    Ok(load_in(base)?.with_overrides(|key| std::env::var(key).ok()))
}

pub fn load_in(base: &Path) -> Result<ClientConfig, ConfigError> {
    let path = base.join(CONFIG_FILE);
    let data = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&data).map_err(|source| ConfigError::Parse { path, source })
}
