use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "nostr-apps.toml";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub relays: RelaysConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelaysConfig {
    /// General relay set used for reads and subscriptions.
    #[serde(default = "default_read_relays")]
    pub read: Vec<String>,
    /// Search and id lookups go here.
    #[serde(default = "default_index_relay")]
    pub index: String,
    /// Endpoint that answers ranked "top" queries.
    #[serde(default = "default_ranking_relay")]
    pub ranking: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_handler_limit")]
    pub handler_limit: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for RelaysConfig {
    fn default() -> Self {
        Self {
            read: default_read_relays(),
            index: default_index_relay(),
            ranking: default_ranking_relay(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            search_limit: default_search_limit(),
            handler_limit: default_handler_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_read_relays() -> Vec<String> {
    vec![
        "wss://relay.nostr.band/".to_string(),
        "wss://eden.nostr.land".to_string(),
        "wss://nos.lol".to_string(),
        "wss://relay.nostr.bg".to_string(),
        "wss://nostr.mom".to_string(),
    ]
}

fn default_index_relay() -> String {
    "wss://relay.nostr.band/".to_string()
}

fn default_ranking_relay() -> String {
    "wss://relay.nostr.band/all".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_search_limit() -> usize {
    30
}

fn default_handler_limit() -> usize {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

fn is_ws_url(url: &str) -> bool {
    url.starts_with("wss://") || url.starts_with("ws://")
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(path);
        let content = fs::read_to_string(expanded_path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Config =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;

        Ok(config)
    }

    /// Load `path` if given, else the per-user config file if it exists, else defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path.to_string_lossy()),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "nostr-apps").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.relays.read.is_empty() {
            anyhow::bail!("At least one read relay is required");
        }

        let all = self
            .relays
            .read
            .iter()
            .chain([&self.relays.index, &self.relays.ranking]);
        for url in all {
            if !is_ws_url(url) {
                anyhow::bail!("Relay URL must start with ws:// or wss://: {}", url);
            }
        }

        if self.fetch.timeout_secs == 0 {
            anyhow::bail!("fetch.timeout_secs must be positive");
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    /// Every relay the pool should connect to up front.
    pub fn all_relays(&self) -> Vec<String> {
        let mut relays = vec![self.relays.ranking.clone()];
        for url in &self.relays.read {
            if !relays.contains(url) {
                relays.push(url.clone());
            }
        }
        if !relays.contains(&self.relays.index) {
            relays.push(self.relays.index.clone());
        }
        relays
    }
}
