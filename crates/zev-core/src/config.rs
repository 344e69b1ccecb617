use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, anyhow};

use crate::flush::FlushPolicy;
use crate::groq::{DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::models::DEFAULT_MODEL;
use crate::pipeline::SuperagentModels;
use crate::storage::{MemoryStorage, SqliteStorage, Storage};

pub const API_KEY_ENV: &str = "GROQ_API_KEY";
const APP_DIR: &str = "zev";

/// Where conversation history lives.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryMode {
    /// Forgotten when the process exits.
    #[default]
    Session,
    /// Kept in the SQLite database across runs.
    Persistent,
}

/// Flush tuning in milliseconds, as written in the config file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FlushConfig {
    pub small_threshold: usize,
    pub large_threshold: usize,
    pub max_interval_ms: u64,
    pub min_interval_ms: u64,
    pub burst_fragments: usize,
}

impl Default for FlushConfig {
    fn default() -> Self {
        let policy = FlushPolicy::default();
        Self {
            small_threshold: policy.small_threshold,
            large_threshold: policy.large_threshold,
            max_interval_ms: policy.max_interval.as_millis() as u64,
            min_interval_ms: policy.min_interval.as_millis() as u64,
            burst_fragments: policy.burst_fragments,
        }
    }
}

impl FlushConfig {
    pub fn to_policy(&self) -> FlushPolicy {
        FlushPolicy {
            small_threshold: self.small_threshold,
            large_threshold: self.large_threshold,
            max_interval: Duration::from_millis(self.max_interval_ms),
            min_interval: Duration::from_millis(self.min_interval_ms),
            burst_fragments: self.burst_fragments,
            ..FlushPolicy::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: String,
    pub default_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    pub history: HistoryMode,
    pub flush: FlushConfig,
    pub superagent: SuperagentModels,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
            history: HistoryMode::default(),
            flush: FlushConfig::default(),
            superagent: SuperagentModels::default(),
        }
    }

    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&config_content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(&config_path, config_content)?;
        Ok(())
    }

    pub fn save_default_model(model: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.default_model = model.to_string();
        config.save()
    }

    pub fn save_api_key(key: &str) -> Result<()> {
        let mut config = Self::load().unwrap_or_else(|_| Self::new());
        config.api_key = Some(key.to_string());
        config.save()
    }

    /// The environment variable wins over the file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.clone().filter(|k| !k.trim().is_empty()))
    }

    /// Returns the source of the API key: "env", "config", or None
    pub fn key_source(&self) -> Option<&'static str> {
        if std::env::var(API_KEY_ENV).map(|k| !k.trim().is_empty()).unwrap_or(false) {
            Some("env")
        } else if self.api_key.as_deref().map(|k| !k.trim().is_empty()).unwrap_or(false) {
            Some("config")
        } else {
            None
        }
    }

    /// Storage for conversation history according to `history`.
    pub fn open_history_storage(&self) -> Result<Box<dyn Storage>> {
        match self.history {
            HistoryMode::Session => Ok(Box::new(MemoryStorage::new())),
            HistoryMode::Persistent => Ok(Box::new(SqliteStorage::open(&Self::database_path()?)?)),
        }
    }

    /// Preferences always persist.
    pub fn open_preferences_storage(&self) -> Result<Box<dyn Storage>> {
        Ok(Box::new(SqliteStorage::open(&Self::database_path()?)?))
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join(APP_DIR).join("config.json"))
    }

    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow!("Could not determine data directory"))?;

        Ok(data_dir.join(APP_DIR))
    }

    pub fn database_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("zev.db"))
    }

    pub fn log_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("zev.log"))
    }
}
