//! Configuration management for the roost CLI.

use anyhow::{Context, Result};
use roost::SyncEngine;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::persist::JsonPersistence;
use crate::sim::{self, SimConfig};

/// CLI configuration.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Local user the engine acts as.
    pub owner: String,
    /// Entities per feed page.
    pub page_size: usize,
    /// Background refresh interval in seconds for `feed watch`.
    pub poll_secs: u64,
    /// Simulated backend behavior.
    pub sim: SimConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: "me".to_string(),
            page_size: 10,
            poll_secs: 30,
            sim: SimConfig::default(),
        }
    }
}

/// Get the configuration file path.
pub fn config_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("roost.toml"))
}

/// Get the cache file path.
pub fn cache_path() -> Result<PathBuf> {
    Ok(data_dir()?.join("roost-cache.json"))
}

fn data_dir() -> Result<PathBuf> {
    let exe_path = env::current_exe().context("Could not determine executable path")?;
    let exe_dir = exe_path
        .parent()
        .context("Could not determine executable directory")?;
    Ok(exe_dir.to_path_buf())
}

/// Load configuration from file.
pub fn load_config() -> Result<Config> {
    let path = config_path()?;

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&path).context("Failed to read config file")?;

    toml::from_str(&content).context("Failed to parse config file")
}

/// Save configuration to file.
pub fn save_config(config: &Config) -> Result<()> {
    let path = config_path()?;
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;

    fs::write(&path, content).context("Failed to write config file")?;

    Ok(())
}

/// Build an engine over the simulated remote and the file-backed cache.
pub fn build_engine() -> Result<SyncEngine> {
    let config = load_config()?;

    let remote = Arc::new(sim::build_remote(&config));
    let persistence = Arc::new(JsonPersistence::new(cache_path()?));

    SyncEngine::builder()
        .owner(config.owner.as_str())
        .remote(remote)
        .persistence(persistence)
        .page_size(config.page_size)
        .mutation_cooldown(Duration::from_millis(500))
        .build()
        .context("Failed to build sync engine")
}
