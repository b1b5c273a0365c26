// ABOUTME: Configuration management for rinspect
// Handles pool tuning, SSH settings and host aliases loaded from TOML files

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod hosts;

pub use hosts::{AuthMethod, HostDirectory, HostEntry, HostError, ResolvedHost};

use crate::pool::PoolConfig;
use crate::ssh::SshSettings;

/// Environment variables overriding `[pool]` settings
pub const ENV_IDLE_TIMEOUT: &str = "RINSPECT_IDLE_TIMEOUT_SECONDS";
pub const ENV_MAX_POOL_SIZE: &str = "RINSPECT_MAX_POOL_SIZE";
pub const ENV_MAX_CONCURRENT_REQUESTS: &str = "RINSPECT_MAX_CONCURRENT_REQUESTS";
pub const ENV_CONNECT_TIMEOUT: &str = "RINSPECT_CONNECT_TIMEOUT_SECONDS";
pub const ENV_REQUEST_TIMEOUT: &str = "RINSPECT_REQUEST_TIMEOUT_SECONDS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Session pool tuning
    pub pool: PoolConfig,

    /// SSH transport settings
    pub ssh: SshSettings,

    /// Host aliases
    pub hosts: BTreeMap<String, HostEntry>,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// With an explicit path only that file is read. Otherwise the project file
    /// (`./.rinspect/config.toml`) overrides the user file
    /// (`~/.rinspect/config.toml`). Environment overrides apply last.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let paths = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                vec![path.to_path_buf()]
            }
            None => Self::get_config_paths(),
        };

        let mut merged = toml::Value::Table(toml::map::Map::new());

        // Lowest precedence first
        for path in paths.iter().rev() {
            if path.exists() {
                let content = fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config from {}", path.display()))?;

                let value: toml::Value = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config from {}", path.display()))?;

                merge_values(&mut merged, value);
            }
        }

        let mut config: Self = merged.try_into().context("Invalid configuration")?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.pool.validate().context("Invalid [pool] settings")?;

        Ok(config)
    }

    /// Parse a single TOML document (no file lookup, no environment)
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config")?;
        config.pool.validate().context("Invalid [pool] settings")?;
        Ok(config)
    }

    /// Apply `RINSPECT_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = parse_env::<u64>(&lookup, ENV_IDLE_TIMEOUT)? {
            self.pool.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parse_env::<usize>(&lookup, ENV_MAX_POOL_SIZE)? {
            self.pool.max_pool_size = size;
        }
        if let Some(limit) = parse_env::<usize>(&lookup, ENV_MAX_CONCURRENT_REQUESTS)? {
            self.pool.max_concurrent_requests = limit;
        }
        if let Some(secs) = parse_env::<u64>(&lookup, ENV_CONNECT_TIMEOUT)? {
            self.pool.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>(&lookup, ENV_REQUEST_TIMEOUT)? {
            self.pool.request_timeout = Some(Duration::from_secs(secs));
        }
        Ok(())
    }

    /// Directory for JSONL log files (`~/.rinspect/logs`)
    pub fn log_dir() -> Result<PathBuf> {
        Ok(Self::get_user_config_dir()?.join("logs"))
    }

    /// Get configuration file paths in order of precedence
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        // 1. Local project config
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".rinspect").join("config.toml"));
        }

        // 2. User config (~/.rinspect/config.toml)
        if let Ok(config_dir) = Self::get_user_config_dir() {
            paths.push(config_dir.join("config.toml"));
        }

        paths
    }

    /// Get user configuration directory
    fn get_user_config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home_dir.join(".rinspect"))
    }
}

fn parse_env<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        _ => Ok(None),
    }
}

/// Deep-merge `overlay` into `base`; tables merge key by key, anything else replaces
fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
