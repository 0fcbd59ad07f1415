//! Configuration file support for pipetree
//!
//! Reads from .pipetree/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A config file that exists but cannot be used
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Configuration structure
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct Config {
    /// Graph store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Who requests are made on behalf of
    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Graph store location and pooling
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    /// Explicit database file. PIPETREE_DB_PATH still wins over this.
    #[serde(default)]
    pub path: Option<String>,

    /// Maximum pooled SQLite connections
    /// Default: 5
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

/// Author identity used when --author and PIPETREE_AUTHOR are absent
#[derive(Debug, Deserialize, Serialize, Default, Clone)]
pub struct IdentityConfig {
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogConfig {
    /// tracing filter directive, e.g. "info" or "pipetree=debug"
    /// Default: "info"
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_pool_size() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: default_pool_size(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from .pipetree/config.toml
    /// Returns default config if file doesn't exist, an error if it can't be read or parsed
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load config from an explicit file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Find config.toml by walking up directory tree
    fn find_config_path() -> Option<PathBuf> {
        let current_dir = std::env::current_dir().ok()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".pipetree").join("config.toml");
            if config_path.exists() {
                return Some(config_path);
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
        None
    }

    /// Pick the author: explicit value first, then the configured identity
    pub fn resolve_author(&self, explicit: Option<&str>) -> Option<String> {
        let present = |author: &String| !author.trim().is_empty();
        explicit
            .map(str::to_string)
            .filter(present)
            .or_else(|| self.identity.author.clone().filter(present))
    }
}
