//! Server configuration.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use pagecache_common::constants::PAGE_SIZE_CLASSES;

/// Server configuration.
///
/// Loadable from a TOML file; the command line overrides individual
/// fields on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path of the backing data file (created if absent).
    pub data_file: PathBuf,

    /// Filesystem path for the listening socket.
    pub socket_path: PathBuf,

    /// Page counts per size class, in 8 KiB, 16 KiB, 32 KiB, 2 MiB
    /// order. Only the leading classes with positive counts populate the
    /// layout.
    #[serde(default)]
    pub page_counts: Vec<u64>,

    /// Optional cap on resident pages. When unset the cache derives its
    /// capacity from the layout and the pool byte bound.
    #[serde(default)]
    pub capacity: Option<usize>,

    /// Log level (error, warn, info, debug, trace).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServerConfig {
    /// Creates a configuration with the given paths and counts.
    pub fn new(
        data_file: impl Into<PathBuf>,
        socket_path: impl Into<PathBuf>,
        page_counts: Vec<u64>,
    ) -> Self {
        Self {
            data_file: data_file.into(),
            socket_path: socket_path.into(),
            page_counts,
            capacity: None,
            log_level: default_log_level(),
        }
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Converts the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.page_counts.is_empty() {
            return Err("at least one page count is required");
        }
        if self.page_counts.len() > PAGE_SIZE_CLASSES.len() {
            return Err("more page counts than supported size classes");
        }
        if self.page_counts.first() == Some(&0) {
            return Err("the first size class needs a positive page count");
        }
        Ok(())
    }
}
