// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the gateway.
//!
//! # Example
//!
//! ```
//! use plfs_gateway::{GatewayConfig, Mode};
//!
//! // Minimal config (uses defaults)
//! let config = GatewayConfig::default();
//! assert_eq!(config.workers, 20);
//! assert_eq!(config.mode(), Mode::WriteOnly);
//!
//! // Reader that finalizes directories left open by a crashed writer
//! let config = GatewayConfig {
//!     read_mode: true,
//!     conversion: true,
//!     data_dir: Some("/var/lib/plfs".into()),
//!     ..Default::default()
//! };
//! assert_eq!(config.mode(), Mode::ReadOnly);
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::policy::NamespacePolicy;
use crate::service::Mode;

/// Configuration for the gateway.
///
/// Every field has a default, so an empty TOML file is valid.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Serve reads instead of writes
    #[serde(default)]
    pub read_mode: bool,

    /// Finalize each namespace through a write handle before the read-mode
    /// open. Ignored in write mode.
    #[serde(default)]
    pub conversion: bool,

    /// RPC worker threads (default: 20)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Interval between background drains in milliseconds (default: 5000)
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// RPC listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Root directory for namespace directories. `None` keeps everything in
    /// process memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Replaces the built-in namespace table (name → caching enabled)
    #[serde(default)]
    pub namespaces: Option<BTreeMap<String, bool>>,
}

fn default_workers() -> usize { 20 }
fn default_flush_interval_ms() -> u64 { 5_000 }
fn default_listen_addr() -> String { "127.0.0.1:7070".to_string() }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            read_mode: false,
            conversion: false,
            workers: default_workers(),
            flush_interval_ms: default_flush_interval_ms(),
            listen_addr: default_listen_addr(),
            data_dir: None,
            namespaces: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("Invalid config file {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl GatewayConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from_read_flag(self.read_mode)
    }

    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Namespace table: the configured override or the built-in set.
    #[must_use]
    pub fn policy(&self) -> NamespacePolicy {
        match &self.namespaces {
            Some(table) => NamespacePolicy::new(table.iter().map(|(ns, on)| (ns.clone(), *on))),
            None => NamespacePolicy::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid("flush_interval_ms must be positive".into()));
        }
        if self.namespaces.as_ref().is_some_and(BTreeMap::is_empty) {
            return Err(ConfigError::Invalid("namespace table is empty".into()));
        }
        Ok(())
    }
}
