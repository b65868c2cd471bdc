// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration file.
//!
//! Optional TOML with `[registry]` and `[sync]` tables; every key has a
//! default so an empty or missing file is valid.

use std::path::Path;
use std::time::Duration;

use fieldsync_core::{ConflictPolicy, LivenessPolicy};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Connection liveness timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    pub sweep_interval_ms: u64,
    pub inactivity_timeout_ms: u64,
    pub grace_period_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig { sweep_interval_ms: 30_000, inactivity_timeout_ms: 60_000, grace_period_ms: 300_000 }
    }
}

impl RegistryConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn liveness(&self) -> LivenessPolicy {
        LivenessPolicy { inactivity_timeout_ms: self.inactivity_timeout_ms, grace_period_ms: self.grace_period_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Policy assigned to devices on first contact.
    pub default_conflict_policy: ConflictPolicy,
    /// Cap on changes returned by one `sync_request`.
    pub max_changes_per_request: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig { default_conflict_policy: ConflictPolicy::ServerWins, max_changes_per_request: 1000 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub registry: RegistryConfig,
    pub sync: SyncConfig,
}

impl Config {
    pub fn from_toml(content: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|source| ConfigError::Parse { path: path.to_string(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Config::default());
        };
        let display = path.display().to_string();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        Self::from_toml(&content, &display)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("registry.sweep_interval_ms must be positive".into()));
        }
        if self.sync.max_changes_per_request == 0 {
            return Err(ConfigError::Invalid("sync.max_changes_per_request must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
