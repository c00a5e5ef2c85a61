//! Configuration types for the Zero planner services.
//!
//! Configuration is read from `~/.zero/config.json`. A missing file is not an
//! error: every section falls back to its defaults, and environment variables
//! are applied on top by [`Config::load_with_env`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".zero"),
        |dirs| dirs.home_dir().join(".zero"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration (Global bind address)
// ============================================================================

/// Global network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address shared by all services
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

// ============================================================================
// Service Ports
// ============================================================================

/// Per-service port configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    /// Planner service
    #[serde(default)]
    pub planner: ServicePortConfig,
}

/// Port override for one service. `None` uses the service default.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicePortConfig {
    #[serde(default)]
    pub port: Option<u16>,
}

/// Default planner service port.
pub const DEFAULT_PLANNER_PORT: u16 = 4440;

// ============================================================================
// Observability
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets held at `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

// ============================================================================
// Planner Service
// ============================================================================

/// Runtime limits of the planner service.
///
/// These bound the CPU and memory a single request can consume. Generator
/// and cost parameters are not configured here: callers send them with every
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerServiceConfig {
    /// Size of the evaluation worker pool
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Maximum sequences accepted by batch endpoints
    #[serde(default = "default_max_batch_sequences")]
    pub max_batch_sequences: usize,

    /// Maximum sequences accepted by the compare endpoint
    #[serde(default = "default_max_compare_sequences")]
    pub max_compare_sequences: usize,

    /// Maximum Monte Carlo paths per request
    #[serde(default = "default_max_monte_carlo_paths")]
    pub max_monte_carlo_paths: usize,

    /// Deadline applied when a request carries no `timeout_ms`.
    /// `None` means requests run to completion unless the client goes away.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

impl Default for PlannerServiceConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_batch_sequences: default_max_batch_sequences(),
            max_compare_sequences: default_max_compare_sequences(),
            max_monte_carlo_paths: default_max_monte_carlo_paths(),
            default_timeout_ms: None,
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_max_batch_sequences() -> usize {
    10_000
}

fn default_max_compare_sequences() -> usize {
    100
}

fn default_max_monte_carlo_paths() -> usize {
    1_000
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration structure for the planner services.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Global network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Service port configuration
    #[serde(default)]
    pub services: ServicesConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Planner service limits
    #[serde(default)]
    pub planner: PlannerServiceConfig,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(bind) = lookup("ZERO_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Some(port) = lookup("ZERO_PLANNER_PORT").and_then(|p| p.parse().ok()) {
            self.services.planner.port = Some(port);
        }

        if let Some(workers) = lookup("ZERO_PLANNER_WORKERS").and_then(|w| w.parse().ok()) {
            self.planner.workers = workers;
        }

        if let Some(level) = lookup("ZERO_LOG_LEVEL") {
            self.observability.log_level = level;
        }

        if let Some(format) = lookup("ZERO_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Planner service port.
    pub fn planner_port(&self) -> u16 {
        self.services.planner.port.unwrap_or(DEFAULT_PLANNER_PORT)
    }

    /// Address the planner service binds to.
    pub fn planner_addr(&self) -> String {
        format!("{}:{}", self.network.bind, self.planner_port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.network.bind, "127.0.0.1");
        assert_eq!(config.planner_port(), DEFAULT_PLANNER_PORT);
        assert_eq!(config.planner.workers, 4);
        assert_eq!(config.planner.max_batch_sequences, 10_000);
        assert_eq!(config.planner.max_compare_sequences, 100);
        assert_eq!(config.planner.max_monte_carlo_paths, 1_000);
        assert!(config.planner.default_timeout_ms.is_none());
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.observability.log_format, "pretty");
        assert_eq!(config.planner.workers, 4);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "services": {{ "planner": {{ "port": 5000 }} }},
                "observability": {{ "level": "debug", "format": "json" }},
                "planner": {{ "workers": 8, "default_timeout_ms": 2500 }}
            }}"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.planner_port(), 5000);
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
        assert_eq!(config.planner.workers, 8);
        assert_eq!(config.planner.default_timeout_ms, Some(2500));
        assert_eq!(config.planner.max_batch_sequences, 10_000);
    }

    #[test]
    fn test_load_from_invalid_json_fails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("ZERO_BIND_ADDRESS", "0.0.0.0"),
            ("ZERO_PLANNER_PORT", "4555"),
            ("ZERO_PLANNER_WORKERS", "2"),
            ("ZERO_LOG_LEVEL", "warn"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.planner_addr(), "0.0.0.0:4555");
        assert_eq!(config.planner.workers, 2);
        assert_eq!(config.observability.log_level, "warn");
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_unparseable_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| (key == "ZERO_PLANNER_PORT").then(|| "abc".to_string()));
        assert_eq!(config.planner_port(), DEFAULT_PLANNER_PORT);
    }
}
