//! # Sidecar Configuration
//!
//! YAML configuration for the game server sidecar.
//!
//! This crate parses `sidecar.yaml` files, substitutes `${VAR}` references
//! from the environment and converts the result into the supervisor's
//! configuration types.

#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub mod parser;
pub mod resolver;

pub use parser::{load, parse_str};
pub use resolver::ResolutionContext;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    /// Environment variable not found
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
}

/// Result type for configuration operations
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Optional server name, used in logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Command that starts the game server
    #[serde(default = "Script::start")]
    pub start: Script,

    /// Command whose exit code reports health
    #[serde(default = "Script::health")]
    pub health: Script,

    /// Optional command run before shutdown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup: Option<Script>,

    /// Console marker announcing readiness
    pub ready: Ready,

    /// Lifecycle timeouts in seconds
    #[serde(default)]
    pub timeouts: TimeoutSettings,

    /// Health reporting cadence
    #[serde(default)]
    pub health_report: HealthReportSettings,

    /// Platform the sidecar reports to
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Environment variables renamed for the game server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub settings: Vec<Setting>,
}

/// A shell and the script it runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Script {
    /// Interpreter
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Script path
    pub script: String,
}

impl Script {
    fn start() -> Self {
        Self {
            shell: default_shell(),
            script: "/start".to_string(),
        }
    }

    fn health() -> Self {
        Self {
            shell: default_shell(),
            script: "/health.sh".to_string(),
        }
    }
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

/// Ready marker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ready {
    /// Exact, case-sensitive substring
    pub message: String,
    /// Occurrences required
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

/// Lifecycle timeouts in whole seconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeoutSettings {
    /// Ready marker timeout
    pub ready: u64,
    /// Grace period after SIGTERM
    pub stop_soft: u64,
    /// Release deadline, measured from the start of shutdown
    pub stop_hard: u64,
    /// Health command timeout
    pub health: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            ready: 30,
            stop_soft: 10,
            stop_hard: 15,
            health: 5,
        }
    }
}

/// Health reporting settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HealthReportSettings {
    /// Seconds between health checks
    pub interval: u64,
    /// Consecutive failures tolerated before giving up
    pub failure_threshold: u32,
}

impl Default for HealthReportSettings {
    fn default() -> Self {
        Self {
            interval: 2,
            failure_threshold: 3,
        }
    }
}

/// Platform selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlatformConfig {
    /// Agones SDK REST gateway
    Agones {
        /// Gateway port, defaults to `AGONES_SDK_HTTP_PORT` or 9358
        #[serde(default, skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
    },
    /// No orchestrator, calls are only logged
    Standalone,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::Agones { port: None }
    }
}

/// Copy the value of env `name` into env `value` for the game server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Setting {
    /// Variable to read from the sidecar's environment
    pub name: String,
    /// Variable to set in the game server's environment
    pub value: String,
}

impl Config {
    /// Server name for logs
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("game-server")
    }

    /// Child environment produced by the settings
    ///
    /// Settings whose source variable is unset are skipped.
    pub fn remap_settings(&self, env: &HashMap<String, String>) -> HashMap<String, String> {
        self.settings
            .iter()
            .filter_map(|s| env.get(&s.name).map(|v| (s.value.clone(), v.clone())))
            .collect()
    }
}
