//! Configuration parser with environment variable substitution

use crate::{
    Config, ConfigError, Result, Script,
    resolver::{ResolutionContext, resolve_string},
};
use sidecar_supervisor::{
    HealthReporting, ProcessConfig, ReadyCondition, SupervisorConfig, Timeouts,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Read, substitute, parse and validate a configuration file
pub fn load(path: impl AsRef<Path>, context: &ResolutionContext) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let resolved = resolve_string(&content, context)?;
    parse_str(&resolved)
}

/// Parse and validate YAML configuration from a string
///
/// No substitution happens here; see [`load`].
pub fn parse_str(content: &str) -> Result<Config> {
    let config: Config = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_script("start", &config.start)?;
    validate_script("health", &config.health)?;
    if let Some(backup) = &config.backup {
        validate_script("backup", backup)?;
    }

    if config.ready.message.is_empty() {
        return Err(ConfigError::ValidationError(
            "ready.message must not be empty".to_string(),
        ));
    }
    if config.ready.count == 0 {
        return Err(ConfigError::ValidationError(
            "ready.count must be at least 1".to_string(),
        ));
    }

    let timeouts = &config.timeouts;
    if timeouts.stop_hard <= timeouts.stop_soft {
        return Err(ConfigError::ValidationError(format!(
            "timeouts.stop_hard ({}) must exceed timeouts.stop_soft ({})",
            timeouts.stop_hard, timeouts.stop_soft
        )));
    }

    if config.health_report.interval == 0 {
        return Err(ConfigError::ValidationError(
            "health_report.interval must be at least 1".to_string(),
        ));
    }
    if config.health_report.failure_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "health_report.failure_threshold must be at least 1".to_string(),
        ));
    }

    for setting in &config.settings {
        if setting.name.is_empty() || setting.value.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "setting '{}' -> '{}' needs both a name and a value",
                setting.name, setting.value
            )));
        }
    }

    Ok(())
}

fn validate_script(field: &str, script: &Script) -> Result<()> {
    if script.shell.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{}.shell must not be empty",
            field
        )));
    }
    if script.script.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "{}.script must not be empty",
            field
        )));
    }
    Ok(())
}

impl Script {
    /// Convert to the supervisor's process configuration
    pub fn to_process_config(&self) -> ProcessConfig {
        ProcessConfig::new(&self.shell, &self.script)
    }
}

impl Config {
    /// Convert to the supervisor's configuration
    ///
    /// `env` is the sidecar's environment, the source for the settings
    /// remapping.
    pub fn to_supervisor_config(&self, env: &HashMap<String, String>) -> Result<SupervisorConfig> {
        let invalid = |e: sidecar_supervisor::Error| ConfigError::ValidationError(e.to_string());

        let ready = ReadyCondition::new(&self.ready.message, self.ready.count).map_err(invalid)?;
        let timeouts = Timeouts::from_secs(
            self.timeouts.ready,
            self.timeouts.stop_soft,
            self.timeouts.stop_hard,
            self.timeouts.health,
        )
        .map_err(invalid)?;
        let reporting = HealthReporting {
            interval: Duration::from_secs(self.health_report.interval),
            failure_threshold: self.health_report.failure_threshold,
        };

        let mut config = SupervisorConfig::new(
            self.start.to_process_config(),
            self.health.to_process_config(),
            ready,
        )
        .with_timeouts(timeouts)
        .with_reporting(reporting);
        config.env = self.remap_settings(env);

        Ok(config)
    }

    /// The backup command, if configured
    pub fn backup_process(&self) -> Option<ProcessConfig> {
        self.backup.as_ref().map(Script::to_process_config)
    }
}
