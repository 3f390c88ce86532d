//! Pluggable per-game operations.

use crate::config::ProcessConfig;
use crate::interceptor::CapturedOutput;
use crate::{Error, Result};
use async_trait::async_trait;
use sidecar_process::LocalLauncher;
use std::collections::HashMap;
use tracing::{debug, info};

/// Game-specific operations the supervisor delegates to
///
/// Every method has a default, so implementors override only what their game
/// supports.
#[async_trait]
pub trait ServerHooks: Send + Sync {
    /// Human-readable status of the game server
    async fn status(&self) -> Result<String> {
        Ok("OK".to_string())
    }

    /// Recent server logs
    async fn logs(&self, output: &CapturedOutput) -> Result<String> {
        Ok(output.combined())
    }

    /// Persist game state before shutdown
    async fn backup(&self) -> Result<()> {
        Ok(())
    }
}

/// Hooks using all defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHooks;

impl ServerHooks for DefaultHooks {}

/// Hooks whose backup runs a configured script
#[derive(Debug, Clone, Default)]
pub struct CommandHooks {
    backup: Option<ProcessConfig>,
    env: HashMap<String, String>,
    launcher: LocalLauncher,
}

impl CommandHooks {
    /// Create hooks running `backup` on shutdown, if set
    pub fn new(backup: Option<ProcessConfig>) -> Self {
        Self {
            backup,
            env: HashMap::new(),
            launcher: LocalLauncher,
        }
    }

    /// Extra environment for the backup command
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

#[async_trait]
impl ServerHooks for CommandHooks {
    async fn backup(&self) -> Result<()> {
        let Some(backup) = &self.backup else {
            debug!("no backup command configured");
            return Ok(());
        };

        let mut command = backup.command();
        command.envs(&self.env);
        info!(command = %command, "running backup");
        let status = self
            .launcher
            .execute(&command)
            .await
            .map_err(|e| Error::Hook(format!("backup `{}`: {}", command, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Hook(format!("backup `{}` failed with {}", command, status)))
        }
    }
}
