//! Supervisor configuration types.
//!
//! Everything here is immutable once the supervisor is built. Durations are
//! whole seconds at the configuration boundary and [`Duration`] in code.

use crate::{Error, Result};
use sidecar_process::Command;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// A shell and the script it runs
///
/// Used for the start, health and backup commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Interpreter to invoke
    pub shell: PathBuf,
    /// Script passed as the interpreter's sole argument
    pub script: PathBuf,
}

impl ProcessConfig {
    /// Create a new process configuration
    pub fn new(shell: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            script: script.into(),
        }
    }

    /// Build the command that runs this script
    pub fn command(&self) -> Command {
        Command::script(&self.shell, &self.script)
    }
}

/// Console output marker that signals the server is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyCondition {
    /// Exact, case-sensitive substring to look for
    pub message: String,
    /// How many occurrences are required
    pub count: usize,
}

impl ReadyCondition {
    /// Create a ready condition, rejecting an empty marker or a zero count
    pub fn new(message: impl Into<String>, count: usize) -> Result<Self> {
        let message = message.into();
        if message.is_empty() {
            return Err(Error::InvalidConfig("ready message must not be empty".into()));
        }
        if count == 0 {
            return Err(Error::InvalidConfig("ready count must be at least 1".into()));
        }
        Ok(Self { message, count })
    }
}

/// Lifecycle timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    ready: Duration,
    stop_soft: Duration,
    stop_hard: Duration,
    health: Duration,
}

impl Timeouts {
    /// Create a set of timeouts
    ///
    /// The hard stop timeout must exceed the soft one.
    pub fn new(
        ready: Duration,
        stop_soft: Duration,
        stop_hard: Duration,
        health: Duration,
    ) -> Result<Self> {
        if stop_hard <= stop_soft {
            return Err(Error::InvalidConfig(format!(
                "hard stop timeout ({:?}) must exceed soft stop timeout ({:?})",
                stop_hard, stop_soft
            )));
        }
        Ok(Self {
            ready,
            stop_soft,
            stop_hard,
            health,
        })
    }

    /// Create timeouts from whole seconds
    pub fn from_secs(ready: u64, stop_soft: u64, stop_hard: u64, health: u64) -> Result<Self> {
        Self::new(
            Duration::from_secs(ready),
            Duration::from_secs(stop_soft),
            Duration::from_secs(stop_hard),
            Duration::from_secs(health),
        )
    }

    /// How long to wait for the ready marker
    pub fn ready(&self) -> Duration {
        self.ready
    }

    /// How long to wait for a graceful exit before killing
    pub fn stop_soft(&self) -> Duration {
        self.stop_soft
    }

    /// When to release the process no matter what
    pub fn stop_hard(&self) -> Duration {
        self.stop_hard
    }

    /// Upper bound for one health command run
    pub fn health(&self) -> Duration {
        self.health
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            ready: Duration::from_secs(30),
            stop_soft: Duration::from_secs(10),
            stop_hard: Duration::from_secs(15),
            health: Duration::from_secs(5),
        }
    }
}

/// How health is relayed upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReporting {
    /// Time between two health checks
    pub interval: Duration,
    /// Consecutive check or relay errors tolerated before giving up
    pub failure_threshold: u32,
}

impl Default for HealthReporting {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            failure_threshold: 3,
        }
    }
}

/// Everything a [`ProcessSupervisor`](crate::ProcessSupervisor) needs
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Command that starts the game server
    pub start: ProcessConfig,
    /// Command whose exit code reports health
    pub health: ProcessConfig,
    /// Readiness marker
    pub ready: ReadyCondition,
    /// Lifecycle timeouts
    pub timeouts: Timeouts,
    /// Health reporting cadence
    pub reporting: HealthReporting,
    /// Extra environment for the game server process
    pub env: HashMap<String, String>,
}

impl SupervisorConfig {
    /// Create a configuration with default timeouts and reporting
    pub fn new(start: ProcessConfig, health: ProcessConfig, ready: ReadyCondition) -> Self {
        Self {
            start,
            health,
            ready,
            timeouts: Timeouts::default(),
            reporting: HealthReporting::default(),
            env: HashMap::new(),
        }
    }

    /// Override the timeouts
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the health reporting cadence
    pub fn with_reporting(mut self, reporting: HealthReporting) -> Self {
        self.reporting = reporting;
        self
    }

    /// Add an environment variable for the game server process
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}
