//! # Sidecar Supervisor
//!
//! Lifecycle supervision for a single game server process running next to a
//! platform agent.
//!
//! The supervisor launches the server script, watches its console output for
//! a ready marker, relays health to the platform and shuts the server down
//! with a backup, a graceful signal, a kill and a hard release deadline.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sidecar_supervisor::{
//!     signal_context, DefaultHooks, ProcessConfig, ProcessSupervisor, ReadyCondition,
//!     SupervisorConfig,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! smol::block_on(async {
//!     let config = SupervisorConfig::new(
//!         ProcessConfig::new("/bin/bash", "/start"),
//!         ProcessConfig::new("/bin/bash", "/health.sh"),
//!         ReadyCondition::new("Done", 1)?,
//!     );
//!     let token = signal_context()?;
//!
//!     let mut supervisor = ProcessSupervisor::new(config, Arc::new(DefaultHooks::default()));
//!     supervisor.start(&token)?;
//!     supervisor.wait().await?;
//!     supervisor.serve(&token).await?;
//!     supervisor.stop().await;
//!     Ok::<(), anyhow::Error>(())
//! })
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod cancel;
mod config;
mod health;
mod hooks;
mod interceptor;
mod platform;
mod readiness;
mod shutdown;
mod signals;
mod supervisor;

pub use cancel::{CancellationToken, Latch};
pub use config::{HealthReporting, ProcessConfig, ReadyCondition, SupervisorConfig, Timeouts};
pub use health::{HealthCheckable, HealthProbe, HealthReporter};
pub use hooks::{CommandHooks, DefaultHooks, ServerHooks};
pub use interceptor::{
    pump, CaptureBuffer, CapturedOutput, OutputInterceptor, DEFAULT_CAPTURE_LIMIT,
};
pub use platform::{AgonesPlatform, Platform, PlatformError, StandalonePlatform};
pub use readiness::{readiness_gate, Readiness, ReadinessGate, ReadySignal};
pub use shutdown::{ShutdownSequencer, ShutdownState};
pub use signals::signal_context;
pub use supervisor::ProcessSupervisor;

pub use sidecar_process::ExitStatus;

use std::time::Duration;

/// Error types for supervision
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The server process could not be launched
    #[error("Failed to launch server: {0}")]
    Launch(String),

    /// The ready marker was not seen in time
    #[error("Server not ready after {elapsed:?}; last output:\n{output_tail}")]
    ReadinessTimeout {
        /// How long we waited
        elapsed: Duration,
        /// Last captured output lines
        output_tail: String,
    },

    /// Stdout closed before the ready marker was seen
    #[error("Server output closed before it became ready")]
    OutputClosed,

    /// The server exited abnormally while serving
    #[error("Server crashed with {status}; last output:\n{output_tail}")]
    Crash {
        /// Exit status of the server
        status: ExitStatus,
        /// Last captured output lines
        output_tail: String,
    },

    /// The health command could not be run
    #[error("Health check error: {0}")]
    HealthCheck(#[from] HealthCheckError),

    /// Health reporting failed too many times in a row
    #[error("Health reporting failed {failures} times in a row: {last_error}")]
    HealthReporting {
        /// Consecutive failures observed
        failures: u32,
        /// The failure that reached the threshold
        last_error: String,
    },

    /// Platform call failed
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Configuration rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// `start` was called twice
    #[error("Server already started")]
    AlreadyStarted,

    /// The operation needs a started server
    #[error("Server not started")]
    NotStarted,

    /// A server hook failed
    #[error("Hook failed: {0}")]
    Hook(String),

    /// Process layer failure
    #[error("Process error: {0}")]
    Process(#[from] sidecar_process::Error),
}

/// Result type for supervision
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to obtain a health verdict
#[derive(thiserror::Error, Debug)]
pub enum HealthCheckError {
    /// The health command could not be started
    #[error("failed to run health command: {0}")]
    Launch(#[source] sidecar_process::Error),

    /// The health command did not finish in time
    #[error("health command timed out after {0:?}")]
    Timeout(Duration),
}

/// Non-fatal failures during shutdown, only ever logged
#[derive(thiserror::Error, Debug)]
pub enum ShutdownError {
    /// The backup hook failed
    #[error("backup failed: {0}")]
    Backup(#[source] Error),

    /// The graceful signal could not be sent
    #[error("failed to send graceful signal: {0}")]
    Signal(#[source] sidecar_process::Error),

    /// The kill signal could not be sent
    #[error("failed to kill server: {0}")]
    Kill(#[source] sidecar_process::Error),
}
