//! Staged shutdown of the game server.
//!
//! Backup first, then a graceful signal, a bounded poll for the exit, a kill,
//! and finally an unconditional release once the hard timeout expires so the
//! sidecar never hangs on a process that will not die.

use crate::cancel::Latch;
use crate::config::Timeouts;
use crate::hooks::ServerHooks;
use crate::ShutdownError;
use sidecar_process::{Error as ProcessError, ProcessHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Where a shutdown sequence is, or where it ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// Nothing has happened yet
    Running,
    /// The backup hook is running
    BackingUp,
    /// SIGTERM was sent, polling for the exit
    GracefulSignalSent,
    /// The server exited within the soft timeout
    StoppedGracefully,
    /// The server outlived the soft timeout
    SoftTimeoutExpired,
    /// The server exited after SIGKILL
    StoppedByKill,
    /// SIGKILL could not be sent
    KillFailed,
    /// The hard timeout expired and the process was abandoned
    Released,
    /// The server had already exited, nothing was done
    AlreadyStopped,
}

/// Runs the shutdown sequence at most once
pub struct ShutdownSequencer {
    process: Arc<dyn ProcessHandle>,
    hooks: Arc<dyn ServerHooks>,
    stop_soft: Duration,
    stop_hard: Duration,
    poll_interval: Duration,
    started: AtomicBool,
    finished: Latch,
    outcome: OnceLock<ShutdownState>,
}

impl ShutdownSequencer {
    /// Create a sequencer for `process`
    pub fn new(
        process: Arc<dyn ProcessHandle>,
        hooks: Arc<dyn ServerHooks>,
        timeouts: &Timeouts,
    ) -> Self {
        Self {
            process,
            hooks,
            stop_soft: timeouts.stop_soft(),
            stop_hard: timeouts.stop_hard(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            started: AtomicBool::new(false),
            finished: Latch::new(),
            outcome: OnceLock::new(),
        }
    }

    /// Override how often the exit is polled during the soft timeout
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The final state, once a sequence has completed
    pub fn outcome(&self) -> Option<ShutdownState> {
        self.outcome.get().copied()
    }

    /// Stop the server
    ///
    /// Only the first call runs the sequence; concurrent and later callers
    /// wait for it and get the same final state.
    pub async fn stop(&self) -> ShutdownState {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("shutdown already in progress, waiting");
            self.finished.wait().await;
            return self.outcome().unwrap_or(ShutdownState::AlreadyStopped);
        }

        let state = if self.process.has_exited() {
            info!(state = ?ShutdownState::AlreadyStopped, "server already exited");
            ShutdownState::AlreadyStopped
        } else {
            self.run().await
        };

        let _ = self.outcome.set(state);
        self.finished.set();
        state
    }

    async fn run(&self) -> ShutdownState {
        let begin = Instant::now();
        let pid = self.process.pid();
        let transition = |state: ShutdownState| {
            info!(?pid, ?state, elapsed = ?begin.elapsed(), "shutdown state");
            state
        };

        let released = Latch::new();
        self.spawn_releaser(released.clone());

        let _ = transition(ShutdownState::BackingUp);
        if let Err(e) = self.hooks.backup().await {
            warn!(error = %ShutdownError::Backup(e), "continuing shutdown");
        }

        if let Err(e) = self.process.terminate().await {
            warn!(error = %ShutdownError::Signal(e), "continuing shutdown");
        }
        let signalled = Instant::now();
        let _ = transition(ShutdownState::GracefulSignalSent);

        loop {
            if self.process.has_exited() {
                return transition(ShutdownState::StoppedGracefully);
            }
            if released.is_set() {
                return transition(ShutdownState::Released);
            }
            if signalled.elapsed() >= self.stop_soft {
                break;
            }
            smol::Timer::after(self.poll_interval).await;
        }
        let _ = transition(ShutdownState::SoftTimeoutExpired);

        let killed = match self.process.kill().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %ShutdownError::Kill(e), "server may still be running");
                let _ = transition(ShutdownState::KillFailed);
                false
            }
        };

        // Bounded by the releaser.
        match self.process.wait().await {
            Ok(status) if killed => {
                debug!(%status, "server exited after kill");
                transition(ShutdownState::StoppedByKill)
            }
            Ok(status) => {
                debug!(%status, "server exited on its own");
                ShutdownState::KillFailed
            }
            Err(ProcessError::Released { .. }) => transition(ShutdownState::Released),
            Err(e) => {
                warn!(error = %e, "lost track of server");
                transition(ShutdownState::Released)
            }
        }
    }

    fn spawn_releaser(&self, released: Latch) {
        let process = self.process.clone();
        let stop_hard = self.stop_hard;
        smol::spawn(async move {
            smol::Timer::after(stop_hard).await;
            if !process.has_exited() {
                warn!(pid = ?process.pid(), ?stop_hard, "hard stop timeout reached, releasing server");
            }
            process.release();
            released.set();
        })
        .detach();
    }
}
