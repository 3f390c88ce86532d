//! Local process execution backend

use async_channel::{Receiver, Sender};
use async_process::{Child, ChildStderr, ChildStdout, Stdio};
use async_trait::async_trait;
use futures_lite::future;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::{Error, Result};
use crate::process::{ExitStatus, ProcessHandle};

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

/// The output pipes of a launched process
///
/// Whoever takes these is responsible for draining them, otherwise the
/// child blocks once the pipe buffer fills up.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Piped standard output
    pub stdout: Option<ChildStdout>,
    /// Piped standard error
    pub stderr: Option<ChildStderr>,
}

/// How the reaper stopped watching the child
#[derive(Debug)]
enum Outcome {
    Exited(ExitStatus),
    Released,
    Lost(String),
}

/// A handle to control a local process
///
/// The child is owned by a detached reaper task. The handle only keeps the
/// pid for signalling, a write-once slot for the outcome and a channel that
/// closes when the reaper is done.
#[derive(Debug)]
pub struct LocalProcessHandle {
    pid: u32,
    outcome: Arc<OnceLock<Outcome>>,
    done: Receiver<()>,
    release: Sender<()>,
}

impl LocalLauncher {
    /// Launch a command with piped stdout/stderr
    pub fn launch(&self, command: &Command) -> Result<(ProcessOutput, LocalProcessHandle)> {
        let mut async_cmd = command.prepare();
        async_cmd.stdin(Stdio::null());
        async_cmd.stdout(Stdio::piped());
        async_cmd.stderr(Stdio::piped());

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("failed to spawn `{}`: {}", command, e)))?;

        let output = ProcessOutput {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };
        let handle = LocalProcessHandle::reap(child);
        debug!(pid = handle.pid, command = %command, "launched process");

        Ok((output, handle))
    }

    /// Execute a command to completion with all stdio discarded
    ///
    /// Dropping the returned future kills the child, so callers can bound it
    /// with a timer.
    pub async fn execute(&self, command: &Command) -> Result<ExitStatus> {
        let mut async_cmd = command.prepare();
        async_cmd.stdin(Stdio::null());
        async_cmd.stdout(Stdio::null());
        async_cmd.stderr(Stdio::null());
        async_cmd.kill_on_drop(true);

        let mut child = async_cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(format!("failed to spawn `{}`: {}", command, e)))?;
        let status = child.status().await?;

        Ok(status.into())
    }
}

impl LocalProcessHandle {
    fn reap(mut child: Child) -> Self {
        let pid = child.id();
        let outcome = Arc::new(OnceLock::new());
        let (done_tx, done_rx) = async_channel::bounded::<()>(1);
        let (release_tx, release_rx) = async_channel::bounded::<()>(1);

        let slot = outcome.clone();
        smol::spawn(async move {
            let reaped = future::or(async { Some(child.status().await) }, async {
                // Closed by `release` or when the handle is dropped.
                let _ = release_rx.recv().await;
                None
            })
            .await;

            let result = match reaped {
                Some(Ok(status)) => {
                    let status = ExitStatus::from(status);
                    debug!(pid, %status, "process exited");
                    Outcome::Exited(status)
                }
                Some(Err(e)) => {
                    warn!(pid, error = %e, "failed to wait for process");
                    Outcome::Lost(e.to_string())
                }
                None => {
                    debug!(pid, "process released");
                    Outcome::Released
                }
            };
            let _ = slot.set(result);
            done_tx.close();
        })
        .detach();

        Self {
            pid,
            outcome,
            done: done_rx,
            release: release_tx,
        }
    }

    /// The exit status, if the process has exited
    pub fn exit_status(&self) -> Option<ExitStatus> {
        match self.outcome.get() {
            Some(Outcome::Exited(status)) => Some(status.clone()),
            _ => None,
        }
    }

    /// Returns true if the handle was released before the process exited
    pub fn is_released(&self) -> bool {
        matches!(self.outcome.get(), Some(Outcome::Released))
    }

    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<()> {
        // Never signal a pid the reaper has already collected, it may be reused.
        if self.outcome.get().is_some() {
            return Ok(());
        }

        nix::sys::signal::kill(nix::unistd::Pid::from_raw(self.pid as i32), signal)
            .map_err(|e| Error::signal_failed(signal as i32, e.to_string()))
    }
}

#[async_trait]
impl ProcessHandle for LocalProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn has_exited(&self) -> bool {
        self.exit_status().is_some()
    }

    async fn wait(&self) -> Result<ExitStatus> {
        // Nothing is ever sent, this resolves once the reaper closes the channel.
        let _ = self.done.recv().await;

        match self.outcome.get() {
            Some(Outcome::Exited(status)) => Ok(status.clone()),
            Some(Outcome::Lost(reason)) => Err(Error::Io(std::io::Error::other(reason.clone()))),
            Some(Outcome::Released) | None => Err(Error::Released { pid: self.pid }),
        }
    }

    async fn terminate(&self) -> Result<()> {
        self.signal(nix::sys::signal::Signal::SIGTERM)
    }

    async fn kill(&self) -> Result<()> {
        self.signal(nix::sys::signal::Signal::SIGKILL)
    }

    fn release(&self) {
        self.release.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[smol_potat::test]
    async fn test_wait_reports_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("exit 3");

        let (_output, handle) = LocalLauncher.launch(&cmd).unwrap();
        let status = handle.wait().await.unwrap();

        assert_eq!(status.code, Some(3));
        assert!(handle.has_exited());
    }

    #[smol_potat::test]
    async fn test_terminate_running_process() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let (_output, handle) = LocalLauncher.launch(&cmd).unwrap();
        assert!(!handle.has_exited());

        handle.terminate().await.unwrap();
        let status = handle.wait().await.unwrap();

        #[cfg(unix)]
        assert_eq!(status.signal, Some(15));
    }

    #[smol_potat::test]
    async fn test_release_unblocks_waiters() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let (_output, handle) = LocalLauncher.launch(&cmd).unwrap();
        handle.release();

        let result = handle.wait().await;
        assert!(matches!(result, Err(Error::Released { .. })));
        assert!(handle.is_released());
        assert!(!handle.has_exited());

        // Signals are no longer delivered once the reaper has stopped watching.
        handle.kill().await.unwrap();

        let pid = nix::unistd::Pid::from_raw(handle.pid().unwrap() as i32);
        nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL).unwrap();
    }

    #[smol_potat::test]
    async fn test_signal_after_exit_is_noop() {
        let (_output, handle) = LocalLauncher.launch(&Command::new("true")).unwrap();
        handle.wait().await.unwrap();

        handle.terminate().await.unwrap();
        handle.kill().await.unwrap();
    }

    #[test]
    fn test_spawn_failure() {
        let result = LocalLauncher.launch(&Command::script("/nonexistent/interpreter", "/start"));
        assert!(matches!(result, Err(Error::SpawnFailed { .. })));
    }

    #[smol_potat::test]
    async fn test_execute_discards_output() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo noisy; exit 1");

        let status = LocalLauncher.execute(&cmd).await.unwrap();
        assert_eq!(status.code, Some(1));
    }

    #[smol_potat::test]
    async fn test_execute_can_be_bounded() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");

        let bounded = future::or(
            async { Some(LocalLauncher.execute(&cmd).await) },
            async {
                smol::Timer::after(Duration::from_millis(100)).await;
                None
            },
        )
        .await;

        assert!(bounded.is_none());
    }
}
