//! Process management traits and types

use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

/// A handle to control a running process
///
/// All methods take `&self`: the handle is shared between the task waiting
/// for the process to exit and the task shutting it down, while the child
/// itself stays owned by a single reaper.
#[async_trait]
pub trait ProcessHandle: Send + Sync {
    /// Get the process ID
    fn pid(&self) -> Option<u32>;

    /// Returns true once the process has exited and been reaped
    fn has_exited(&self) -> bool;

    /// Wait for the process to complete and return its exit status
    ///
    /// Fails with [`Error::Released`](crate::Error::Released) if the handle
    /// is released before the process exits.
    async fn wait(&self) -> Result<ExitStatus>;

    /// Send SIGTERM (or equivalent) for graceful shutdown
    async fn terminate(&self) -> Result<()>;

    /// Send SIGKILL (or equivalent) to forcefully stop the process
    async fn kill(&self) -> Result<()>;

    /// Stop tracking the process and free the resources held for it
    ///
    /// Pending and future calls to [`wait`](Self::wait) fail. Has no effect
    /// once the process has exited.
    fn release(&self);
}

/// Process exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Returns true if the process was terminated by a signal
    pub fn terminated_by_signal(&self) -> bool {
        #[cfg(unix)]
        {
            self.signal.is_some()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        #[cfg(unix)]
        if let Some(signal) = self.signal {
            return write!(f, "terminated by signal {}", signal);
        }
        match self.code {
            Some(code) => write!(f, "exit status {}", code),
            None => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_display() {
        let ok = ExitStatus {
            code: Some(0),
            #[cfg(unix)]
            signal: None,
        };
        assert!(ok.success());
        assert_eq!(ok.to_string(), "exit status 0");

        #[cfg(unix)]
        {
            let killed = ExitStatus {
                code: None,
                signal: Some(9),
            };
            assert!(!killed.success());
            assert!(killed.terminated_by_signal());
            assert_eq!(killed.to_string(), "terminated by signal 9");
        }
    }
}
