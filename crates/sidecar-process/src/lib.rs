//! Child process primitives for the game server sidecar
//!
//! This crate knows how to launch `<shell> <script>` style commands, deliver
//! graceful and forceful signals to them, and observe their exit without
//! handing the underlying child out to more than one owner.

#![warn(missing_docs)]

pub mod command;
pub mod error;
pub mod local;
pub mod process;

pub use command::Command;
pub use error::{Error, Result};
pub use local::{LocalLauncher, LocalProcessHandle, ProcessOutput};
pub use process::{ExitStatus, ProcessHandle};
