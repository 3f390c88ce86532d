//! Shared helpers for running the game-sidecar binary

#![allow(dead_code)]

use anyhow::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A scratch directory holding scripts and a config file
pub struct CliTestContext {
    pub test_dir: tempfile::TempDir,
}

impl CliTestContext {
    pub fn new() -> Result<Self> {
        Ok(Self {
            test_dir: tempfile::tempdir()?,
        })
    }

    /// Write a shell script into the scratch directory
    pub fn script(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.test_dir.path().join(name);
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "{}", body)?;
        Ok(path)
    }

    /// Write `sidecar.yaml` into the scratch directory
    pub fn config(&self, body: &str) -> Result<PathBuf> {
        let path = self.test_dir.path().join("sidecar.yaml");
        std::fs::write(&path, body)?;
        Ok(path)
    }

    pub fn run_cli_command(&self, config: &Path, args: &[&str]) -> Result<CliOutput> {
        self.run_cli_command_with_env(config, args, &[])
    }

    pub fn run_cli_command_with_env(
        &self,
        config: &Path,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<CliOutput> {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_game-sidecar"));
        cmd.arg("--config").arg(config).args(args);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let output = cmd.output()?;
        Ok(CliOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
            exit_code: output.status.code(),
        })
    }
}

pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl CliOutput {
    pub fn assert_success(&self) -> &Self {
        if !self.success {
            panic!(
                "Command failed with exit code {:?}\nSTDOUT:\n{}\nSTDERR:\n{}",
                self.exit_code, self.stdout, self.stderr
            );
        }
        self
    }

    pub fn assert_failure(&self) -> &Self {
        if self.success {
            panic!(
                "Command succeeded but was expected to fail\nSTDOUT:\n{}\nSTDERR:\n{}",
                self.stdout, self.stderr
            );
        }
        self
    }

    pub fn assert_contains(&self, text: &str) -> &Self {
        if !self.stdout.contains(text) && !self.stderr.contains(text) {
            panic!(
                "Output does not contain '{}'\nSTDOUT:\n{}\nSTDERR:\n{}",
                text, self.stdout, self.stderr
            );
        }
        self
    }

    pub fn assert_stdout_contains(&self, text: &str) -> &Self {
        if !self.stdout.contains(text) {
            panic!("STDOUT does not contain '{}'\nSTDOUT:\n{}", text, self.stdout);
        }
        self
    }
}
