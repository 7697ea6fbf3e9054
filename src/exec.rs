//! Command execution collaborator.
//!
//! The workflow runs approved commands through a `CommandExecutor`, which
//! keeps execution substitutable in tests and in dry-run mode.

use std::process::Command;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Placeholder stdout produced when dry-run mode skips execution.
pub const DRY_RUN_STDOUT: &str = "(dry-run) not executed";

/// Captured outcome of one command. A non-zero exit code is data, not an
/// error; it drives the repair path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Synthetic result for a dry-run dispatch; nothing was spawned.
    pub fn dry_run() -> Self {
        Self {
            exit_code: 0,
            stdout: DRY_RUN_STDOUT.to_string(),
            stderr: String::new(),
        }
    }
}

/// Synchronous "run a shell command, capture everything" primitive.
pub trait CommandExecutor: Send + Sync {
    fn run(&self, command: &str) -> Result<ExecutionResult>;
}

/// Executes through `sh -c`, capturing stdout and stderr.
pub struct ShellExecutor;

impl CommandExecutor for ShellExecutor {
    fn run(&self, command: &str) -> Result<ExecutionResult> {
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .with_context(|| format!("Failed to spawn shell for: {}", command))?;

        Ok(ExecutionResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
