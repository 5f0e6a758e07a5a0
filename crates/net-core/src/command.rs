//! External command execution with timeout and logging

use std::process::Stdio;
use std::time::{Duration, Instant};

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::BackendError;
use crate::Result;

/// Result of an external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Whether the command exited successfully
    pub success: bool,
    /// Exit code of the command
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// Runs backend tools (`ip`, `iptables`, `netplan`)
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    /// Runner without a timeout
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Runner that gives up (and kills the child) after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run `program` with `args`. A non-zero exit is reported in the output,
    /// not as an error.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let command_line = render(program, args);
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Executing {}", command_line);
        let start_time = Instant::now();

        let output = match self.timeout {
            Some(limit) => match timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    error!("{} timed out after {:?}", command_line, limit);
                    return Err(BackendError::Timeout {
                        command: command_line,
                        timeout: limit,
                    }
                    .into());
                }
            },
            None => cmd.output().await,
        };

        let duration_ms = start_time.elapsed().as_millis() as u64;

        match output {
            Ok(output) => {
                let result = CommandOutput {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    duration_ms,
                };

                if result.success {
                    debug!("{} completed in {}ms", command_line, duration_ms);
                } else {
                    warn!(
                        "{} failed with exit code {:?}: {}",
                        command_line,
                        result.exit_code,
                        result.stderr.trim()
                    );
                }
                Ok(result)
            }
            Err(e) => {
                error!("{} failed to execute: {}", command_line, e);
                Err(BackendError::Unavailable {
                    backend: program.to_string(),
                    reason: e.to_string(),
                }
                .into())
            }
        }
    }

    /// Like [`CommandRunner::run`], but a non-zero exit becomes
    /// [`BackendError::CommandFailed`].
    pub async fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.run(program, args).await?;
        if output.success {
            Ok(output)
        } else {
            Err(BackendError::CommandFailed {
                command: render(program, args),
                stderr: output.stderr.trim().to_string(),
            }
            .into())
        }
    }
}

fn render(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
