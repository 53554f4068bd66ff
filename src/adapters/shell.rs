//! Shell command runner.
//!
//! Spawns `<program> -c <command>` for every command of a group, in order,
//! with a per-command timeout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ShellSettings;
use crate::core::error::CommandFailure;

use super::{CommandGroup, CommandRunner};

/// Lines of stderr kept on failure
const STDERR_TAIL_LINES: usize = 20;

/// Command runner backed by a local shell
pub struct ShellRunner {
    /// Shell binary (default: "sh")
    program: String,

    /// Working directory for every command
    working_dir: Option<PathBuf>,

    /// Per-command timeout
    command_timeout: Duration,
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::from_settings(&ShellSettings::default())
    }

    pub fn from_settings(settings: &ShellSettings) -> Self {
        Self {
            program: settings.program.clone(),
            working_dir: settings.working_dir.clone(),
            command_timeout: Duration::from_secs(settings.timeout_seconds),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    async fn run_one(&self, group: &CommandGroup, command: &str) -> Result<(), CommandFailure> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-c")
            .arg(command)
            .envs(&group.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            CommandFailure::new(command, -1).with_stderr(format!("failed to spawn {}: {}", self.program, e))
        })?;

        let output = match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandFailure::new(command, -1).with_stderr(e.to_string()));
            }
            Err(_) => {
                return Err(CommandFailure::new(command, -1)
                    .with_stderr(format!("timed out after {:?}", self.command_timeout)));
            }
        };

        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            let stderr = tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES);
            warn!(group = %group.name, %command, exit_code, "Command failed");
            return Err(CommandFailure::new(command, exit_code).with_stderr(stderr));
        }

        debug!(
            group = %group.name,
            %command,
            stdout_bytes = output.stdout.len(),
            "Command completed"
        );
        Ok(())
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, group: &CommandGroup) -> Result<(), CommandFailure> {
        for command in group.commands.iter().filter(|c| !c.trim().is_empty()) {
            self.run_one(group, command).await?;
        }
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
