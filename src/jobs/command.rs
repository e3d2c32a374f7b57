//! Shell command job.
//!
//! Runs `sh -c <command>` (`cmd /C` on Windows) with captured output. A
//! non-zero exit status is a failure carrying the tail of the output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::JobError;
use crate::scheduler::Job;

/// Maximum captured output kept in an error (4KB).
const MAX_OUTPUT_SIZE: usize = 4 * 1024;

#[derive(Debug)]
pub struct CommandJob {
    name: String,
    description: Option<String>,
    dependencies: Vec<String>,
    command: String,
    workdir: Option<PathBuf>,
    timeout: Option<Duration>,
}

impl CommandJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            dependencies: Vec::new(),
            command: command.into(),
            workdir: None,
            timeout: None,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn build(&self) -> Command {
        let mut command = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", self.command.as_str()]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", self.command.as_str()]);
            c
        };

        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl Job for CommandJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    async fn execute(&self) -> Result<(), JobError> {
        let child = self.build().spawn()?;

        let output = match self.timeout {
            // Dropping the timed-out future drops the child, which kills it.
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| JobError::Timeout(timeout))??,
            None => child.wait_with_output().await?,
        };

        if output.status.success() {
            tracing::debug!(job = %self.name, "Command succeeded");
            return Ok(());
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else if stdout.trim().is_empty() {
            stderr.trim().to_string()
        } else {
            format!("{}\n--- stderr ---\n{}", stdout.trim(), stderr.trim())
        };

        Err(JobError::Command {
            code: output.status.code().unwrap_or(-1),
            output: tail(&combined, MAX_OUTPUT_SIZE),
        })
    }
}

/// Keep the last `max` bytes; the end of the output is where errors are.
fn tail(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut start = s.len() - max;
    while start < s.len() && !s.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &s[start..])
}
