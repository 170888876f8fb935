//! The configured shell command, as a scheduler [`Task`].

use std::time::Duration;

use async_trait::async_trait;
use cadence_core::config::TaskConfig;
use cadence_scheduler::Task;
use tracing::debug;

use crate::error::{DaemonError, Result};

/// Lines of stderr kept in the error of a failed attempt.
const STDERR_TAIL_LINES: usize = 5;

/// Runs `command args...` once per attempt. A non-zero exit is an error.
#[derive(Debug, Clone)]
pub struct ShellTask {
    name: String,
    command: String,
    args: Vec<String>,
    working_dir: Option<String>,
    timeout: Option<Duration>,
}

impl ShellTask {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        let command = command.into();
        Self {
            name: command.clone(),
            command,
            args,
            working_dir: None,
            timeout: None,
        }
    }

    pub fn from_config(cfg: &TaskConfig) -> Result<Self> {
        if cfg.command.trim().is_empty() {
            return Err(DaemonError::TaskConfig(
                "task.command is empty; nothing to run".into(),
            ));
        }
        let mut task = Self::new(cfg.command.clone(), cfg.args.clone());
        task.working_dir = cfg.working_dir.clone();
        if let Some(secs) = cfg.timeout_secs {
            task = task.with_timeout(Duration::from_secs(secs));
        }
        Ok(task)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Task for ShellTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> anyhow::Result<()> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(result) => result,
                Err(_) => anyhow::bail!("timed out after {limit:?}"),
            },
            None => cmd.output().await,
        }
        .map_err(|e| anyhow::anyhow!("failed to launch '{}': {e}", self.command))?;

        debug!(
            task = %self.name,
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            "command finished"
        );

        if output.status.success() {
            return Ok(());
        }

        let code = output
            .status
            .code()
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail = stderr_tail(&stderr);
        if tail.is_empty() {
            anyhow::bail!("exit {code}")
        }
        anyhow::bail!("exit {code}: {tail}")
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> ShellTask {
        ShellTask::new("sh", vec!["-c".into(), script.into()])
    }

    #[tokio::test]
    async fn zero_exit_succeeds() {
        assert!(sh("exit 0").run().await.is_ok());
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let err = sh("echo 'disk full' >&2; exit 3").run().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("exit 3"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }

    #[tokio::test]
    async fn missing_binary_is_a_launch_error() {
        let err = ShellTask::new("/definitely/not/here", vec![])
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to launch"));
    }

    #[tokio::test]
    async fn timeout_fails_the_attempt() {
        let err = sh("sleep 5")
            .with_timeout(Duration::from_millis(100))
            .run()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(ShellTask::from_config(&TaskConfig::default()).is_err());
    }

    #[test]
    fn stderr_tail_keeps_last_lines() {
        let text = (1..=8).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        assert_eq!(stderr_tail(&text), "line 4\nline 5\nline 6\nline 7\nline 8");
    }
}
