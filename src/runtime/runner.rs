//! Subprocess execution for container runtime commands
//!
//! Thin wrapper around `tokio::process` used by the Docker runtime. Long
//! operations (builds, pulls) stream their output line by line into tracing;
//! short queries capture output instead. Every call carries a display label so
//! logging never has to echo full argument lists, which may contain
//! environment values.

use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use super::RuntimeError;

/// Runs external commands with a hard timeout.
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Runs a command and captures its output. The label, not the argv, is
    /// what appears in errors and logs.
    pub async fn run_captured(
        &self,
        program: &str,
        args: &[String],
        label: &str,
    ) -> Result<Output, RuntimeError> {
        // The returned future owns the child; kill_on_drop reaps it when the
        // timeout arm below wins the select.
        let future = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            result = future => result.map_err(|source| RuntimeError::Spawn {
                command: label.to_string(),
                source,
            })?,
            _ = tokio::time::sleep(self.timeout) => {
                return Err(RuntimeError::Timeout {
                    command: label.to_string(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        Ok(output)
    }

    /// Runs a command, forwarding each stdout/stderr line to the log stream.
    ///
    /// Used for builds and pulls, where the operator wants to watch progress.
    /// On timeout the child is killed and an error returned.
    pub async fn run_streamed(
        &self,
        program: &str,
        args: &[String],
        label: &str,
    ) -> Result<ExitStatus, RuntimeError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: label.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_label = label.to_string();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(command = %stdout_label, "{}", line);
                }
            }
        });

        let stderr_label = label.to_string();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    // Build tools routinely write progress to stderr, so this
                    // stays at info rather than warn.
                    info!(command = %stderr_label, "{}", line);
                }
            }
        });

        let result = tokio::select! {
            status = child.wait() => status.map_err(|source| RuntimeError::Spawn {
                command: label.to_string(),
                source,
            }),
            _ = tokio::time::sleep(self.timeout) => {
                warn!(command = %label, "timed out, killing process");
                let _ = child.kill().await;
                Err(RuntimeError::Timeout {
                    command: label.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }

    /// Runs a command with inherited stdio and no timeout.
    ///
    /// Used for following log output; the child runs until it exits or the
    /// operator interrupts the whole invocation.
    pub async fn run_inherited(
        &self,
        program: &str,
        args: &[String],
        label: &str,
    ) -> Result<ExitStatus, RuntimeError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: label.to_string(),
                source,
            })?;

        child.wait().await.map_err(|source| RuntimeError::Spawn {
            command: label.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captured_success() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let output = runner
            .run_captured("echo", &["hello".to_string()], "echo hello")
            .await
            .unwrap();

        assert!(output.status.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("hello"));
    }

    #[tokio::test]
    async fn test_run_captured_missing_program() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let result = runner
            .run_captured("dockhand-no-such-program", &[], "missing program")
            .await;

        assert!(matches!(result, Err(RuntimeError::Spawn { .. })));
    }

    #[tokio::test]
    async fn test_run_captured_timeout() {
        let runner = CommandRunner::new(Duration::from_millis(50));
        let result = runner
            .run_captured("sleep", &["5".to_string()], "sleep 5")
            .await;

        assert!(matches!(result, Err(RuntimeError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_run_captured_timeout_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("survived");
        let script = format!("sleep 1 && touch {}", marker.display());

        let runner = CommandRunner::new(Duration::from_millis(50));
        let result = runner
            .run_captured("sh", &["-c".to_string(), script], "sh marker")
            .await;
        assert!(matches!(result, Err(RuntimeError::Timeout { .. })));

        // A killed child never reaches the touch; give it time to prove it.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "timed-out child kept running");
    }

    #[tokio::test]
    async fn test_run_streamed_reports_exit_status() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let status = runner
            .run_streamed(
                "sh",
                &["-c".to_string(), "exit 3".to_string()],
                "sh exit 3",
            )
            .await
            .unwrap();

        assert_eq!(status.code(), Some(3));
    }
}
