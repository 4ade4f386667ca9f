//! `process` worker: runs an external program once per tick.
//!
//! ```toml
//! [capture]
//! kind = "process"
//! interval = 60
//! command = ["/usr/local/bin/capture", "--out", "/data/images"]
//! timeout = 30                       # optional, seconds
//! workdir = "/data"                  # optional
//! test_command = ["/usr/local/bin/capture", "--probe"]   # optional, used by deploy-test
//! ```
//!
//! A non-zero exit fails the tick (and therefore ends the worker until the
//! supervisor restarts it). The child is killed when the tick is cancelled.

use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{optional_secs, string_list};
use crate::error::WorkerError;
use crate::workers::worker::Worker;

/// Runs the section's `command` each tick.
#[derive(Debug, Default)]
pub struct ProcessWorker;

impl ProcessWorker {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    fn kind(&self) -> &str {
        "process"
    }

    fn check_config(&self, section: &toml::Table) -> Result<(), WorkerError> {
        if string_list(section, "command")?.is_empty() {
            return Err(WorkerError::Fatal {
                error: "missing required key 'command'".into(),
            });
        }
        optional_secs(section, "timeout")?;
        string_list(section, "test_command")?;
        Ok(())
    }

    async fn deploy_test(&self, section: &toml::Table) -> Result<(), WorkerError> {
        let timeout = optional_secs(section, "timeout")?;
        let test = string_list(section, "test_command")?;
        if !test.is_empty() {
            return run(&test, section, timeout, &CancellationToken::new()).await;
        }

        let command = string_list(section, "command")?;
        let program = command.first().map(String::as_str).unwrap_or_default();
        if program.contains('/') && !Path::new(program).exists() {
            return Err(WorkerError::fail(format!("program not found: {program}")));
        }
        Ok(())
    }

    async fn tick(&self, ctx: CancellationToken, section: &toml::Table) -> Result<(), WorkerError> {
        let command = string_list(section, "command")?;
        let timeout = optional_secs(section, "timeout")?;
        run(&command, section, timeout, &ctx).await
    }
}

async fn run(
    argv: &[String],
    section: &toml::Table,
    timeout: Option<Duration>,
    ctx: &CancellationToken,
) -> Result<(), WorkerError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(WorkerError::Fatal {
            error: "empty command".into(),
        });
    };

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(toml::Value::String(dir)) = section.get("workdir") {
        cmd.current_dir(dir);
    }

    debug!(program = %program, "spawning");
    let child = cmd
        .spawn()
        .map_err(|e| WorkerError::fail(format!("failed to spawn {program}: {e}")))?;

    // Dropping the wait future drops the child, which kills it.
    let output = select! {
        _ = ctx.cancelled() => return Err(WorkerError::Canceled),
        out = bounded(timeout, child.wait_with_output()) => out?,
    };

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(WorkerError::fail(format!(
        "{program} exited with {}: {}",
        output.status,
        stderr.trim()
    )))
}

async fn bounded(
    timeout: Option<Duration>,
    wait: impl std::future::Future<Output = std::io::Result<Output>>,
) -> Result<Output, WorkerError> {
    let res = match timeout {
        Some(t) => time::timeout(t, wait)
            .await
            .map_err(|_| WorkerError::Timeout { timeout: t })?,
        None => wait.await,
    };
    res.map_err(|e| WorkerError::fail(format!("failed to wait for child: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(text: &str) -> toml::Table {
        text.parse().unwrap()
    }

    #[test]
    fn test_check_config_requires_command() {
        let w = ProcessWorker;
        assert!(w.check_config(&toml::Table::new()).is_err());
        assert!(w.check_config(&section("command = [\"true\"]\ntimeout = 0")).is_err());
        assert!(w.check_config(&section("command = [\"true\"]\ntimeout = 3")).is_ok());
    }

    #[tokio::test]
    async fn test_successful_and_failing_commands() {
        let w = ProcessWorker;
        let ctx = CancellationToken::new();

        w.tick(ctx.clone(), &section("command = [\"true\"]")).await.unwrap();

        let err = w
            .tick(ctx, &section("command = [\"/bin/sh\", \"-c\", \"echo broken >&2; exit 3\"]"))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "worker_failed");
        assert!(err.to_string().contains("broken"));
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let err = ProcessWorker
            .tick(
                CancellationToken::new(),
                &section("command = [\"sleep\", \"5\"]\ntimeout = 0.2"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "worker_timeout");
    }

    #[tokio::test]
    async fn test_cancel_interrupts_running_child() {
        let ctx = CancellationToken::new();
        let stopper = ctx.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            stopper.cancel();
        });

        let err = ProcessWorker
            .tick(ctx, &section("command = [\"sleep\", \"5\"]"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Canceled));
    }

    #[tokio::test]
    async fn test_deploy_test_checks_program_path() {
        let err = ProcessWorker
            .deploy_test(&section("command = [\"/nonexistent/capture\"]"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("program not found"));

        ProcessWorker
            .deploy_test(&section("command = [\"/nonexistent/capture\"]\ntest_command = [\"true\"]"))
            .await
            .unwrap();
    }
}
