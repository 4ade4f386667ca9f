//! `status` worker: periodic device status report.
//!
//! ```toml
//! [status]
//! interval = 600
//! report = "/var/lib/camvisor/status.txt"    # required
//! watch = ["/data/images", "/data/upload"]   # optional, folders to summarise
//! notify = true                              # optional, also send it as a notice
//! ```
//!
//! The report is written to a sibling temporary file and renamed over
//! `report`, so readers never see a half-written file.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{required_str, string_list};
use crate::error::WorkerError;
use crate::notify::Notifier;
use crate::workers::worker::Worker;

/// Writes (and optionally sends) a status report each tick.
pub struct StatusWorker {
    notifier: Notifier,
    started_at: Instant,
}

impl StatusWorker {
    pub fn new(notifier: Notifier) -> Self {
        Self {
            notifier,
            started_at: Instant::now(),
        }
    }

    pub fn arc(notifier: Notifier) -> Arc<Self> {
        Arc::new(Self::new(notifier))
    }

    async fn report(&self, section: &toml::Table) -> Result<String, WorkerError> {
        let mut out = String::new();
        let _ = writeln!(out, "time: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
        let _ = writeln!(out, "uptime: {}s", self.started_at.elapsed().as_secs());
        for dir in string_list(section, "watch")? {
            match folder_stats(Path::new(&dir)).await {
                Ok((files, bytes)) => {
                    let _ = writeln!(out, "{dir}: {files} files, {bytes} bytes");
                }
                Err(e) => {
                    let _ = writeln!(out, "{dir}: unreadable ({e})");
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Worker for StatusWorker {
    fn kind(&self) -> &str {
        "status"
    }

    fn check_config(&self, section: &toml::Table) -> Result<(), WorkerError> {
        required_str(section, "report")?;
        string_list(section, "watch")?;
        match section.get("notify") {
            None | Some(toml::Value::Boolean(_)) => Ok(()),
            Some(other) => Err(WorkerError::Fatal {
                error: format!("'notify' must be a boolean, got {}", other.type_str()),
            }),
        }
    }

    async fn deploy_test(&self, section: &toml::Table) -> Result<(), WorkerError> {
        self.tick(CancellationToken::new(), section).await
    }

    async fn tick(&self, ctx: CancellationToken, section: &toml::Table) -> Result<(), WorkerError> {
        if ctx.is_cancelled() {
            return Err(WorkerError::Canceled);
        }
        let target = PathBuf::from(required_str(section, "report")?);
        let report = self.report(section).await?;

        write_atomic(&target, report.as_bytes())
            .await
            .map_err(|e| WorkerError::fail(format!("failed to write {}: {e}", target.display())))?;

        if matches!(section.get("notify"), Some(toml::Value::Boolean(true))) {
            self.notifier.info("status", &report).await;
        }
        Ok(())
    }
}

async fn write_atomic(target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = target.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, target).await
}

async fn folder_stats(dir: &Path) -> std::io::Result<(u64, u64)> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let (mut files, mut bytes) = (0u64, 0u64);
    while let Some(entry) = entries.next_entry().await? {
        let meta = entry.metadata().await?;
        if meta.is_file() {
            files += 1;
            bytes += meta.len();
        }
    }
    Ok((files, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::notifier::tests::RecordingSink;

    #[tokio::test]
    async fn test_writes_report_with_folder_stats() {
        let tmp = tempfile::tempdir().unwrap();
        let images = tmp.path().join("images");
        std::fs::create_dir(&images).unwrap();
        std::fs::write(images.join("a.jpg"), b"12345").unwrap();
        std::fs::write(images.join("b.jpg"), b"123").unwrap();
        let report = tmp.path().join("out/status.txt");

        let mut section = toml::Table::new();
        section.insert("report".into(), report.display().to_string().into());
        section.insert(
            "watch".into(),
            toml::Value::Array(vec![images.display().to_string().into()]),
        );

        let w = StatusWorker::new(Notifier::disabled());
        w.check_config(&section).unwrap();
        w.tick(CancellationToken::new(), &section).await.unwrap();

        let text = std::fs::read_to_string(&report).unwrap();
        assert!(text.contains("2 files, 8 bytes"), "{text}");
    }

    #[tokio::test]
    async fn test_notify_sends_report() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let w = StatusWorker::new(Notifier::new(sink.clone(), "cam-07"));

        let mut section = toml::Table::new();
        section.insert("report".into(), tmp.path().join("s.txt").display().to_string().into());
        section.insert("notify".into(), true.into());

        w.tick(CancellationToken::new(), &section).await.unwrap();
        assert_eq!(sink.titles(), vec!["status".to_string()]);
    }

    #[test]
    fn test_check_config_requires_report() {
        let w = StatusWorker::new(Notifier::disabled());
        assert!(w.check_config(&toml::Table::new()).is_err());
    }
}
