//! `heartbeat` worker: stamps a file with the current local time.
//!
//! ```toml
//! [heartbeat]
//! interval = 30
//! path = "/run/camvisor/heartbeat"
//! ```

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::required_str;
use crate::error::WorkerError;
use crate::workers::worker::Worker;

#[derive(Debug, Default)]
pub struct HeartbeatWorker;

impl HeartbeatWorker {
    pub fn arc() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Worker for HeartbeatWorker {
    fn kind(&self) -> &str {
        "heartbeat"
    }

    fn check_config(&self, section: &toml::Table) -> Result<(), WorkerError> {
        required_str(section, "path").map(|_| ())
    }

    async fn deploy_test(&self, section: &toml::Table) -> Result<(), WorkerError> {
        self.tick(CancellationToken::new(), section).await
    }

    async fn tick(&self, _ctx: CancellationToken, section: &toml::Table) -> Result<(), WorkerError> {
        let path = Path::new(required_str(section, "path")?);
        let stamp = chrono::Local::now().to_rfc3339();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| WorkerError::fail(format!("{}: {e}", parent.display())))?;
        }
        tokio::fs::write(path, stamp)
            .await
            .map_err(|e| WorkerError::fail(format!("{}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tick_stamps_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("hb/beat");
        let mut section = toml::Table::new();
        section.insert("path".into(), path.display().to_string().into());

        HeartbeatWorker.tick(CancellationToken::new(), &section).await.unwrap();

        let stamp = std::fs::read_to_string(&path).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&stamp).is_ok());
    }

    #[test]
    fn test_path_is_required() {
        assert!(HeartbeatWorker.check_config(&toml::Table::new()).is_err());
    }
}
