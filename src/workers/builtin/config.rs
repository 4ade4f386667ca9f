//! `config` worker: fetches newer configuration versions from a remote index.
//!
//! ```toml
//! [config]
//! interval = 3600
//! url = "https://configs.example.org/cam-07"   # required, HTML index of <prefix>_<N>.toml files
//! timeout = 10                                  # optional, seconds per request
//! ```
//!
//! Each tick lists the versioned files linked from `url`. When the best one is
//! newer than every local version it is downloaded from `<url>/<file>`, checked
//! the way it would be loaded and stored in the configuration directory. A
//! file that does not check out is reported and not kept. The next deployment
//! cycle activates and self-tests the stored version.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{optional_secs, required_str};
use crate::config::{ConfigStore, ConfigVersion, VersionedName};
use crate::error::WorkerError;
use crate::workers::worker::Worker;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

fn href() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*["']([^"'?#]+)"#).expect("href pattern is valid"))
}

/// Versioned file names linked from an index page, with their versions.
fn listed_versions(page: &str, scheme: &VersionedName) -> Vec<(ConfigVersion, String)> {
    let mut out: Vec<(ConfigVersion, String)> = href()
        .captures_iter(page)
        .filter_map(|c| c.get(1))
        .filter_map(|m| m.as_str().rsplit('/').next())
        .filter_map(|name| scheme.parse(name).map(|v| (v, name.to_string())))
        .collect();
    out.sort();
    out.dedup();
    out
}

/// The remote version worth fetching: `remote`, if newer than `local`.
fn newer(remote: ConfigVersion, local: Option<ConfigVersion>) -> Option<ConfigVersion> {
    match local {
        Some(local) if local >= remote => None,
        _ => Some(remote),
    }
}

/// Keeps the configuration directory up to date with a remote index.
pub struct ConfigWorker {
    store: ConfigStore,
}

impl ConfigWorker {
    pub fn new(store: ConfigStore) -> Self {
        Self { store }
    }

    pub fn arc(store: ConfigStore) -> Arc<Self> {
        Arc::new(Self::new(store))
    }

    fn client(section: &toml::Table) -> Result<reqwest::Client, WorkerError> {
        let timeout = optional_secs(section, "timeout")?.unwrap_or(DEFAULT_TIMEOUT);
        reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::fail(format!("http client: {e}")))
    }

    /// Best version listed at `url` and its file name.
    async fn best_remote(
        &self,
        client: &reqwest::Client,
        url: &str,
    ) -> Result<Option<(ConfigVersion, String)>, WorkerError> {
        let page = get_text(client, url).await?;
        Ok(listed_versions(&page, self.store.scheme()).pop())
    }

    /// Downloads the best remote version if it beats every local one.
    ///
    /// Returns the stored version, or `None` when the directory is current.
    pub async fn update(&self, section: &toml::Table) -> Result<Option<ConfigVersion>, WorkerError> {
        let url = required_str(section, "url")?;
        let client = Self::client(section)?;

        let Some((remote, name)) = self.best_remote(&client, url).await? else {
            debug!(url, "no configuration listed remotely");
            return Ok(None);
        };
        let local = self
            .store
            .resolve_active_version()
            .map_err(|e| WorkerError::fail(e.to_string()))?;
        let Some(version) = newer(remote, local) else {
            debug!(remote = %remote, "local configuration is current");
            return Ok(None);
        };

        info!(url, version = %version, "newer configuration found, downloading");
        let text = get_text(&client, &file_url(url, &name)).await?;
        self.store
            .install_version(version, &text)
            .map_err(|e| WorkerError::fail(format!("downloaded {name} will not be used: {e}")))?;
        Ok(Some(version))
    }
}

fn file_url(base: &str, name: &str) -> String {
    format!("{}/{name}", base.trim_end_matches('/'))
}

async fn get_text(client: &reqwest::Client, url: &str) -> Result<String, WorkerError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| WorkerError::fail(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(WorkerError::fail(format!("GET {url}: {}", response.status())));
    }
    response
        .text()
        .await
        .map_err(|e| WorkerError::fail(format!("GET {url}: {e}")))
}

#[async_trait]
impl Worker for ConfigWorker {
    fn kind(&self) -> &str {
        "config"
    }

    fn check_config(&self, section: &toml::Table) -> Result<(), WorkerError> {
        required_str(section, "url")?;
        optional_secs(section, "timeout").map(|_| ())
    }

    /// The index must list at least one version and the best one must load.
    async fn deploy_test(&self, section: &toml::Table) -> Result<(), WorkerError> {
        let url = required_str(section, "url")?;
        let client = Self::client(section)?;
        let Some((_, name)) = self.best_remote(&client, url).await? else {
            return Err(WorkerError::fail(format!("no configuration file listed at {url}")));
        };
        let text = get_text(&client, &file_url(url, &name)).await?;
        self.store
            .check(Path::new(&name), &text)
            .map(|_| ())
            .map_err(|e| WorkerError::fail(format!("remote {name}: {e}")))
    }

    async fn tick(&self, ctx: CancellationToken, section: &toml::Table) -> Result<(), WorkerError> {
        select! {
            _ = ctx.cancelled() => Err(WorkerError::Canceled),
            res = self.update(section) => res.map(|_| ()),
        }
    }
}
