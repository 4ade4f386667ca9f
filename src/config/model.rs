//! # Parsed configuration document.
//!
//! ```toml
//! [main]
//! period = 5            # health-check period, seconds (required)
//! grace = 20            # shutdown grace, seconds
//! local_log_file = "/var/log/camvisor/camvisor.log"
//! ntfy = { url = "https://ntfy.sh", topic = "{{ device_id }}" }
//!
//! [capture]             # one table per worker
//! kind = "process"
//! interval = 60
//! command = ["/usr/local/bin/capture", "--out", "/data/images"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::version::ConfigVersion;
use crate::error::ConfigError;

/// Notification settings of the `main` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NtfySettings {
    /// Server base URL.
    pub url: String,
    /// Topic; defaults to the device identity when absent.
    #[serde(default)]
    pub topic: Option<String>,
}

/// The `main` section: settings of the supervisor itself.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MainSection {
    /// Health-check period in seconds.
    pub period: f64,
    /// Shutdown grace in seconds.
    #[serde(default)]
    pub grace: Option<f64>,
    /// Optional local log file.
    #[serde(default)]
    pub local_log_file: Option<PathBuf>,
    /// Optional notification settings.
    #[serde(default)]
    pub ntfy: Option<NtfySettings>,
}

impl MainSection {
    /// Health-check period; zero when the value is not a valid duration.
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.period).unwrap_or(Duration::ZERO)
    }

    /// Shutdown grace, if configured and a valid duration.
    pub fn grace(&self) -> Option<Duration> {
        self.grace.and_then(|g| Duration::try_from_secs_f64(g).ok())
    }
}

/// A loaded configuration: the `main` section plus one table per worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    /// File the configuration was read from.
    pub path: PathBuf,
    /// Version of the file, when read through the versioned indirection.
    pub version: Option<ConfigVersion>,
    /// Supervisor settings.
    pub main: MainSection,
    /// Worker sections keyed by worker name (every top-level table except `main`).
    pub workers: BTreeMap<String, toml::Table>,
}

impl Configuration {
    /// Parses an already rendered document.
    pub fn parse(path: &Path, text: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = text.parse().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let main = table
            .remove("main")
            .ok_or_else(|| ConfigError::invalid(path, "missing required section [main]"))?;
        let main: MainSection = main.try_into().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        check_seconds(path, "main.period", main.period)?;
        if let Some(grace) = main.grace {
            check_seconds(path, "main.grace", grace)?;
        }

        let mut workers = BTreeMap::new();
        for (name, value) in table {
            match value {
                toml::Value::Table(section) => {
                    workers.insert(name, section);
                }
                other => {
                    return Err(ConfigError::invalid(
                        path,
                        format!("top-level key '{name}' must be a table, got {}", other.type_str()),
                    ));
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            version: None,
            main,
            workers,
        })
    }

    /// Returns the section of worker `name`.
    pub fn section(&self, name: &str) -> Option<&toml::Table> {
        self.workers.get(name)
    }
}

/// Rejects negative, non-finite and out-of-range second counts.
fn check_seconds(path: &Path, key: &str, secs: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(_) => Ok(()),
        Err(e) => Err(ConfigError::invalid(
            path,
            format!("{key} must be a non-negative number of seconds, got {secs} ({e})"),
        )),
    }
}
