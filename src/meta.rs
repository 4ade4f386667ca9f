//! # Device meta file.
//!
//! Externally supplied, per-device values consumed by the deployment cycle and
//! injected into configuration templates. The file is TOML:
//!
//! ```toml
//! device_id = "cam-07"
//! reboot_time = "07:00"                      # required
//! bundle_url = "https://bundles.example.org"
//! archive_password = "..."
//! source_ref = "https://git.example.org/camvisor.git"
//! source_branch = "stable"
//! ntfy_url = "https://ntfy.sh"
//! self_test_timeout = 120
//!
//! [vars]                                     # extra template variables
//! ftp_password = "..."
//! ```
//!
//! Everything except `device_id` and `reboot_time` has a default or disables
//! the stage that needs it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::NaiveTime;
use serde::Deserialize;

use crate::error::MetaError;

/// On-disk shape, before validation.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMeta {
    device_id: Option<String>,
    reboot_time: Option<String>,
    bundle_url: Option<String>,
    archive_password: Option<String>,
    source_ref: Option<String>,
    source_branch: Option<String>,
    ntfy_url: Option<String>,
    ntfy_topic: Option<String>,
    self_test_timeout: Option<u64>,
    connectivity_probe: Option<String>,
    connectivity_attempts: Option<u32>,
    workdir: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    config_prefix: Option<String>,
    command_file: Option<PathBuf>,
    network_candidate: Option<PathBuf>,
    network_installed: Option<PathBuf>,
    network_restart: Option<Vec<String>>,
    install_command: Option<Vec<String>>,
    reboot_command: Option<Vec<String>>,
    boot_marker: Option<PathBuf>,
    #[serde(default)]
    vars: BTreeMap<String, String>,
}

/// Validated device meta values.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMeta {
    /// Device identity; names the remote bundle and the default notification topic.
    pub device_id: String,
    /// Local time of the daily reboot.
    pub reboot_time: NaiveTime,
    /// Base URL of the remote bundles; no bundle sync when absent.
    pub bundle_url: Option<String>,
    /// Password of the bundle archive.
    pub archive_password: Option<String>,
    /// Git URL of the software; no upgrade when absent.
    pub source_ref: Option<String>,
    /// Branch or tag to check out.
    pub source_branch: Option<String>,
    /// Notification server; notifications are disabled when absent.
    pub ntfy_url: Option<String>,
    /// Notification topic (defaults to `device_id`).
    pub ntfy_topic: Option<String>,
    /// Bound of each self-test run.
    pub self_test_timeout: Duration,
    /// `host:port` dialled to decide whether the network is up.
    pub connectivity_probe: String,
    /// Probe attempts, one second apart.
    pub connectivity_attempts: u32,
    /// Working directory replaced by the bundle content.
    pub workdir: PathBuf,
    /// Directory of the versioned configuration files.
    pub config_dir: PathBuf,
    /// File name prefix of the versioned configuration files.
    pub config_prefix: String,
    /// Operator script, run once then emptied.
    pub command_file: PathBuf,
    /// Network config shipped by the bundle.
    pub network_candidate: Option<PathBuf>,
    /// Network config currently installed on the system.
    pub network_installed: Option<PathBuf>,
    /// Command restarting the network interface.
    pub network_restart: Vec<String>,
    /// Command installing a freshly cloned source tree (run inside it).
    pub install_command: Vec<String>,
    /// Command rebooting the device.
    pub reboot_command: Vec<String>,
    /// File claimed once per boot by the deployment cycle.
    pub boot_marker: PathBuf,
    /// Extra template variables.
    pub vars: BTreeMap<String, String>,
}

impl DeviceMeta {
    pub const DEFAULT_SELF_TEST_TIMEOUT: Duration = Duration::from_secs(120);
    pub const DEFAULT_CONNECTIVITY_ATTEMPTS: u32 = 30;
    pub const DEFAULT_CONNECTIVITY_PROBE: &'static str = "1.1.1.1:53";
    pub const DEFAULT_CONFIG_PREFIX: &'static str = "camvisor_config";

    /// Reads and validates the meta file at `path`.
    pub fn load(path: &Path) -> Result<Self, MetaError> {
        let text = std::fs::read_to_string(path).map_err(|source| MetaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }

    /// Validates an already read meta document.
    pub fn parse(path: &Path, text: &str) -> Result<Self, MetaError> {
        let raw: RawMeta = toml::from_str(text).map_err(|source| MetaError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let device_id = non_empty(raw.device_id).ok_or(MetaError::MissingField { field: "device_id" })?;
        let reboot_time = non_empty(raw.reboot_time)
            .ok_or(MetaError::MissingField { field: "reboot_time" })?;
        let reboot_time = NaiveTime::parse_from_str(&reboot_time, "%H:%M").map_err(|e| {
            MetaError::InvalidField {
                field: "reboot_time",
                reason: format!("'{reboot_time}' is not HH:MM ({e})"),
            }
        })?;

        let self_test_timeout = match raw.self_test_timeout {
            Some(0) => {
                return Err(MetaError::InvalidField {
                    field: "self_test_timeout",
                    reason: "must be > 0".into(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => Self::DEFAULT_SELF_TEST_TIMEOUT,
        };

        Ok(Self {
            device_id,
            reboot_time,
            bundle_url: non_empty(raw.bundle_url),
            archive_password: raw.archive_password,
            source_ref: non_empty(raw.source_ref),
            source_branch: non_empty(raw.source_branch),
            ntfy_url: non_empty(raw.ntfy_url),
            ntfy_topic: non_empty(raw.ntfy_topic),
            self_test_timeout,
            connectivity_probe: raw
                .connectivity_probe
                .unwrap_or_else(|| Self::DEFAULT_CONNECTIVITY_PROBE.to_string()),
            connectivity_attempts: raw
                .connectivity_attempts
                .unwrap_or(Self::DEFAULT_CONNECTIVITY_ATTEMPTS)
                .max(1),
            workdir: raw.workdir.unwrap_or_else(|| PathBuf::from("/var/lib/camvisor/data")),
            config_dir: raw.config_dir.unwrap_or_else(|| PathBuf::from("/etc/camvisor")),
            config_prefix: raw
                .config_prefix
                .unwrap_or_else(|| Self::DEFAULT_CONFIG_PREFIX.to_string()),
            command_file: raw
                .command_file
                .unwrap_or_else(|| PathBuf::from("/var/lib/camvisor/command.sh")),
            network_candidate: raw.network_candidate,
            network_installed: raw.network_installed,
            network_restart: raw.network_restart.unwrap_or_default(),
            install_command: raw.install_command.unwrap_or_default(),
            reboot_command: raw
                .reboot_command
                .unwrap_or_else(|| vec!["systemctl".into(), "reboot".into()]),
            boot_marker: raw
                .boot_marker
                .unwrap_or_else(|| PathBuf::from("/run/camvisor/deploy.lock")),
            vars: raw.vars,
        })
    }

    /// Variables available to configuration templates.
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        let mut vars = self.vars.clone();
        vars.insert("device_id".into(), self.device_id.clone());
        vars
    }

    /// Notification topic: `ntfy_topic`, or the device identity.
    pub fn topic(&self) -> &str {
        self.ntfy_topic.as_deref().unwrap_or(&self.device_id)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<DeviceMeta, MetaError> {
        DeviceMeta::parse(Path::new("meta.toml"), text)
    }

    #[test]
    fn test_minimal_meta_gets_defaults() {
        let meta = parse("device_id = \"cam-07\"\nreboot_time = \"07:00\"\n").unwrap();
        assert_eq!(meta.reboot_time, NaiveTime::from_hms_opt(7, 0, 0).unwrap());
        assert_eq!(meta.self_test_timeout, Duration::from_secs(120));
        assert_eq!(meta.connectivity_attempts, 30);
        assert_eq!(meta.config_prefix, "camvisor_config");
        assert_eq!(meta.topic(), "cam-07");
        assert!(meta.bundle_url.is_none());
    }

    #[test]
    fn test_missing_reboot_time_is_fatal() {
        let err = parse("device_id = \"cam-07\"\n").unwrap_err();
        assert!(matches!(err, MetaError::MissingField { field: "reboot_time" }));

        let err = parse("device_id = \"cam-07\"\nreboot_time = \"  \"\n").unwrap_err();
        assert!(matches!(err, MetaError::MissingField { field: "reboot_time" }));
    }

    #[test]
    fn test_malformed_reboot_time_is_invalid() {
        let err = parse("device_id = \"cam-07\"\nreboot_time = \"7 o'clock\"\n").unwrap_err();
        assert_eq!(err.as_label(), "meta_invalid_field");
    }

    #[test]
    fn test_template_vars_include_device_id() {
        let meta = parse(
            "device_id = \"cam-07\"\nreboot_time = \"23:30\"\n[vars]\nftp_password = \"s3cret\"\n",
        )
        .unwrap();
        let vars = meta.template_vars();
        assert_eq!(vars["device_id"], "cam-07");
        assert_eq!(vars["ftp_password"], "s3cret");
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let err = parse("device_id = \"a\"\nreboot_time = \"07:00\"\nreboot = 1\n").unwrap_err();
        assert_eq!(err.as_label(), "meta_parse");
    }
}
