//! # Capabilities the deployment cycle drives.
//!
//! Each external effect of the cycle sits behind a narrow async trait so the
//! state machine can be exercised with in-memory fakes. The implementations
//! used on a device live in [`system`](super::system).

use async_trait::async_trait;
use chrono::{DateTime, Local};

use crate::error::StageError;

/// Network reachability probe.
#[async_trait]
pub trait Connectivity: Send + Sync {
    /// One bounded attempt; true when the network is usable.
    async fn probe(&self) -> bool;
}

/// Outcome of a bundle synchronisation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleOutcome {
    /// No bundle is published for this device.
    Absent,
    /// A bundle was downloaded and replaced the working directory.
    Installed,
}

/// Remote bundle download and extraction.
#[async_trait]
pub trait BundleSync: Send + Sync {
    async fn sync(&self, device_id: &str) -> Result<BundleOutcome, StageError>;
}

/// Captured result of the operator command file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandReport {
    /// Exit code; `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandReport {
    /// A run counts as failed on a non-zero exit or any stderr output.
    pub fn failed(&self) -> bool {
        self.status != Some(0) || !self.stderr.trim().is_empty()
    }
}

/// Optional operator script.
#[async_trait]
pub trait CommandFile: Send + Sync {
    /// Runs the script if there is one; `Ok(None)` when there is nothing to run.
    async fn run(&self) -> Result<Option<CommandReport>, StageError>;
}

/// Network configuration files and interface control.
#[async_trait]
pub trait NetworkConfigurator: Send + Sync {
    /// New configuration shipped with the bundle, if any.
    async fn candidate(&self) -> Result<Option<Vec<u8>>, StageError>;
    /// Configuration currently installed, if any.
    async fn installed(&self) -> Result<Option<Vec<u8>>, StageError>;
    /// Replaces the installed configuration.
    async fn install(&self, content: &[u8]) -> Result<(), StageError>;
    async fn restart_interface(&self) -> Result<(), StageError>;
}

/// Where the software comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// Repository URL.
    pub url: String,
    /// Branch or tag; the remote default when `None`.
    pub branch: Option<String>,
}

/// Fetches and installs the software, replacing the running package.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn install(&self, source: &SourceRef) -> Result<(), StageError>;
}

/// One run of the deployment self-test.
///
/// The cycle bounds each run with its own timeout; dropping the future must
/// stop the test.
#[async_trait]
pub trait SelfTest: Send + Sync {
    async fn run(&self) -> Result<(), StageError>;
}

#[async_trait]
pub trait Rebooter: Send + Sync {
    async fn reboot(&self) -> Result<(), StageError>;
}

/// Wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}
