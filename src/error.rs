//! Error types used by the camvisor runtime, its workers and the deployment cycle.
//!
//! This module defines the error taxonomies of the crate:
//!
//! - [`WorkerError`]: errors raised by a single worker tick.
//! - [`RuntimeError`]: errors raised by the supervisor itself.
//! - [`ConfigError`]: failures resolving, activating or loading configuration.
//! - [`MetaError`]: failures reading the device meta file.
//! - [`StageError`]: a capability failure inside one deployment stage.
//! - [`DeployError`]: a fatal outcome of the deployment cycle.
//!
//! Every type exposes `as_label()`, a short stable snake_case label used as a
//! log field and as a notification tag.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::deploy::DeploymentState;

/// # Errors produced by the supervisor runtime.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Shutdown grace period was exceeded; some workers had to be force-terminated.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forced termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Workers that did not stop cooperatively.
        stuck: Vec<String>,
    },

    /// A worker could not be started (invalid section, spawn failure).
    #[error("failed to start worker {worker}: {reason}")]
    StartFailed {
        /// Worker name.
        worker: String,
        /// Why the start was refused.
        reason: String,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/notifications.
    ///
    /// # Example
    /// ```
    /// use camvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::StartFailed { .. } => "runtime_start_failed",
        }
    }
}

/// # Errors produced by a worker tick.
///
/// A tick returning any error other than [`WorkerError::Canceled`] ends the
/// worker loop; the supervisor then observes the worker as dead.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Tick exceeded its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Non-recoverable error for this configuration.
    #[error("fatal error: {error}")]
    Fatal {
        /// The underlying error message.
        error: String,
    },

    /// Tick failed; a restart may succeed.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Worker observed its stop request.
    #[error("context cancelled")]
    Canceled,
}

impl WorkerError {
    /// Shorthand for [`WorkerError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        WorkerError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/notifications.
    ///
    /// # Example
    /// ```
    /// use camvisor::WorkerError;
    /// use std::time::Duration;
    ///
    /// let err = WorkerError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "worker_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Timeout { .. } => "worker_timeout",
            WorkerError::Fatal { .. } => "worker_fatal",
            WorkerError::Fail { .. } => "worker_failed",
            WorkerError::Canceled => "worker_canceled",
        }
    }
}

/// # Errors produced while resolving, activating or loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The active link (or the version it should point to) does not exist.
    #[error("configuration missing: {path}")]
    Missing {
        /// The path that could not be found.
        path: PathBuf,
    },

    /// The configuration was read but must not be used.
    #[error("invalid configuration {path}: {reason}")]
    Invalid {
        /// The offending file.
        path: PathBuf,
        /// What is wrong with it.
        reason: String,
    },

    /// TOML parsing failed.
    #[error("failed to parse configuration {path}: {source}")]
    Parse {
        /// The offending file.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// No versioned configuration file exists in the directory.
    #[error("no configuration version found in {dir}")]
    NoVersion {
        /// The scanned directory.
        dir: PathBuf,
    },

    /// Filesystem failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/notifications.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Missing { .. } => "config_missing",
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::NoVersion { .. } => "config_no_version",
            ConfigError::Io { .. } => "config_io",
        }
    }
}

/// # Errors produced while reading the device meta file.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum MetaError {
    /// The meta file could not be read.
    #[error("failed to read meta file {path}: {source}")]
    Read {
        /// Meta file path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The meta file is not valid TOML for [`DeviceMeta`](crate::DeviceMeta).
    #[error("failed to parse meta file {path}: {source}")]
    Parse {
        /// Meta file path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: toml::de::Error,
    },

    /// A required value is absent.
    #[error("meta file misses required value '{field}'")]
    MissingField {
        /// Name of the missing key.
        field: &'static str,
    },

    /// A value is present but unusable.
    #[error("meta value '{field}' is invalid: {reason}")]
    InvalidField {
        /// Name of the key.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl MetaError {
    /// Returns a short stable label (snake_case) for use in logs/notifications.
    pub fn as_label(&self) -> &'static str {
        match self {
            MetaError::Read { .. } => "meta_read",
            MetaError::Parse { .. } => "meta_parse",
            MetaError::MissingField { .. } => "meta_missing_field",
            MetaError::InvalidField { .. } => "meta_invalid_field",
        }
    }
}

/// # Failure of a deployment capability inside one stage.
///
/// Whether it aborts the cycle is decided by the stage's failure policy,
/// never by the capability.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StageError {
    /// The capability ran and reported failure.
    #[error("{reason}")]
    Failed {
        /// Human readable reason.
        reason: String,
    },

    /// The capability did not finish in time.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// Filesystem or process spawning failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl StageError {
    /// Shorthand for [`StageError::Failed`].
    pub fn failed(reason: impl Into<String>) -> Self {
        StageError::Failed {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/notifications.
    pub fn as_label(&self) -> &'static str {
        match self {
            StageError::Failed { .. } => "stage_failed",
            StageError::Timeout { .. } => "stage_timeout",
            StageError::Io(_) => "stage_io",
            StageError::Http(_) => "stage_http",
        }
    }
}

/// # Fatal outcome of the deployment cycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DeployError {
    /// A stage whose failure policy is fatal failed; the workload never started.
    #[error("deployment aborted in stage {stage}: {reason}")]
    Fatal {
        /// Stage that failed.
        stage: DeploymentState,
        /// Why.
        reason: String,
    },

    /// A termination request arrived before the workload was served.
    #[error("deployment interrupted before stage {stage}")]
    Interrupted {
        /// Stage that was about to start.
        stage: DeploymentState,
    },

    /// The cycle already ran since the last power-on.
    #[error("deployment cycle already ran this boot (marker {marker})")]
    AlreadyRan {
        /// Boot marker path.
        marker: PathBuf,
    },
}

impl DeployError {
    /// Returns a short stable label (snake_case) for use in logs/notifications.
    pub fn as_label(&self) -> &'static str {
        match self {
            DeployError::Fatal { .. } => "deploy_fatal",
            DeployError::Interrupted { .. } => "deploy_interrupted",
            DeployError::AlreadyRan { .. } => "deploy_already_ran",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_display_names_stage() {
        let err = DeployError::Fatal {
            stage: DeploymentState::SelfTesting,
            reason: "timed out after 5s".into(),
        };
        assert_eq!(
            err.to_string(),
            "deployment aborted in stage self-testing: timed out after 5s"
        );
        assert_eq!(err.as_label(), "deploy_fatal");
    }

    #[test]
    fn test_worker_error_labels() {
        assert_eq!(WorkerError::fail("x").as_label(), "worker_failed");
        assert_eq!(WorkerError::Canceled.as_label(), "worker_canceled");
    }
}
