//! # Worker specification.
//!
//! [`WorkerSpec`] bundles what the supervisor needs to (re)start a worker:
//! - the worker's name (its section name in the configuration)
//! - the tick interval (`0` = run once, then idle until stopped)
//! - the implementation ([`WorkerRef`])
//! - the worker's configuration section
//!
//! A spec is immutable once the supervisor holds it; a configuration reload
//! replaces the specs wholesale.

use std::sync::Arc;
use std::time::Duration;

use crate::error::WorkerError;
use crate::workers::worker::WorkerRef;

/// Specification for running a worker under supervision.
#[derive(Clone)]
pub struct WorkerSpec {
    name: Arc<str>,
    interval: Duration,
    worker: WorkerRef,
    section: Arc<toml::Table>,
}

impl WorkerSpec {
    /// Section key holding the tick interval in seconds.
    pub const INTERVAL_KEY: &'static str = "interval";

    pub fn new(
        name: impl Into<Arc<str>>,
        interval: Duration,
        worker: WorkerRef,
        section: toml::Table,
    ) -> Self {
        Self {
            name: name.into(),
            interval,
            worker,
            section: Arc::new(section),
        }
    }

    /// Builds a spec from a configuration section, reading its `interval` key.
    pub fn from_section(
        name: impl Into<Arc<str>>,
        worker: WorkerRef,
        section: toml::Table,
    ) -> Result<Self, WorkerError> {
        let interval = interval_of(&section)?;
        Ok(Self::new(name, interval, worker, section))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    pub fn section(&self) -> &toml::Table {
        &self.section
    }
}

impl std::fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("name", &self.name)
            .field("kind", &self.worker.kind())
            .field("interval", &self.interval)
            .finish()
    }
}

fn interval_of(section: &toml::Table) -> Result<Duration, WorkerError> {
    let secs = match section.get(WorkerSpec::INTERVAL_KEY) {
        None => return Ok(Duration::ZERO),
        Some(toml::Value::Integer(i)) => *i as f64,
        Some(toml::Value::Float(f)) => *f,
        Some(other) => {
            return Err(WorkerError::Fatal {
                error: format!("'interval' must be a number, got {}", other.type_str()),
            });
        }
    };
    Duration::try_from_secs_f64(secs).map_err(|e| WorkerError::Fatal {
        error: format!("'interval' must be a non-negative number of seconds, got {secs} ({e})"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerFn;
    use tokio_util::sync::CancellationToken;

    fn noop() -> WorkerRef {
        WorkerFn::arc("noop", |_ctx: CancellationToken, _s: toml::Table| async { Ok::<_, WorkerError>(()) })
    }

    fn table(text: &str) -> toml::Table {
        text.parse().unwrap()
    }

    #[test]
    fn test_interval_defaults_to_zero() {
        let spec = WorkerSpec::from_section("status", noop(), toml::Table::new()).unwrap();
        assert_eq!(spec.interval(), Duration::ZERO);
        assert_eq!(spec.name(), "status");
    }

    #[test]
    fn test_interval_accepts_integers_and_floats() {
        let spec = WorkerSpec::from_section("a", noop(), table("interval = 60")).unwrap();
        assert_eq!(spec.interval(), Duration::from_secs(60));
        let spec = WorkerSpec::from_section("a", noop(), table("interval = 0.5")).unwrap();
        assert_eq!(spec.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_invalid_interval_is_rejected() {
        assert!(WorkerSpec::from_section("a", noop(), table("interval = -1")).is_err());
        assert!(WorkerSpec::from_section("a", noop(), table("interval = \"soon\"")).is_err());
        assert!(WorkerSpec::from_section("a", noop(), table("interval = nan")).is_err());
    }

    #[test]
    fn test_huge_interval_is_rejected_not_panicking() {
        let err = WorkerSpec::from_section("a", noop(), table("interval = 1e20")).unwrap_err();
        assert_eq!(err.as_label(), "worker_fatal");
    }
}
