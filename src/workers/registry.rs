//! # Worker registry: `kind` → implementation.
//!
//! The binary registers every worker implementation it ships; a configuration
//! section picks one with its `kind` key (defaulting to the section name).
//!
//! ```text
//! [capture]            ──► kind = "process" ──► registry["process"] ──► WorkerSpec("capture")
//! [status]             ──► kind = "status"  ──► registry["status"]  ──► WorkerSpec("status")
//! ```

use std::collections::HashMap;

use tracing::{error, warn};

use crate::config::Configuration;
use crate::error::WorkerError;
use crate::workers::spec::WorkerSpec;
use crate::workers::worker::WorkerRef;

/// Section key naming the worker implementation.
pub const KIND_KEY: &str = "kind";

/// Maps worker kinds to implementations.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    kinds: HashMap<String, WorkerRef>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `worker` under its [`kind`](crate::Worker::kind).
    ///
    /// A later registration of the same kind replaces the earlier one.
    pub fn register(&mut self, worker: WorkerRef) -> &mut Self {
        let kind = worker.kind().to_string();
        if self.kinds.insert(kind.clone(), worker).is_some() {
            warn!(kind = %kind, "worker kind registered twice; keeping the latest");
        }
        self
    }

    pub fn get(&self, kind: &str) -> Option<&WorkerRef> {
        self.kinds.get(kind)
    }

    /// Sorted list of registered kinds.
    pub fn kinds(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    /// Resolves the implementation of section `name`.
    pub fn resolve(&self, name: &str, section: &toml::Table) -> Result<WorkerRef, WorkerError> {
        let kind = match section.get(KIND_KEY) {
            None => name,
            Some(toml::Value::String(kind)) => kind.as_str(),
            Some(other) => {
                return Err(WorkerError::Fatal {
                    error: format!("'kind' must be a string, got {}", other.type_str()),
                });
            }
        };
        self.get(kind).cloned().ok_or_else(|| WorkerError::Fatal {
            error: format!("unknown worker kind '{kind}'"),
        })
    }

    /// Builds the spec of section `name`.
    pub fn spec_for(&self, name: &str, section: &toml::Table) -> Result<WorkerSpec, WorkerError> {
        let worker = self.resolve(name, section)?;
        WorkerSpec::from_section(name, worker, section.clone())
    }

    /// Builds a spec for every worker section of `cfg`.
    ///
    /// A section that cannot be turned into a spec is logged and skipped; the
    /// remaining workers still run.
    pub fn specs(&self, cfg: &Configuration) -> Vec<WorkerSpec> {
        let mut out = Vec::with_capacity(cfg.workers.len());
        for (name, section) in &cfg.workers {
            match self.spec_for(name, section) {
                Ok(spec) => out.push(spec),
                Err(e) => error!(worker = %name, error = %e, "skipping worker section"),
            }
        }
        out
    }

    /// Validates and exercises every worker section of `cfg` once.
    ///
    /// A section passes when its spec builds, its configuration checks out and
    /// its deployment test succeeds. Results are in section order.
    pub async fn deploy_test(&self, cfg: &Configuration) -> Vec<(String, Result<(), WorkerError>)> {
        let mut out = Vec::with_capacity(cfg.workers.len());
        for (name, section) in &cfg.workers {
            let result = match self.spec_for(name, section) {
                Ok(spec) => match spec.worker().check_config(spec.section()) {
                    Ok(()) => spec.worker().deploy_test(spec.section()).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e),
            };
            out.push((name.clone(), result));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::WorkerFn;
    use std::path::Path;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn registry() -> WorkerRegistry {
        let mut reg = WorkerRegistry::new();
        reg.register(WorkerFn::arc("process", |_c: CancellationToken, _s: toml::Table| async { Ok::<_, WorkerError>(()) }))
            .register(WorkerFn::arc("status", |_c: CancellationToken, _s: toml::Table| async { Ok::<_, WorkerError>(()) }));
        reg
    }

    #[test]
    fn test_kind_defaults_to_section_name() {
        let spec = registry().spec_for("status", &toml::Table::new()).unwrap();
        assert_eq!(spec.worker().kind(), "status");
        assert_eq!(spec.name(), "status");
    }

    #[test]
    fn test_explicit_kind_and_unknown_kind() {
        let reg = registry();
        let section: toml::Table = "kind = \"process\"\ninterval = 30".parse().unwrap();
        let spec = reg.spec_for("capture", &section).unwrap();
        assert_eq!(spec.worker().kind(), "process");
        assert_eq!(spec.interval(), Duration::from_secs(30));

        let err = reg.spec_for("capture", &toml::Table::new()).unwrap_err();
        assert_eq!(err.as_label(), "worker_fatal");
    }

    #[test]
    fn test_specs_skips_bad_sections() {
        let cfg = Configuration::parse(
            Path::new("cfg_1.toml"),
            r#"
            [main]
            period = 5

            [capture]
            kind = "process"

            [mystery]
            interval = 1

            [status]
            interval = "often"
            "#,
        )
        .unwrap();

        let specs = registry().specs(&cfg);
        let names: Vec<&str> = specs.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["capture"]);
        assert_eq!(registry().kinds(), vec!["process", "status"]);
    }

    #[tokio::test]
    async fn test_deploy_test_fails_sections_that_serving_would_drop() {
        let cfg = Configuration::parse(
            Path::new("cfg_1.toml"),
            r#"
            [main]
            period = 5

            [capture]
            kind = "process"

            [status]
            interval = "often"
            "#,
        )
        .unwrap();

        let results = registry().deploy_test(&cfg).await;
        let summary: Vec<(&str, bool)> = results.iter().map(|(n, r)| (n.as_str(), r.is_ok())).collect();
        assert_eq!(summary, vec![("capture", true), ("status", false)]);
        assert_eq!(registry().specs(&cfg).len(), 1);
    }
}
