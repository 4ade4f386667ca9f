//! Worker implementations shipped with the binary.
//!
//! | kind        | what one tick does                                          |
//! |-------------|-------------------------------------------------------------|
//! | `process`   | runs an external program (camera capture, upload, ...)      |
//! | `status`    | writes a status report, optionally sends it as a notice     |
//! | `heartbeat` | stamps a file with the current time                         |
//! | `config`    | downloads a newer configuration version from a remote index |

mod config;
mod heartbeat;
mod process;
mod status;

pub use config::ConfigWorker;
pub use heartbeat::HeartbeatWorker;
pub use process::ProcessWorker;
pub use status::StatusWorker;

use std::time::Duration;

use crate::config::ConfigStore;
use crate::error::WorkerError;
use crate::notify::Notifier;
use crate::workers::registry::WorkerRegistry;

/// Registers every built-in worker.
///
/// `store` is the configuration directory the `config` worker updates.
pub fn register_builtins(registry: &mut WorkerRegistry, notifier: Notifier, store: ConfigStore) {
    registry
        .register(ProcessWorker::arc())
        .register(StatusWorker::arc(notifier))
        .register(HeartbeatWorker::arc())
        .register(ConfigWorker::arc(store));
}

pub(crate) fn required_str<'a>(section: &'a toml::Table, key: &str) -> Result<&'a str, WorkerError> {
    match section.get(key) {
        Some(toml::Value::String(s)) if !s.is_empty() => Ok(s),
        Some(toml::Value::String(_)) => Err(WorkerError::Fatal {
            error: format!("'{key}' must not be empty"),
        }),
        Some(other) => Err(WorkerError::Fatal {
            error: format!("'{key}' must be a string, got {}", other.type_str()),
        }),
        None => Err(WorkerError::Fatal {
            error: format!("missing required key '{key}'"),
        }),
    }
}

pub(crate) fn optional_secs(section: &toml::Table, key: &str) -> Result<Option<Duration>, WorkerError> {
    let secs = match section.get(key) {
        None => return Ok(None),
        Some(toml::Value::Integer(i)) => *i as f64,
        Some(toml::Value::Float(f)) => *f,
        Some(other) => {
            return Err(WorkerError::Fatal {
                error: format!("'{key}' must be a number of seconds, got {}", other.type_str()),
            });
        }
    };
    match Duration::try_from_secs_f64(secs) {
        Ok(d) if !d.is_zero() => Ok(Some(d)),
        _ => Err(WorkerError::Fatal {
            error: format!("'{key}' must be a positive number of seconds, got {secs}"),
        }),
    }
}

pub(crate) fn string_list(section: &toml::Table, key: &str) -> Result<Vec<String>, WorkerError> {
    let Some(value) = section.get(key) else {
        return Ok(Vec::new());
    };
    let toml::Value::Array(items) = value else {
        return Err(WorkerError::Fatal {
            error: format!("'{key}' must be an array of strings"),
        });
    };
    items
        .iter()
        .map(|v| match v {
            toml::Value::String(s) => Ok(s.clone()),
            other => Err(WorkerError::Fatal {
                error: format!("'{key}' entries must be strings, got {}", other.type_str()),
            }),
        })
        .collect()
}
