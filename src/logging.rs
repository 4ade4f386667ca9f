//! Process-wide tracing setup.
//!
//! Always logs to stderr (collected by the service manager). When a local log
//! file is configured, a non-blocking file layer is added beside it. The file
//! rotates daily and only the newest [`MAX_LOG_FILES`] are kept. The returned
//! guard must live as long as the process or buffered lines are lost.
//!
//! An [`ErrorLayer`] may be stacked on top to send `ERROR` events as
//! notifications.

use std::io;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::notify::ErrorLayer;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "info";

/// Rotated log files kept beside the active one.
pub const MAX_LOG_FILES: usize = 3;

/// Installs the global subscriber.
///
/// Fails only when the log file cannot be opened or a global subscriber is
/// already installed.
pub fn init(local_log_file: Option<&Path>, errors: Option<ErrorLayer>) -> io::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stderr = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    let (file, guard) = match local_log_file.map(file_appender).transpose()?.flatten() {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file)
        .with(errors)
        .try_init()
        .map_err(io::Error::other)?;
    Ok(guard)
}

/// Daily rotating appender writing `<path>.<date>`; `None` when `path` names no file.
pub fn file_appender(path: &Path) -> io::Result<Option<RollingFileAppender>> {
    let Some((dir, name)) = split_path(path) else {
        return Ok(None);
    };
    std::fs::create_dir_all(dir)?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(name.to_string_lossy().into_owned())
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .map(Some)
        .map_err(io::Error::other)
}

fn split_path(path: &Path) -> Option<(&Path, &std::ffi::OsStr)> {
    let name = path.file_name()?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    Some((dir, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_split_path() {
        let (dir, name) = split_path(Path::new("/var/log/camvisor.log")).unwrap();
        assert_eq!(dir, Path::new("/var/log"));
        assert_eq!(name, "camvisor.log");

        let (dir, _) = split_path(Path::new("camvisor.log")).unwrap();
        assert_eq!(dir, Path::new("."));

        assert!(split_path(Path::new("/")).is_none());
    }

    #[test]
    fn test_file_appender_writes_dated_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mut appender = file_appender(&tmp.path().join("logs/camvisor.log")).unwrap().unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = std::fs::read_dir(tmp.path().join("logs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
        let date = names[0].strip_prefix("camvisor.log.").unwrap();
        assert!(chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok(), "{date}");

        let written = std::fs::read_to_string(tmp.path().join("logs").join(&names[0])).unwrap();
        assert_eq!(written, "hello\n");
    }

    #[test]
    fn test_file_appender_without_file_name_is_none() {
        assert!(file_appender(Path::new("/")).unwrap().is_none());
    }
}
