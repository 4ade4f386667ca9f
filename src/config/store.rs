//! # ConfigStore: versioned files behind one atomic indirection.
//!
//! ## Layout
//! ```text
//! <dir>/
//!   camvisor_config_2.toml
//!   camvisor_config_3.toml
//!   camvisor_config.toml  ──symlink──► camvisor_config_3.toml
//! ```
//!
//! ## Rules
//! - The active configuration is only ever changed by [`ConfigStore::activate`],
//!   which builds a fresh symlink beside the active one and `rename(2)`s it into
//!   place. A reader opening the active path sees the old file or the new one,
//!   never a mix.
//! - Versioned files are never edited in place.
//! - [`ConfigStore::load`] renders `{{ name }}` placeholders before parsing; any
//!   placeholder left unresolved makes the configuration invalid.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use super::model::Configuration;
use super::template;
use super::version::{ConfigVersion, VersionedName};
use crate::error::ConfigError;

/// Identity of the active configuration at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    target: Option<PathBuf>,
    len: u64,
    modified: Option<SystemTime>,
}

/// Resolves, activates and loads versioned configuration files of one directory.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    dir: PathBuf,
    scheme: VersionedName,
    vars: BTreeMap<String, String>,
}

impl ConfigStore {
    /// File extension of configuration files.
    pub const EXT: &'static str = "toml";

    /// Creates a store for `<dir>/<prefix>_<N>.toml` files.
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            scheme: VersionedName::new(prefix, Self::EXT),
            vars: BTreeMap::new(),
        }
    }

    /// Sets the values substituted for `{{ name }}` placeholders at load time.
    pub fn with_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.vars = vars;
        self
    }

    /// Directory holding the configuration files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Naming scheme of the versioned files.
    pub fn scheme(&self) -> &VersionedName {
        &self.scheme
    }

    /// Path of the indirection pointing at the active version.
    pub fn active_path(&self) -> PathBuf {
        self.dir.join(self.scheme.active_name())
    }

    /// Path of a given version.
    pub fn version_path(&self, version: ConfigVersion) -> PathBuf {
        self.dir.join(self.scheme.file_name(version))
    }

    /// Highest version present in the directory, or `None`.
    pub fn resolve_active_version(&self) -> Result<Option<ConfigVersion>, ConfigError> {
        self.scheme.resolve_active_version(&self.dir)
    }

    /// Version the indirection currently points at, if any.
    pub fn active_version(&self) -> Result<Option<ConfigVersion>, ConfigError> {
        Ok(self
            .link_target()?
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .and_then(|n| self.scheme.parse(n)))
    }

    /// Atomically points the indirection at `version`.
    pub fn activate(&self, version: ConfigVersion) -> Result<(), ConfigError> {
        let file_name = self.scheme.file_name(version);
        let target = self.dir.join(&file_name);
        if !target.is_file() {
            return Err(ConfigError::Missing { path: target });
        }

        let active = self.active_path();
        let staging = self.dir.join(format!(
            ".{}.{}.tmp",
            self.scheme.active_name(),
            std::process::id()
        ));
        match fs::remove_file(&staging) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(ConfigError::io(&staging, e)),
        }
        std::os::unix::fs::symlink(&file_name, &staging)
            .map_err(|e| ConfigError::io(&staging, e))?;
        if let Err(e) = fs::rename(&staging, &active) {
            let _ = fs::remove_file(&staging);
            return Err(ConfigError::io(&active, e));
        }

        info!(version = %version, path = %active.display(), "configuration activated");
        Ok(())
    }

    /// Deletes every versioned file except `keep`. Returns the removed versions.
    ///
    /// Individual deletion failures are logged and skipped.
    pub fn prune(&self, keep: ConfigVersion) -> Result<Vec<ConfigVersion>, ConfigError> {
        let mut removed = Vec::new();
        for version in self.scheme.list(&self.dir)? {
            if version == keep {
                continue;
            }
            let path = self.version_path(version);
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(version = %version, "old configuration removed");
                    removed.push(version);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove old configuration"),
            }
        }
        Ok(removed)
    }

    /// Reads, renders and parses the active configuration.
    pub fn load(&self) -> Result<Configuration, ConfigError> {
        let active = self.active_path();
        let text = match fs::read_to_string(&active) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing { path: active });
            }
            Err(e) => return Err(ConfigError::io(&active, e)),
        };

        let mut cfg = self.check(&active, &text)?;
        cfg.version = self.active_version()?;
        Ok(cfg)
    }

    /// Renders and parses `text` as it would be loaded from `path`.
    pub fn check(&self, path: &Path, text: &str) -> Result<Configuration, ConfigError> {
        let rendered = template::render(text, &self.vars).map_err(|missing| {
            ConfigError::invalid(
                path,
                format!("unresolved placeholders: {}", missing.join(", ")),
            )
        })?;
        Configuration::parse(path, &rendered)
    }

    /// Stores `text` as `version` once it [checks](Self::check) out.
    ///
    /// The file is written to a temporary file in the directory and renamed
    /// into place, so a partial download never carries a versioned name. An
    /// invalid text leaves the directory untouched.
    pub fn install_version(&self, version: ConfigVersion, text: &str) -> Result<PathBuf, ConfigError> {
        let target = self.version_path(version);
        self.check(&target, text)?;

        fs::create_dir_all(&self.dir).map_err(|e| ConfigError::io(&self.dir, e))?;
        let mut staged = tempfile::NamedTempFile::new_in(&self.dir).map_err(|e| ConfigError::io(&self.dir, e))?;
        staged
            .write_all(text.as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|e| ConfigError::io(staged.path(), e))?;
        staged
            .persist(&target)
            .map_err(|e| ConfigError::io(&target, e.error))?;
        info!(version = %version, path = %target.display(), "configuration version stored");
        Ok(target)
    }

    /// Captures the current identity of the active configuration.
    pub fn fingerprint(&self) -> Result<Fingerprint, ConfigError> {
        let active = self.active_path();
        let meta = fs::metadata(&active).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ConfigError::Missing {
                path: active.clone(),
            },
            _ => ConfigError::io(&active, e),
        })?;
        Ok(Fingerprint {
            target: self.link_target()?,
            len: meta.len(),
            modified: meta.modified().ok(),
        })
    }

    /// True if the active configuration differs from `since`.
    ///
    /// An unreadable configuration does not count as a change.
    pub fn has_changed(&self, since: &Fingerprint) -> bool {
        matches!(self.fingerprint(), Ok(now) if now != *since)
    }

    fn link_target(&self) -> Result<Option<PathBuf>, ConfigError> {
        let active = self.active_path();
        match fs::read_link(&active) {
            Ok(target) => Ok(Some(self.dir.join(target))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // Not a symlink: a plain file placed by hand.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(None),
            Err(e) => Err(ConfigError::io(&active, e)),
        }
    }
}
