//! # Versioned configuration file names.
//!
//! A versioned configuration file is named `<prefix>_<N>.<ext>` where `N` is a
//! non-negative integer. The highest `N` in a directory wins.
//!
//! ```text
//! camvisor_config_1.toml   ─┐
//! camvisor_config_3.toml   ─┼─► best_version() = 3
//! camvisor_config_2.toml   ─┘
//! camvisor_config.toml      (the active link, not versioned)
//! camvisor_config_x.toml    (ignored)
//! ```

use std::fmt;
use std::path::Path;

use crate::error::ConfigError;

/// Version number extracted from a configuration file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConfigVersion(pub u64);

impl fmt::Display for ConfigVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `<prefix>_<N>.<ext>` naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    prefix: String,
    ext: String,
}

impl VersionedName {
    pub fn new(prefix: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ext: ext.into(),
        }
    }

    /// Name of the indirection pointing at the active version (`<prefix>.<ext>`).
    pub fn active_name(&self) -> String {
        format!("{}.{}", self.prefix, self.ext)
    }

    /// File name of a given version.
    pub fn file_name(&self, version: ConfigVersion) -> String {
        format!("{}_{}.{}", self.prefix, version.0, self.ext)
    }

    /// Extracts the version from `name`, or `None` if it does not follow the scheme.
    pub fn parse(&self, name: &str) -> Option<ConfigVersion> {
        let digits = name
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')?
            .strip_suffix(self.ext.as_str())?
            .strip_suffix('.')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok().map(ConfigVersion)
    }

    /// Highest version among `names`; `None` when no name matches.
    pub fn best_version<'a, I>(&self, names: I) -> Option<ConfigVersion>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().filter_map(|n| self.parse(n)).max()
    }

    /// Lists the versions present in `dir` (regular files only, no recursion), ascending.
    pub fn list(&self, dir: &Path) -> Result<Vec<ConfigVersion>, ConfigError> {
        let entries = std::fs::read_dir(dir).map_err(|e| ConfigError::io(dir, e))?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| ConfigError::io(dir, e))?;
            let is_file = entry
                .file_type()
                .map(|t| t.is_file())
                .map_err(|e| ConfigError::io(entry.path(), e))?;
            if !is_file {
                continue;
            }
            if let Some(v) = entry.file_name().to_str().and_then(|n| self.parse(n)) {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Scans `dir` and returns the highest version found, or `None`.
    pub fn resolve_active_version(&self, dir: &Path) -> Result<Option<ConfigVersion>, ConfigError> {
        Ok(self.list(dir)?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> VersionedName {
        VersionedName::new("cfg", "toml")
    }

    #[test]
    fn test_parse_accepts_only_the_scheme() {
        let s = scheme();
        assert_eq!(s.parse("cfg_12.toml"), Some(ConfigVersion(12)));
        assert_eq!(s.parse("cfg_0.toml"), Some(ConfigVersion(0)));
        assert_eq!(s.parse("cfg.toml"), None);
        assert_eq!(s.parse("cfg_.toml"), None);
        assert_eq!(s.parse("cfg_-1.toml"), None);
        assert_eq!(s.parse("cfg_1a.toml"), None);
        assert_eq!(s.parse("cfg_1.yaml"), None);
        assert_eq!(s.parse("other_1.toml"), None);
        assert_eq!(s.parse("cfg_1_2.toml"), None);
    }

    #[test]
    fn test_best_version_is_maximum() {
        let s = scheme();
        let names = ["cfg_1.toml", "cfg_3.toml", "cfg_2.toml"];
        assert_eq!(s.best_version(names), Some(ConfigVersion(3)));
    }

    #[test]
    fn test_best_version_over_many_name_sets() {
        let s = scheme();
        for n in 1..40u64 {
            let names: Vec<String> = (0..n).rev().map(|i| s.file_name(ConfigVersion(i * 7 % n))).collect();
            let expected = (0..n).map(|i| i * 7 % n).max().map(ConfigVersion);
            assert_eq!(s.best_version(names.iter().map(String::as_str)), expected);
        }
    }

    #[test]
    fn test_best_version_of_empty_set_is_none() {
        assert_eq!(scheme().best_version(Vec::<&str>::new()), None);
        assert_eq!(scheme().best_version(["notes.txt", "cfg.toml"]), None);
    }

    #[test]
    fn test_resolve_scans_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["cfg_1.toml", "cfg_3.toml", "cfg_2.toml", "cfg.toml"] {
            std::fs::write(dir.path().join(name), "[main]\nperiod = 1\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("cfg_9.toml")).unwrap();

        let v = scheme().resolve_active_version(dir.path()).unwrap();
        assert_eq!(v, Some(ConfigVersion(3)));
    }

    #[test]
    fn test_resolve_empty_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(scheme().resolve_active_version(dir.path()).unwrap(), None);
    }
}
