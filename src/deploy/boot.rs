//! Once-per-boot guard.
//!
//! The marker lives on a volatile filesystem (`/run` by default), so it
//! disappears with each power cycle and the deployment cycle runs exactly once
//! per boot even if the service is restarted.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::DeployError;

/// Proof that this process claimed the current boot.
#[derive(Debug)]
pub struct BootGuard {
    marker: PathBuf,
}

impl BootGuard {
    /// Creates `marker` exclusively.
    ///
    /// Fails with [`DeployError::AlreadyRan`] if it exists. Any other I/O
    /// failure is logged and the claim is granted: an unwritable marker must
    /// never keep a device from deploying.
    pub fn claim(marker: impl Into<PathBuf>) -> Result<Self, DeployError> {
        let marker = marker.into();
        if let Some(parent) = marker.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(path = %parent.display(), error = %e, "cannot create boot marker directory");
            }
        }
        match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { marker })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(DeployError::AlreadyRan { marker })
            }
            Err(e) => {
                warn!(path = %marker.display(), error = %e, "cannot write boot marker, proceeding");
                Ok(Self { marker })
            }
        }
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }
}
