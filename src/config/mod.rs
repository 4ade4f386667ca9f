//! Configuration: versioned TOML files, atomic activation and template rendering.
//!
//! - [`VersionedName`], [`ConfigVersion`] the `<prefix>_<N>.<ext>` naming scheme
//! - [`ConfigStore`] resolve / activate / prune / load / change detection
//! - [`Configuration`], [`MainSection`], [`NtfySettings`] the parsed document
//!
//! ## Quick wiring
//! ```text
//! DeploymentCycle (ResolvingConfig) ──► resolve_active_version ──► activate ──► load
//! Supervisor (via WorkloadFactory)  ◄── Configuration { main, workers }
//! ```

mod model;
mod store;
mod template;
mod version;

pub use model::{Configuration, MainSection, NtfySettings};
pub use store::{ConfigStore, Fingerprint};
pub use template::render;
pub use version::{ConfigVersion, VersionedName};
