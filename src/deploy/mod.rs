//! # Deployment cycle.
//!
//! Runs once per boot: bring the device up to date, validate the result, serve
//! the workload until the daily reboot time, then reboot.
//!
//! - [`DeploymentCycle`] the ordered state machine and its failure policies.
//! - [`Capabilities`] the external effects it drives, one trait each.
//! - [`system`] the implementations used on a device.
//! - [`BootGuard`] the once-per-boot marker.

mod boot;
mod capabilities;
mod cycle;
mod deadline;
mod state;
pub mod system;

pub use boot::BootGuard;
pub use capabilities::{
    BundleOutcome, BundleSync, Clock, CommandFile, CommandReport, Connectivity,
    NetworkConfigurator, PackageInstaller, Rebooter, SelfTest, SourceRef,
};
pub use cycle::{Capabilities, CycleReport, CycleSettings, DeploymentCycle};
pub use deadline::next_deadline;
pub use state::{DeploymentState, StageStatus};
