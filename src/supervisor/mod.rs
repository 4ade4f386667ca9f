//! Supervision of the configured workers.
//!
//! - [`Supervisor`] keeps the worker table, runs the health check and shuts down.
//! - [`SupervisorConfig`] holds its runtime settings.
//! - [`Workload`] / [`WorkloadFactory`] are the seam the deployment cycle drives it through.
//! - [`wait_for_shutdown_signal`] resolves on SIGINT/SIGTERM/SIGQUIT.

mod config;
mod core;
mod shutdown;

pub use config::SupervisorConfig;
pub use self::core::{Supervisor, TickReport, WorkerState, Workload, WorkloadFactory};
pub use shutdown::wait_for_shutdown_signal;
