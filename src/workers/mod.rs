//! Workers: the periodic units of device work and how they are run.
//!
//! - [`Worker`] is the trait a unit of work implements; [`WorkerFn`] wraps a closure.
//! - [`WorkerSpec`] binds a worker to its name, interval and configuration section.
//! - [`WorkerRunner`] starts a spec on its own tokio task, probes it and stops it.
//! - [`WorkerRegistry`] maps the `kind` key of a section to an implementation.
//! - [`builtin`] holds the implementations shipped with the binary.

pub mod builtin;
mod registry;
mod runner;
mod spec;
mod worker;
mod worker_fn;

pub use registry::{KIND_KEY, WorkerRegistry};
pub use runner::{StopOutcome, WorkerHandle, WorkerRunner};
pub use spec::WorkerSpec;
pub use worker::{Worker, WorkerRef};
pub use worker_fn::WorkerFn;
