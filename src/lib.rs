//! # camvisor
//!
//! **Camvisor** keeps an unattended camera device working: it supervises the
//! device's periodic workers and, once per boot, updates, validates and serves
//! the device until its daily reboot.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!   │  WorkerSpec  │  │  WorkerSpec  │  │  WorkerSpec  │   one per [section]
//!   │  (capture)   │  │  (upload)    │  │  (status)    │   of the active config
//!   └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!          ▼                 ▼                 ▼
//! ┌────────────────────────────────────────────────────────┐
//! │  Supervisor                                            │
//! │  - worker table: spec, handle, WorkerState             │
//! │  - health tick every `period`: dead ─► Failed ─► retry │
//! │  - shutdown(grace): cooperative, then forced           │
//! └──────┬─────────────────┬─────────────────┬─────────────┘
//!        ▼                 ▼                 ▼
//!   WorkerRunner      WorkerRunner      WorkerRunner      tick, sleep(interval), tick...
//!        │                 │                 │
//!        └──── health events (Alive / Dead / Restarted) ──► Bus
//!                                                            │
//!                                                   SubscriberSet
//!                                                  ┌─────────┴─────────┐
//!                                              LogWriter          NotifyWriter ──► ntfy
//! ```
//!
//! ### Deployment cycle
//! ```text
//! AwaitingNetwork ─► SyncingBundle ─► RunningCommandFile ─► SyncingNetworkConfig
//!   ─► UpgradingSoftware ─► ResolvingConfig ─► SelfTesting ─► Serving
//!   ─► Terminating ─► Rebooting
//! ```
//! Only `ResolvingConfig` and `SelfTesting` abort the cycle; every other stage
//! logs, notifies and carries on with what the device already has.
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                         |
//! |-------------------|-------------------------------------------------------------|--------------------------------------------|
//! | **Workers**       | Periodic device work, started and stopped cooperatively.    | [`Worker`], [`WorkerFn`], [`WorkerSpec`]   |
//! | **Supervision**   | Health checks, restarts and graceful shutdown.              | [`Supervisor`], [`SupervisorConfig`]       |
//! | **Configuration** | Versioned files, atomic activation, templated values.       | [`ConfigStore`], [`Configuration`]         |
//! | **Deployment**    | The once-per-boot update and serve cycle.                   | [`DeploymentCycle`], [`DeploymentState`]   |
//! | **Notifications** | Best-effort operator alerts.                                | [`Notifier`], [`NotificationSink`]         |
//! | **Subscriber API**| Hook into runtime events.                                   | [`Subscribe`]                              |
//! | **Errors**        | Typed errors with stable labels.                            | [`WorkerError`], [`RuntimeError`]          |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use camvisor::{LogWriter, Subscribe, Supervisor, SupervisorConfig, WorkerFn, WorkerRef, WorkerSpec};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hello: WorkerRef = WorkerFn::arc("hello", |ctx: CancellationToken, _section: toml::Table| async move {
//!         if !ctx.is_cancelled() {
//!             println!("tick");
//!         }
//!         Ok::<_, camvisor::WorkerError>(())
//!     });
//!     let spec = WorkerSpec::new("hello", Duration::from_secs(1), hello, toml::Table::new());
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let mut sup = Supervisor::new(SupervisorConfig::default(), vec![spec], subs);
//!     sup.start_all();
//!
//!     let stop = CancellationToken::new();
//!     stop.cancel();
//!     sup.serve(stop).await;
//!     sup.shutdown(Duration::from_secs(1)).await?;
//!     sup.close().await;
//!     Ok(())
//! }
//! ```

#[cfg(not(unix))]
compile_error!("camvisor relies on unix symlinks, signals and process control");

pub mod config;
pub mod deploy;
mod error;
mod events;
pub mod logging;
mod meta;
pub mod notify;
mod subscribers;
mod supervisor;
pub mod workers;

// ---- Public re-exports ----

pub use config::{ConfigStore, ConfigVersion, Configuration, MainSection};
pub use deploy::{BootGuard, Capabilities, CycleReport, CycleSettings, DeploymentCycle, DeploymentState, StageStatus};
pub use error::{ConfigError, DeployError, MetaError, RuntimeError, StageError, WorkerError};
pub use events::{Bus, Event, EventKind, HealthOutcome};
pub use meta::DeviceMeta;
pub use notify::{ErrorLayer, NotificationSink, Notifier, NtfySink, Priority};
pub use subscribers::{LogWriter, NotifyWriter, Subscribe, SubscriberSet};
pub use supervisor::{
    Supervisor, SupervisorConfig, TickReport, WorkerState, Workload, WorkloadFactory,
    wait_for_shutdown_signal,
};
pub use workers::{StopOutcome, Worker, WorkerFn, WorkerHandle, WorkerRef, WorkerRegistry, WorkerRunner, WorkerSpec};
