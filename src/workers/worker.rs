//! # Worker abstraction.
//!
//! A [`Worker`] is one periodic unit of device work (capture, upload, config
//! poll, status report). It performs a single *tick* per call; scheduling,
//! liveness and stopping are handled by [`WorkerRunner`](crate::WorkerRunner).
//!
//! A tick receives a [`CancellationToken`] and should check it to stop
//! cooperatively; the runner aborts it anyway once the stop grace elapses.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

/// Shared handle to a worker implementation.
pub type WorkerRef = Arc<dyn Worker>;

/// # Periodic, cancelable unit of work.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use camvisor::{Worker, WorkerError};
///
/// struct Capture;
///
/// #[async_trait]
/// impl Worker for Capture {
///     fn kind(&self) -> &str { "capture" }
///
///     async fn tick(&self, ctx: CancellationToken, _section: &toml::Table) -> Result<(), WorkerError> {
///         if ctx.is_cancelled() {
///             return Err(WorkerError::Canceled);
///         }
///         // take a picture...
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Implementation name, matched against the `kind` key of a section.
    fn kind(&self) -> &str;

    /// Validates the worker's configuration section. Called before every start.
    fn check_config(&self, _section: &toml::Table) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Exercises the worker once against its real environment (camera present,
    /// server reachable, ...). Run by the deployment self-test, never by the supervisor.
    async fn deploy_test(&self, _section: &toml::Table) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Performs one unit of work.
    ///
    /// Returning an error other than [`WorkerError::Canceled`] ends the worker;
    /// the supervisor will find it dead and restart it.
    async fn tick(&self, ctx: CancellationToken, section: &toml::Table) -> Result<(), WorkerError>;
}
