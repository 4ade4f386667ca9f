//! # WorkerRunner: start / liveness / stop contract for one worker.
//!
//! ```text
//! start(spec) ──► check_config(section) ──► tokio::spawn(loop)
//!
//! loop {
//!   ├─► ctx cancelled?            → exit Ok
//!   ├─► tick(child ctx, section)
//!   │     ├─ Ok                   → continue
//!   │     ├─ Err(Canceled)        → exit Ok
//!   │     └─ Err(e)               → exit Err(e)   (worker is now dead)
//!   └─► interval == 0 ? wait for ctx : sleep(interval) (cancellable)
//! }
//!
//! stop(handle, grace):
//!   cancel ctx ──► join within grace ── yes ──► Cooperative
//!                                     └─ no ──► abort() ──► Forced
//! ```
//!
//! ## Rules
//! - Ticks of one worker run **sequentially**, never in parallel.
//! - The runner never restarts anything; dead workers are the supervisor's business.
//! - `is_alive` is a non-blocking probe.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::error::{RuntimeError, WorkerError};
use crate::workers::spec::WorkerSpec;

/// How a worker exited after a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker observed its stop request within the grace period.
    Cooperative,
    /// The worker had to be aborted.
    Forced,
}

impl StopOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            StopOutcome::Cooperative => "cooperative",
            StopOutcome::Forced => "forced",
        }
    }
}

/// Handle to a started worker.
pub struct WorkerHandle {
    name: String,
    join: JoinHandle<Result<(), WorkerError>>,
    cancel: CancellationToken,
    started_at: Instant,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time elapsed since the worker was started.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Uniform start / is_alive / stop contract over [`WorkerSpec`]s.
pub struct WorkerRunner;

impl WorkerRunner {
    /// Validates the spec's section and spawns its work loop.
    pub fn start(spec: &WorkerSpec) -> Result<WorkerHandle, RuntimeError> {
        spec.worker()
            .check_config(spec.section())
            .map_err(|e| RuntimeError::StartFailed {
                worker: spec.name().to_string(),
                reason: e.to_string(),
            })?;

        let cancel = CancellationToken::new();
        let join = tokio::spawn(work_loop(spec.clone(), cancel.clone()));
        Ok(WorkerHandle {
            name: spec.name().to_string(),
            join,
            cancel,
            started_at: Instant::now(),
        })
    }

    /// True while the work loop has not exited.
    pub fn is_alive(handle: &WorkerHandle) -> bool {
        !handle.join.is_finished()
    }

    /// Requests a cooperative stop, aborting the worker once `grace` elapses.
    pub async fn stop(handle: WorkerHandle, grace: Duration) -> StopOutcome {
        let WorkerHandle {
            mut join, cancel, ..
        } = handle;
        cancel.cancel();

        match time::timeout(grace, &mut join).await {
            Ok(_) => StopOutcome::Cooperative,
            Err(_elapsed) => {
                join.abort();
                let _ = join.await;
                StopOutcome::Forced
            }
        }
    }

    /// Collects the exit cause of a worker that is no longer alive.
    pub async fn reap(handle: WorkerHandle) -> String {
        handle.cancel.cancel();
        match handle.join.await {
            Ok(Ok(())) => "exited".to_string(),
            Ok(Err(e)) => e.to_string(),
            Err(je) if je.is_panic() => "panicked".to_string(),
            Err(_) => "aborted".to_string(),
        }
    }
}

async fn work_loop(spec: WorkerSpec, ctx: CancellationToken) -> Result<(), WorkerError> {
    loop {
        if ctx.is_cancelled() {
            return Ok(());
        }
        match spec.worker().tick(ctx.child_token(), spec.section()).await {
            Ok(()) => {}
            Err(WorkerError::Canceled) => return Ok(()),
            Err(e) => return Err(e),
        }

        if spec.interval().is_zero() {
            ctx.cancelled().await;
            return Ok(());
        }
        select! {
            _ = time::sleep(spec.interval()) => {}
            _ = ctx.cancelled() => return Ok(()),
        }
    }
}
