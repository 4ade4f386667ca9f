//! # Supervisor: worker table, health-check loop and graceful shutdown.
//!
//! ```text
//! Supervisor::new(cfg, specs, subscribers)
//!   ├─ worker table: name ──► (WorkerSpec, Option<WorkerHandle>, WorkerState)
//!   └─ listener: Bus.subscribe() ──► SubscriberSet::emit(&Event)
//!
//! start_all():   Stopped ──start──► Running   (WorkerStarted)
//!                        └─fail──► Failed    (RestartFailed)
//!
//! health_check_tick(), for each worker:
//!   Running, alive  → nothing
//!   Running, dead   → Failed (WorkerDead), then one restart attempt below
//!   Failed          → start once ──► Running (WorkerRestarted)
//!                               └─► Failed  (RestartFailed, retried next tick)
//!
//! shutdown(grace):
//!   ShutdownRequested ─► stop every handle concurrently (cooperative, then forced)
//!                     ─► WorkerStopped per worker
//!                     ─► AllStoppedWithin | GraceExceeded
//! ```
//!
//! ## Rules
//! - Only the supervisor writes [`WorkerState`]; workers only report liveness.
//! - At most one restart attempt per worker per tick, never given up.
//! - The health loop never awaits worker work: probes are non-blocking and
//!   starts only spawn.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::SupervisorConfig;
use crate::config::Configuration;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind, HealthOutcome};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::workers::{StopOutcome, WorkerHandle, WorkerRunner, WorkerSpec};

/// Recorded state of a supervised worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started, or stopped by a shutdown.
    Stopped,
    /// Started and last seen alive.
    Running,
    /// Found dead or failed to start; restarted on the next tick.
    Failed,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Running => "running",
            WorkerState::Failed => "failed",
        })
    }
}

/// What one health-check tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Running workers found alive.
    pub alive: usize,
    /// Running workers found dead during this tick.
    pub dead: usize,
    /// Restart attempts made.
    pub restarts_attempted: usize,
    /// Restart attempts that succeeded.
    pub restarted: usize,
}

struct Entry {
    spec: WorkerSpec,
    handle: Option<WorkerHandle>,
    state: WorkerState,
    restarts: u32,
}

impl Entry {
    fn new(spec: WorkerSpec) -> Self {
        Self {
            spec,
            handle: None,
            state: WorkerState::Stopped,
            restarts: 0,
        }
    }
}

/// Owns the workers of one configuration and keeps them alive.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    workers: BTreeMap<Arc<str>, Entry>,
    closing: CancellationToken,
    listener: JoinHandle<SubscriberSet>,
}

impl Supervisor {
    /// Creates a supervisor for `specs`, delivering its events to `subscribers`.
    ///
    /// Specs sharing a name with an earlier spec are dropped. Must be called
    /// from within a tokio runtime.
    pub fn new(
        cfg: SupervisorConfig,
        specs: Vec<WorkerSpec>,
        subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Self {
        let bus = Bus::new(cfg.bus_capacity);
        let set = SubscriberSet::new(subscribers, bus.clone());
        let closing = CancellationToken::new();
        let listener = tokio::spawn(forward(bus.subscribe(), set, closing.clone()));

        let mut sup = Self {
            cfg,
            bus,
            workers: BTreeMap::new(),
            closing,
            listener,
        };
        sup.install(specs);
        sup
    }

    fn install(&mut self, specs: Vec<WorkerSpec>) {
        self.workers.clear();
        for spec in specs {
            let name: Arc<str> = Arc::from(spec.name());
            if self.workers.contains_key(&name) {
                warn!(worker = %name, "duplicate worker name; keeping the first definition");
                continue;
            }
            self.workers.insert(name, Entry::new(spec));
        }
    }

    /// Runtime settings.
    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Event bus this supervisor publishes to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Snapshot of every worker's recorded state, sorted by name.
    pub fn states(&self) -> Vec<(String, WorkerState)> {
        self.workers
            .iter()
            .map(|(name, e)| (name.to_string(), e.state))
            .collect()
    }

    /// Recorded state of worker `name`.
    pub fn state(&self, name: &str) -> Option<WorkerState> {
        self.workers.get(name).map(|e| e.state)
    }

    /// Cumulative restart attempts of worker `name`.
    pub fn restarts(&self, name: &str) -> Option<u32> {
        self.workers.get(name).map(|e| e.restarts)
    }

    /// Starts every stopped worker.
    pub fn start_all(&mut self) {
        for (name, entry) in self.workers.iter_mut() {
            if entry.state != WorkerState::Stopped {
                continue;
            }
            match WorkerRunner::start(&entry.spec) {
                Ok(handle) => {
                    entry.handle = Some(handle);
                    entry.state = WorkerState::Running;
                    self.bus
                        .publish(Event::health(name.clone(), HealthOutcome::Alive));
                }
                Err(e) => {
                    entry.state = WorkerState::Failed;
                    self.bus.publish(
                        Event::new(EventKind::RestartFailed)
                            .with_worker(name.clone())
                            .with_reason(e.to_string())
                            .with_attempt(0),
                    );
                }
            }
        }
    }

    /// Probes every worker once and restarts those found dead.
    pub async fn health_check_tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        for (name, entry) in self.workers.iter_mut() {
            if entry.state == WorkerState::Running {
                if entry.handle.as_ref().is_some_and(WorkerRunner::is_alive) {
                    report.alive += 1;
                    continue;
                }
                let reason = match entry.handle.take() {
                    Some(handle) => WorkerRunner::reap(handle).await,
                    None => "no handle".to_string(),
                };
                entry.state = WorkerState::Failed;
                report.dead += 1;
                self.bus.publish(
                    Event::health(name.clone(), HealthOutcome::Dead).with_reason(reason),
                );
            }

            if entry.state != WorkerState::Failed {
                continue;
            }
            entry.restarts = entry.restarts.saturating_add(1);
            report.restarts_attempted += 1;
            match WorkerRunner::start(&entry.spec) {
                Ok(handle) => {
                    entry.handle = Some(handle);
                    entry.state = WorkerState::Running;
                    report.restarted += 1;
                    self.bus.publish(
                        Event::health(name.clone(), HealthOutcome::Restarted)
                            .with_attempt(entry.restarts),
                    );
                }
                Err(e) => {
                    self.bus.publish(
                        Event::new(EventKind::RestartFailed)
                            .with_worker(name.clone())
                            .with_reason(e.to_string())
                            .with_attempt(entry.restarts),
                    );
                }
            }
        }

        debug!(?report, "health check");
        report
    }

    /// Runs the health check every `period` until `stop` is cancelled.
    pub async fn serve(&mut self, stop: CancellationToken) {
        let mut ticker = time::interval(self.cfg.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; workers were just started.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    self.health_check_tick().await;
                }
            }
        }
    }

    /// Stops every worker, giving each `grace` to exit cooperatively.
    ///
    /// Blocks until every worker has reported its outcome.
    pub async fn shutdown(&mut self, grace: Duration) -> Result<(), RuntimeError> {
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_grace(grace));

        let mut set = JoinSet::new();
        for (name, entry) in self.workers.iter_mut() {
            entry.state = WorkerState::Stopped;
            if let Some(handle) = entry.handle.take() {
                let name = name.clone();
                set.spawn(async move { (name, WorkerRunner::stop(handle, grace).await) });
            }
        }

        let mut stuck = Vec::new();
        while let Some(joined) = set.join_next().await {
            let Ok((name, outcome)) = joined else {
                continue;
            };
            if outcome == StopOutcome::Forced {
                stuck.push(name.to_string());
            }
            self.bus.publish(
                Event::new(EventKind::WorkerStopped)
                    .with_worker(name)
                    .with_reason(outcome.as_str()),
            );
        }

        if stuck.is_empty() {
            self.bus
                .publish(Event::new(EventKind::AllStoppedWithin).with_grace(grace));
            return Ok(());
        }
        stuck.sort_unstable();
        self.bus.publish(
            Event::new(EventKind::GraceExceeded)
                .with_grace(grace)
                .with_reason(stuck.join(", ")),
        );
        Err(RuntimeError::GraceExceeded { grace, stuck })
    }

    /// Replaces the worker specs: stops everything, swaps the table, starts again.
    pub async fn reload(&mut self, specs: Vec<WorkerSpec>) {
        if let Err(e) = self.shutdown(self.cfg.grace).await {
            warn!(error = %e, "reload: previous workers did not stop cleanly");
        }
        self.install(specs);
        self.start_all();
        self.bus.publish(
            Event::new(EventKind::ConfigReloaded).with_reason(format!("{} workers", self.workers.len())),
        );
    }

    /// Delivers every pending event to the subscribers and stops the listener.
    pub async fn close(self) {
        self.closing.cancel();
        if let Ok(set) = self.listener.await {
            set.shutdown().await;
        }
    }
}

/// Forwards bus events to the subscriber set until `closing` fires, then
/// drains what is already queued.
async fn forward(
    mut rx: broadcast::Receiver<Event>,
    set: SubscriberSet,
    closing: CancellationToken,
) -> SubscriberSet {
    loop {
        tokio::select! {
            res = rx.recv() => match res {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event listener lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = closing.cancelled() => {
                loop {
                    match rx.try_recv() {
                        Ok(ev) => set.emit(&ev),
                        Err(TryRecvError::Lagged(_)) => continue,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }
    set
}

/// What the deployment cycle needs from the supervised workload.
#[async_trait]
pub trait Workload: Send {
    /// Starts every worker.
    async fn start_all(&mut self);

    /// Keeps the workers alive until `stop` is cancelled.
    async fn serve(&mut self, stop: CancellationToken);

    /// Stops every worker within `grace`.
    async fn shutdown(&mut self, grace: Duration) -> Result<(), RuntimeError>;

    /// Delivers the events still queued, then releases the workload.
    async fn close(self: Box<Self>);
}

#[async_trait]
impl Workload for Supervisor {
    async fn start_all(&mut self) {
        Supervisor::start_all(self);
    }

    async fn serve(&mut self, stop: CancellationToken) {
        Supervisor::serve(self, stop).await;
    }

    async fn shutdown(&mut self, grace: Duration) -> Result<(), RuntimeError> {
        Supervisor::shutdown(self, grace).await
    }

    async fn close(self: Box<Self>) {
        Supervisor::close(*self).await;
    }
}

/// Builds the workload of a loaded configuration.
pub trait WorkloadFactory: Send + Sync {
    fn build(&self, cfg: &Configuration) -> Box<dyn Workload>;
}
