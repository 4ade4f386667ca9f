//! # Runtime events emitted by the supervisor.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Health events**: worker liveness as observed by the health check (started, dead, restarted)
//! - **Shutdown events**: stop requests and their outcome
//! - **Subscriber events**: delivery problems inside the fan-out
//!
//! A *health event* is an [`Event`] carrying a [`HealthOutcome`]. Health events
//! are ephemeral: they go out on the bus, are consumed by subscribers (logging,
//! notifications) and are never persisted.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use camvisor::{Event, EventKind, HealthOutcome};
//!
//! let ev = Event::health("upload", HealthOutcome::Dead).with_reason("exit: boom");
//!
//! assert_eq!(ev.kind, EventKind::WorkerDead);
//! assert_eq!(ev.worker.as_deref(), Some("upload"));
//! assert_eq!(ev.outcome, Some(HealthOutcome::Dead));
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Health events ===
    /// Worker was started by `start_all` (outcome `Alive`).
    WorkerStarted,

    /// Health check found a running worker dead (outcome `Dead`).
    ///
    /// Sets `worker`, `reason` (exit cause when known).
    WorkerDead,

    /// A failed worker was restarted (outcome `Restarted`).
    ///
    /// Sets `worker`, `attempt` (cumulative restarts for this worker).
    WorkerRestarted,

    /// A start or restart attempt failed; the worker stays failed.
    ///
    /// Sets `worker`, `reason`, `attempt`.
    RestartFailed,

    /// Worker exited after a stop request.
    ///
    /// Sets `worker`, `reason` (`cooperative` or `forced`).
    WorkerStopped,

    // === Shutdown / reload events ===
    /// Shutdown requested (deadline reached or OS signal observed).
    ShutdownRequested,

    /// All workers stopped cooperatively within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some workers were aborted.
    ///
    /// Sets `reason` (names of the stuck workers).
    GraceExceeded,

    /// Worker specs were replaced after a configuration change.
    ConfigReloaded,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    SubscriberPanicked,
}

/// Liveness outcome carried by health events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    /// Worker is running.
    Alive,
    /// Worker was found dead.
    Dead,
    /// Worker was restarted after being found dead.
    Restarted,
}

impl fmt::Display for HealthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthOutcome::Alive => "alive",
            HealthOutcome::Dead => "dead",
            HealthOutcome::Restarted => "restarted",
        })
    }
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Name of the worker, if applicable.
    pub worker: Option<Arc<str>>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Health outcome, set on health events only.
    pub outcome: Option<HealthOutcome>,
    /// Cumulative restart attempt count.
    pub attempt: Option<u32>,
    /// Grace period in milliseconds (shutdown events).
    pub grace_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            reason: None,
            outcome: None,
            attempt: None,
            grace_ms: None,
        }
    }

    /// Creates a health event for `worker`.
    pub fn health(worker: impl Into<Arc<str>>, outcome: HealthOutcome) -> Self {
        let kind = match outcome {
            HealthOutcome::Alive => EventKind::WorkerStarted,
            HealthOutcome::Dead => EventKind::WorkerDead,
            HealthOutcome::Restarted => EventKind::WorkerRestarted,
        };
        let mut ev = Event::new(kind).with_worker(worker);
        ev.outcome = Some(outcome);
        ev
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a worker name.
    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a grace duration (stored as milliseconds).
    #[inline]
    pub fn with_grace(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.grace_ms = Some(ms);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }

    /// Returns the worker name or `"-"`.
    pub fn worker_name(&self) -> &str {
        self.worker.as_deref().unwrap_or("-")
    }
}
