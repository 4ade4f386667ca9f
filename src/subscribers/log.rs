//! # LogWriter: events as tracing records
//!
//! ## Example output
//! ```text
//! INFO  worker started worker="capture"
//! ERROR worker dead worker="upload" reason="execution failed: ftp timeout" notified=true
//! WARN  worker restarted worker="upload" attempt=1
//! WARN  restart failed worker="upload" attempt=2 reason="..."
//! INFO  worker stopped worker="capture" how="cooperative"
//! ERROR grace exceeded stuck="capture" notified=true
//! ```
//!
//! `notified` marks the records [`NotifyWriter`](crate::NotifyWriter) already
//! reports, so the error layer does not send them twice.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let worker = e.worker_name();
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::WorkerStarted => info!(worker, "worker started"),
            EventKind::WorkerDead => error!(worker, reason, notified = true, "worker dead"),
            EventKind::WorkerRestarted => {
                warn!(worker, attempt = e.attempt.unwrap_or(0), "worker restarted")
            }
            EventKind::RestartFailed => warn!(
                worker,
                attempt = e.attempt.unwrap_or(0),
                reason,
                "restart failed"
            ),
            EventKind::WorkerStopped => info!(worker, how = reason, "worker stopped"),
            EventKind::ShutdownRequested => info!(reason, "shutdown requested"),
            EventKind::AllStoppedWithin => {
                info!(grace_ms = e.grace_ms.unwrap_or(0), "all workers stopped")
            }
            EventKind::GraceExceeded => error!(stuck = reason, notified = true, "grace exceeded"),
            EventKind::ConfigReloaded => info!(reason, "configuration reloaded"),
            EventKind::SubscriberOverflow => warn!(subscriber = worker, reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => {
                error!(subscriber = worker, info = reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
