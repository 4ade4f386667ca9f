//! # NotifyWriter: health events to the device topic
//!
//! Forwards the events a remote human should know about:
//! - `WorkerDead`, `RestartFailed`, `GraceExceeded` → error
//! - `WorkerRestarted` → warning
//!
//! Everything else stays in the local log.

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::notify::{Notifier, Severity};
use crate::subscribers::Subscribe;

/// Subscriber publishing selected events through a [`Notifier`].
pub struct NotifyWriter {
    notifier: Notifier,
}

impl NotifyWriter {
    #[must_use]
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl Subscribe for NotifyWriter {
    async fn on_event(&self, e: &Event) {
        let severity = match e.kind {
            EventKind::WorkerDead | EventKind::RestartFailed | EventKind::GraceExceeded => {
                Severity::Error
            }
            EventKind::WorkerRestarted => Severity::Warning,
            _ => return,
        };
        let title = e.worker.as_deref().unwrap_or("supervisor");
        let outcome = e
            .outcome
            .map(|o| o.to_string())
            .unwrap_or_else(|| "error".to_string());
        let message = match e.reason.as_deref() {
            Some(reason) => format!("{outcome}: {reason}"),
            None => outcome,
        };
        self.notifier.notify(severity, title, &message).await;
    }

    fn name(&self) -> &'static str {
        "notify"
    }

    fn queue_capacity(&self) -> usize {
        256
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::HealthOutcome;
    use crate::notify::notifier::tests::RecordingSink;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_only_failures_and_restarts_are_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let writer = NotifyWriter::new(Notifier::new(sink.clone(), "cam"));

        writer
            .on_event(&Event::health("upload", HealthOutcome::Alive))
            .await;
        writer
            .on_event(&Event::health("upload", HealthOutcome::Dead).with_reason("ftp timeout"))
            .await;
        writer
            .on_event(&Event::health("upload", HealthOutcome::Restarted))
            .await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, "upload");
        assert_eq!(sent[0].4, "dead: ftp timeout");
        assert_eq!(sent[1].4, "restarted");
    }
}
