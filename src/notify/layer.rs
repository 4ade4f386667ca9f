//! # Tracing layer mirroring ERROR events to the [`Notifier`].
//!
//! ```text
//! error!(..) ──► ErrorLayer::on_event ──try_send──► [bounded queue] ──► forwarder task ──► Notifier::error
//! ```
//!
//! ## Rules
//! - Only `ERROR` events are forwarded; the title is the event's `label` field, else its target.
//! - Events carrying `notified = true` were already sent by their emitter and are skipped.
//! - `on_event` never blocks: when the queue is full the event is dropped.
//! - The forwarder task ends once the layer (and so the subscriber) is dropped.

use std::fmt::{self, Write as _};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use super::notifier::Notifier;

/// Field marking an event whose condition was already notified.
pub const NOTIFIED_FIELD: &str = "notified";

const QUEUE_CAPACITY: usize = 64;

/// Forwards `ERROR` events to a [`Notifier`] from a spawned task.
pub struct ErrorLayer {
    tx: mpsc::Sender<(String, String)>,
}

impl ErrorLayer {
    /// Builds the layer and spawns its forwarder on the current runtime.
    pub fn new(notifier: Notifier) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(String, String)>(QUEUE_CAPACITY);
        let forwarder = tokio::spawn(async move {
            while let Some((title, message)) = rx.recv().await {
                notifier.error(&title, &message).await;
            }
        });
        (Self { tx }, forwarder)
    }
}

impl<S: Subscriber> Layer<S> for ErrorLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() != Level::ERROR {
            return;
        }
        let mut fields = ErrorFields::default();
        event.record(&mut fields);
        if fields.notified {
            return;
        }
        let title = fields
            .label
            .take()
            .unwrap_or_else(|| event.metadata().target().to_string());
        let _ = self.tx.try_send((title, fields.message));
    }
}

/// `message` first, then the remaining fields as `key=value`.
#[derive(Default)]
struct ErrorFields {
    message: String,
    label: Option<String>,
    notified: bool,
}

impl ErrorFields {
    fn push(&mut self, field: &Field, value: fmt::Arguments<'_>) {
        match field.name() {
            "message" if self.message.is_empty() => {
                let _ = self.message.write_fmt(value);
            }
            "message" => {
                let rest = std::mem::take(&mut self.message);
                let _ = self.message.write_fmt(value);
                self.message.push(' ');
                self.message.push_str(&rest);
            }
            "label" => self.label = Some(value.to_string()),
            name => {
                if !self.message.is_empty() {
                    self.message.push(' ');
                }
                let _ = write!(self.message, "{name}={value}");
            }
        }
    }
}

impl Visit for ErrorFields {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == NOTIFIED_FIELD {
            self.notified = value;
        } else {
            self.push(field, format_args!("{value}"));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, format_args!("{value}"));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, format_args!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::notifier::tests::RecordingSink;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn test_only_unnotified_errors_are_forwarded() {
        let sink = Arc::new(RecordingSink::default());
        let (layer, forwarder) = ErrorLayer::new(Notifier::new(sink.clone(), "cam-07"));

        tracing::subscriber::with_default(tracing_subscriber::registry().with(layer), || {
            tracing::warn!("just a warning");
            tracing::error!(label = "config_invalid", path = "/etc/cfg.toml", "changed configuration is unusable");
            tracing::error!(notified = true, worker = "capture", "worker dead");
            tracing::error!(target: "camvisor::signals", "signal handling failed");
        });
        forwarder.await.unwrap();

        let sent = sink.sent.lock().unwrap();
        let got: Vec<(&str, &str)> = sent.iter().map(|m| (m.1.as_str(), m.4.as_str())).collect();
        assert_eq!(
            got,
            vec![
                ("config_invalid", "changed configuration is unusable path=/etc/cfg.toml"),
                ("camvisor::signals", "signal handling failed"),
            ]
        );
    }
}
