//! Notifications: best-effort, fire-and-forget status messages to a pub/sub topic.
//!
//! - [`NotificationSink`] the transport seam (`publish(topic, title, priority, tags, message)`)
//! - [`NtfySink`] HTTP implementation for ntfy-compatible servers
//! - [`Notifier`] what the rest of the crate holds: sink + device topic + severity mapping
//!   + suppression of repeated messages
//! - [`ErrorLayer`] tracing layer sending `ERROR` log events through a [`Notifier`]

mod layer;
pub(crate) mod notifier;
mod sink;

pub use layer::{ErrorLayer, NOTIFIED_FIELD};
pub use notifier::{Notifier, Severity};
pub use sink::{NotificationSink, NotifyError, NtfySink, Priority};
