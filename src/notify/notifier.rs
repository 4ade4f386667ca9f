//! # Notifier: the device's handle on its notification topic.
//!
//! Wraps a [`NotificationSink`] with the topic derived from the device identity
//! and maps a [`Severity`] to a priority and a tag:
//!
//! | severity   | priority  | tag                    |
//! |------------|-----------|------------------------|
//! | `Info`     | `Default` | `artificial_satellite` |
//! | `Warning`  | `High`    | `warning`              |
//! | `Error`    | `High`    | `broken_heart`         |
//! | `Critical` | `Max`     | `fire`                 |
//!
//! ## Rules
//! - Publishing never fails from the caller's point of view; transport errors are logged at debug.
//! - The same message repeated under the same title is sent once until the message changes.
//! - A disabled notifier (no notification settings) drops everything.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use super::sink::{NotificationSink, Priority};

/// How bad a notified condition is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    fn priority(self) -> Priority {
        match self {
            Severity::Info => Priority::Default,
            Severity::Warning | Severity::Error => Priority::High,
            Severity::Critical => Priority::Max,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Severity::Info => "artificial_satellite",
            Severity::Warning => "warning",
            Severity::Error => "broken_heart",
            Severity::Critical => "fire",
        }
    }
}

struct Inner {
    sink: Arc<dyn NotificationSink>,
    topic: String,
    last: Mutex<HashMap<String, String>>,
}

/// Cloneable, best-effort publisher bound to one topic.
#[derive(Clone, Default)]
pub struct Notifier {
    inner: Option<Arc<Inner>>,
}

impl Notifier {
    /// Creates a notifier publishing to `topic` through `sink`.
    pub fn new(sink: Arc<dyn NotificationSink>, topic: impl Into<String>) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                sink,
                topic: topic.into(),
                last: Mutex::new(HashMap::new()),
            })),
        }
    }

    /// A notifier that drops every message.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Returns true if messages are actually sent somewhere.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns the topic, if enabled.
    pub fn topic(&self) -> Option<&str> {
        self.inner.as_deref().map(|i| i.topic.as_str())
    }

    pub async fn info(&self, title: &str, message: &str) {
        self.notify(Severity::Info, title, message).await;
    }

    pub async fn warn(&self, title: &str, message: &str) {
        self.notify(Severity::Warning, title, message).await;
    }

    pub async fn error(&self, title: &str, message: &str) {
        self.notify(Severity::Error, title, message).await;
    }

    pub async fn critical(&self, title: &str, message: &str) {
        self.notify(Severity::Critical, title, message).await;
    }

    /// Publishes `message` under `title`, unless it repeats the last message for that title.
    pub async fn notify(&self, severity: Severity, title: &str, message: &str) {
        let Some(inner) = self.inner.as_deref() else {
            return;
        };
        if !inner.is_new(title, message) {
            return;
        }
        let tags = [severity.tag()];
        if let Err(e) = inner
            .sink
            .publish(&inner.topic, title, severity.priority(), &tags, message)
            .await
        {
            debug!(title, error = %e, "notification dropped");
        }
    }
}

impl Inner {
    fn is_new(&self, title: &str, message: &str) -> bool {
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        match last.get(title) {
            Some(prev) if prev == message => false,
            _ => {
                last.insert(title.to_string(), message.to_string());
                true
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::notify::NotifyError;
    use async_trait::async_trait;

    /// Sink recording every published message.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) sent: Mutex<Vec<(String, String, Priority, Vec<String>, String)>>,
    }

    impl RecordingSink {
        pub(crate) fn titles(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|m| m.1.clone()).collect()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn publish(
            &self,
            topic: &str,
            title: &str,
            priority: Priority,
            tags: &[&str],
            message: &str,
        ) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push((
                topic.to_string(),
                title.to_string(),
                priority,
                tags.iter().map(|t| t.to_string()).collect(),
                message.to_string(),
            ));
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn publish(
            &self,
            _topic: &str,
            _title: &str,
            _priority: Priority,
            _tags: &[&str],
            _message: &str,
        ) -> Result<(), NotifyError> {
            Err(NotifyError::Status { status: 503 })
        }
    }

    #[tokio::test]
    async fn test_severity_maps_priority_and_tag() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "cam-07");

        notifier.critical("deploy", "self-test failed").await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "cam-07");
        assert_eq!(sent[0].2, Priority::Max);
        assert_eq!(sent[0].3, vec!["fire".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_message_is_suppressed() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone(), "cam");

        notifier.error("upload", "ftp timeout").await;
        notifier.error("upload", "ftp timeout").await;
        notifier.error("upload", "disk full").await;
        notifier.error("capture", "ftp timeout").await;

        assert_eq!(sink.sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed() {
        let notifier = Notifier::new(Arc::new(FailingSink), "cam");
        notifier.error("upload", "boom").await;
    }

    #[tokio::test]
    async fn test_disabled_drops_everything() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        assert_eq!(notifier.topic(), None);
        notifier.error("x", "y").await;
    }
}
