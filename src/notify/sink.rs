//! # Notification transport.
//!
//! The transport is a collaborator: camvisor only needs to post one message
//! with a title, a priority and a few tags. No acknowledgment is expected.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// Message priority, numbered like ntfy priorities (1 = min, 5 = max).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Min = 1,
    Low = 2,
    Default = 3,
    High = 4,
    Max = 5,
}

impl Priority {
    /// Numeric value sent on the wire.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Failure to hand a message to the transport.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("notification request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("notification server answered {status}")]
    Status { status: u16 },
}

/// Publishes human-readable messages to a topic.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn publish(
        &self,
        topic: &str,
        title: &str,
        priority: Priority,
        tags: &[&str],
        message: &str,
    ) -> Result<(), NotifyError>;
}

/// ntfy-compatible HTTP sink: `POST {base_url}/{topic}`.
#[derive(Debug, Clone)]
pub struct NtfySink {
    base_url: String,
    client: reqwest::Client,
}

impl NtfySink {
    /// Requests are abandoned after this long.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// Creates a sink posting to `base_url` (e.g. `https://ntfy.sh`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/{}", self.base_url, topic)
    }
}

#[async_trait]
impl NotificationSink for NtfySink {
    async fn publish(
        &self,
        topic: &str,
        title: &str,
        priority: Priority,
        tags: &[&str],
        message: &str,
    ) -> Result<(), NotifyError> {
        let mut req = self
            .client
            .post(self.topic_url(topic))
            .header("Title", title)
            .header("Priority", priority.to_string());
        if !tags.is_empty() {
            req = req.header("Tags", tags.join(","));
        }
        let resp = req.body(message.to_string()).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Status {
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }
}
