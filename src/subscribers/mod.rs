//! # Event subscribers for the camvisor runtime.
//!
//! ## Architecture
//! ```text
//! Supervisor ── publish(Event) ──► Bus ──► listener ──► SubscriberSet::emit
//!                                                          │
//!                                               ┌──────────┴──────────┐
//!                                               ▼                     ▼
//!                                           LogWriter            NotifyWriter
//!                                        (tracing line)     (NotificationSink)
//! ```
//!
//! - [`Subscribe`] the extension trait
//! - [`SubscriberSet`] non-blocking fan-out with per-subscriber queues
//! - [`LogWriter`] turns events into structured `tracing` records
//! - [`NotifyWriter`] forwards failures and restarts to the device's notification topic

mod log;
mod notify;
mod subscriber;
mod subscriber_set;

pub use log::LogWriter;
pub use notify::NotifyWriter;
pub use subscriber::Subscribe;
pub use subscriber_set::SubscriberSet;
