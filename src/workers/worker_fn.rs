//! # Function-backed worker (`WorkerFn`)
//!
//! [`WorkerFn`] wraps a closure `F: Fn(CancellationToken, toml::Table) -> Fut`,
//! producing a fresh future per tick. The section is passed by value so the
//! future owns everything it touches; share state explicitly with `Arc<...>`.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use camvisor::{WorkerFn, WorkerRef, WorkerError};
//!
//! let w: WorkerRef = WorkerFn::arc("noop", |_ctx: CancellationToken, _section: toml::Table| async {
//!     Ok::<_, WorkerError>(())
//! });
//! assert_eq!(w.kind(), "noop");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;
use crate::workers::worker::Worker;

/// Function-backed worker implementation.
pub struct WorkerFn<F> {
    kind: Cow<'static, str>,
    f: F,
}

impl<F> WorkerFn<F> {
    pub fn new(kind: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            kind: kind.into(),
            f,
        }
    }

    /// Creates the worker and returns it as a shared handle.
    pub fn arc(kind: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(kind, f))
    }
}

#[async_trait]
impl<F, Fut> Worker for WorkerFn<F>
where
    F: Fn(CancellationToken, toml::Table) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    fn kind(&self) -> &str {
        &self.kind
    }

    async fn tick(&self, ctx: CancellationToken, section: &toml::Table) -> Result<(), WorkerError> {
        (self.f)(ctx, section.clone()).await
    }
}
