//! Request-scoped cooperative cancellation.
//!
//! Every component that suspends (LLM calls, Redis, upstream HTTP) takes a
//! [`CancelToken`] and checks it before each suspension, after the suspension
//! returns, and before committing a cache write. In-flight HTTP calls race
//! against [`CancelToken::cancelled`] so they abort instead of running to
//! completion. Cancellation is idempotent.

use crate::error::{Error, Result};

/// A cancellation token checked at suspension points.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: tokio_util::sync::CancellationToken,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Resolve when cancellation is requested. Used to race in-flight I/O:
    /// `tokio::select! { res = fut => .., _ = cancel.cancelled() => .. }`.
    pub async fn cancelled(&self) {
        self.inner.cancelled().await;
    }

    /// Return `Err(Cancelled)` when the token has been cancelled.
    ///
    /// The standard guard at suspension points:
    /// `cancel.ensure_active()?;`
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
