//! Caller-side cancellation tokens.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Why a token fired.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// Someone called [`CancelToken::cancel`]
    #[error("cancelled")]
    Cancelled,
    /// The token's deadline passed
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellation token with an optional deadline.
///
/// Clones share the same cancellation state. Explicit cancellation takes
/// precedence over an elapsed deadline when both hold, so the reason reported
/// for a token never flips once it is explicitly cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: CancellationToken,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// Create a token that fires only when cancelled explicitly.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that also fires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            inner: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    /// Create a token that also fires `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Create a child token: it fires when the parent is cancelled, but
    /// cancelling the child leaves the parent untouched.
    pub fn child_token(&self) -> Self {
        Self {
            inner: self.inner.child_token(),
            deadline: self.deadline,
        }
    }

    /// Like [`child_token`](Self::child_token), with a deadline no later than `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            inner: self.inner.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    /// Signal cancellation to this token and all of its clones and children.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check: why the token has fired, or `None` if it has not.
    pub fn reason(&self) -> Option<CancelReason> {
        if self.inner.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Whether the token has fired for any reason.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Wait until the token fires.
    pub async fn cancelled(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.inner.cancelled() => CancelReason::Cancelled,
                    _ = sleep_until(deadline) => CancelReason::DeadlineExceeded,
                }
            }
            None => {
                self.inner.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }
}
