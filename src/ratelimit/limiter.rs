//! Caller-facing limiter handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::coordinator::{Coordinator, CoordinatorState};
use super::request::{AdmissionRequest, RequestTx};
use super::token::CancelToken;
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};

/// A precise sliding-window rate limiter.
///
/// At most `max_count` calls to [`acquire`](Self::acquire) succeed within any
/// window of length `interval`. Callers that find the window full wait in
/// arrival order until capacity frees up, their token fires, or the limiter is
/// stopped.
///
/// The limiter is meant to be shared, usually behind an `Arc`. All window state
/// lives in a coordinator task spawned on construction.
pub struct Limiter {
    config: LimiterConfig,
    requests: RequestTx,
    stop: CancellationToken,
    stop_called: AtomicBool,
    state: watch::Receiver<CoordinatorState>,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Limiter {
    /// Create a limiter admitting `max_count` calls per `interval`.
    ///
    /// A non-positive `max_count` never admits anything; a zero `interval`
    /// admits everything.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(max_count: i64, interval: Duration) -> Self {
        Self::with_config(LimiterConfig::new(max_count, interval))
    }

    /// Create a limiter from a full configuration.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn with_config(config: LimiterConfig) -> Self {
        let (requests, requests_rx) = mpsc::channel(config.request_buffer.max(1));
        let stop = CancellationToken::new();
        let (state_tx, state) = watch::channel(CoordinatorState::Running);

        let coordinator = Coordinator::new(config.clone(), requests_rx, stop.clone(), state_tx);
        tokio::spawn(coordinator.run());

        debug!(
            max_count = config.max_count,
            interval = ?config.interval(),
            "Limiter created"
        );

        Self {
            config,
            requests,
            stop,
            stop_called: AtomicBool::new(false),
            state,
        }
    }

    /// Create a limiter, rejecting configurations that could never admit.
    pub fn try_new(config: LimiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Wait for one quota unit.
    ///
    /// Returns `Ok(())` once admitted. Fails with
    /// [`LimiterError::Cancelled`] if `token` fires first (no quota is
    /// consumed), with [`LimiterError::Stopped`] if the limiter is or becomes
    /// stopped, and with [`LimiterError::InvalidConfig`] if the limiter can
    /// never admit. An admission, once made, is returned even if `token`
    /// fires immediately afterwards.
    pub async fn acquire(&self, token: &CancelToken) -> Result<()> {
        if let Some(reason) = token.reason() {
            return Err(LimiterError::Cancelled(reason));
        }
        if self.stop.is_cancelled() {
            return Err(LimiterError::Stopped);
        }

        let (request, mut reply) = AdmissionRequest::new(token.clone());

        tokio::select! {
            biased;
            sent = self.requests.send(request) => {
                if sent.is_err() {
                    // Coordinator already terminated
                    return Err(LimiterError::Stopped);
                }
            }
            reason = token.cancelled() => return Err(LimiterError::Cancelled(reason)),
            _ = self.stop.cancelled() => return Err(LimiterError::Stopped),
        }

        tokio::select! {
            biased;
            outcome = &mut reply => match outcome {
                Ok(reply) => reply.into_result(self.config.max_count),
                // Dropped unanswered while the coordinator shut down
                Err(_) => Err(LimiterError::Stopped),
            },
            reason = token.cancelled() => {
                // Closing the slot makes any later admission attempt fail, so
                // the coordinator will not charge quota for this request. A
                // reply that made it in before the close is final.
                reply.close();
                match reply.try_recv() {
                    Ok(reply) => reply.into_result(self.config.max_count),
                    Err(_) => {
                        trace!(reason = %reason, "Acquire cancelled while waiting");
                        Err(LimiterError::Cancelled(reason))
                    }
                }
            }
        }
    }

    /// Stop the limiter.
    ///
    /// Pending and future [`acquire`](Self::acquire) calls resolve to
    /// [`LimiterError::Stopped`] (or `Cancelled` if their token already fired),
    /// and the coordinator terminates once no request has arrived for the
    /// drain idle window.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn stop(&self) {
        if self.stop_called.swap(true, Ordering::SeqCst) {
            panic!("Limiter::stop called more than once");
        }
        info!("Stopping limiter");
        self.stop.cancel();
    }

    /// Current coordinator lifecycle state.
    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// Wait until the coordinator has terminated.
    pub async fn terminated(&self) {
        let mut state = self.state.clone();
        // An error means the coordinator is gone, which is terminated too
        let _ = state
            .wait_for(|state| *state == CoordinatorState::Terminated)
            .await;
    }

    /// The limiter's configuration.
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }
}
