//! The coordinator task: sole owner of the admission window.
//!
//! Callers never touch [`WindowState`] directly. They send an
//! [`AdmissionRequest`] over the request channel and wait for its reply; the
//! coordinator decides whether to admit, queue or reject it, and handles
//! shutdown by draining everything still outstanding.

use std::future::pending;

use tokio::sync::watch;
use tokio::time::{interval, sleep_until, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::request::{AdmissionRequest, Reply, RequestRx};
use super::window::WindowState;
use crate::config::LimiterConfig;

/// Lifecycle of the coordinator. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CoordinatorState {
    /// Serving admission requests
    Running,
    /// Failing outstanding and late requests before shutting down
    Draining,
    /// No longer serving; every request resolves to `Stopped`
    Terminated,
}

/// How requests are served while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Sliding-window accounting
    Windowed,
    /// Zero interval: admit everything not cancelled
    Unlimited,
    /// Non-positive quota: reject everything not cancelled
    NeverAdmit,
}

/// The single task that owns and mutates the admission window.
pub struct Coordinator {
    config: LimiterConfig,
    requests: RequestRx,
    stop: CancellationToken,
    state: watch::Sender<CoordinatorState>,
    window: WindowState,
}

impl Coordinator {
    /// Create a coordinator reading from `requests` until `stop` fires.
    pub fn new(
        config: LimiterConfig,
        requests: RequestRx,
        stop: CancellationToken,
        state: watch::Sender<CoordinatorState>,
    ) -> Self {
        let max_count = usize::try_from(config.max_count.max(0)).unwrap_or(usize::MAX);
        let window = WindowState::new(max_count, config.interval());
        Self {
            config,
            requests,
            stop,
            state,
            window,
        }
    }

    fn mode(&self) -> Mode {
        if !self.config.admits_anything() {
            Mode::NeverAdmit
        } else if self.config.interval().is_zero() {
            Mode::Unlimited
        } else {
            Mode::Windowed
        }
    }

    /// Run until stopped (or every limiter handle is dropped), then drain and terminate.
    pub async fn run(mut self) {
        let mode = self.mode();
        info!(
            max_count = self.config.max_count,
            interval = ?self.config.interval(),
            mode = ?mode,
            "Coordinator started"
        );

        match mode {
            Mode::Windowed => self.serve_window().await,
            Mode::Unlimited => self.serve_fixed(Reply::Admitted).await,
            Mode::NeverAdmit => self.serve_fixed(Reply::Rejected).await,
        }

        self.drain().await;
        self.state.send_replace(CoordinatorState::Terminated);
        info!("Coordinator terminated");
    }

    /// Serve every request with the same answer, no bookkeeping.
    async fn serve_fixed(&mut self, reply: Reply) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    debug!("Stop signal received");
                    return;
                }
                request = self.requests.recv() => match request {
                    Some(request) => request.respond_or_cancelled(reply),
                    None => {
                        debug!("All limiter handles dropped");
                        return;
                    }
                },
            }
        }
    }

    /// The sliding-window event loop.
    async fn serve_window(&mut self) {
        let mut cleanup = interval(self.config.cleanup_period());
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let now = Instant::now();
            self.window.prune(now);
            self.release_waiters(now);
            let expiry = self.window.next_expiry();

            tokio::select! {
                biased;
                _ = self.stop.cancelled() => {
                    debug!(waiting = self.window.waiting_len(), "Stop signal received");
                    return;
                }
                request = self.requests.recv() => match request {
                    Some(request) => self.handle_arrival(request),
                    None => {
                        debug!("All limiter handles dropped");
                        return;
                    }
                },
                _ = expiry_timer(expiry) => {
                    trace!("Oldest admission left the window");
                }
                _ = cleanup.tick() => {
                    trace!(active = self.window.active_count(), "Cleanup tick");
                }
            }
        }
    }

    /// Decide on a request that just arrived.
    ///
    /// Queued requests have priority: a new arrival is admitted directly only
    /// when nobody is waiting.
    fn handle_arrival(&mut self, request: AdmissionRequest) {
        if let Some(reason) = request.cancel_reason() {
            trace!(reason = %reason, "Request cancelled on arrival");
            let _ = request.respond(Reply::Cancelled(reason));
            return;
        }

        let now = Instant::now();
        self.window.prune(now);

        if self.window.is_queue_empty() && self.window.has_capacity() {
            self.admit(request, now);
        } else {
            self.window.enqueue(request);
            debug!(
                active = self.window.active_count(),
                waiting = self.window.waiting_len(),
                "Quota exhausted, request queued"
            );
        }
    }

    /// Hand freed capacity to queued requests, oldest first.
    fn release_waiters(&mut self, now: Instant) {
        while self.window.has_capacity() {
            let request = match self.window.pop_waiter() {
                Some(request) => request,
                None => break,
            };

            // Check before touching the accounting state
            if let Some(reason) = request.cancel_reason() {
                trace!(reason = %reason, "Queued request cancelled");
                let _ = request.respond(Reply::Cancelled(reason));
                continue;
            }

            self.admit(request, now);
        }
    }

    /// Admit a request, charging quota only if the caller received the reply.
    fn admit(&mut self, request: AdmissionRequest, now: Instant) {
        if request.respond(Reply::Admitted) {
            self.window.record(now);
            trace!(active = self.window.active_count(), "Request admitted");
        } else {
            trace!("Caller gave up before admission");
        }
    }

    /// Fail everything queued, keep answering late arrivals until the channel
    /// stays quiet for the drain idle window, then stop serving.
    async fn drain(&mut self) {
        self.state.send_replace(CoordinatorState::Draining);

        let pending_count = self.window.waiting_len();
        for request in self.window.drain_waiting() {
            request.respond_or_cancelled(Reply::Stopped);
        }
        info!(pending = pending_count, "Draining limiter");

        let idle = self.config.drain_idle();
        let mut late = 0usize;
        while let Ok(Some(request)) = timeout(idle, self.requests.recv()).await {
            request.respond_or_cancelled(Reply::Stopped);
            late += 1;
        }

        // Anything that raced into the buffer after the idle window still gets an answer.
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            request.respond_or_cancelled(Reply::Stopped);
            late += 1;
        }

        debug!(late = late, "Drain complete");
    }
}

/// Resolves at `deadline`, or never if there is none.
async fn expiry_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}
