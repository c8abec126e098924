//! Sliding-window admission state.
//!
//! Owned by exactly one coordinator task; nothing here is synchronized.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use super::request::AdmissionRequest;

/// Slack added to expiry wakeups so the oldest timestamp has strictly left
/// the window by the time the coordinator looks again.
const EXPIRY_SLACK: Duration = Duration::from_millis(1);

/// Admission timestamps plus the queue of requests waiting for capacity.
#[derive(Debug)]
pub struct WindowState {
    max_count: usize,
    interval: Duration,
    /// Admission times, oldest first
    admitted: VecDeque<Instant>,
    /// Pending requests in arrival order
    waiting: VecDeque<AdmissionRequest>,
}

impl WindowState {
    /// Create an empty window.
    pub fn new(max_count: usize, interval: Duration) -> Self {
        Self {
            max_count,
            interval,
            admitted: VecDeque::with_capacity(max_count.min(1024)),
            waiting: VecDeque::new(),
        }
    }

    /// Drop timestamps older than the window. A timestamp stays active while
    /// its age is at most `interval`.
    ///
    /// Returns the number of timestamps removed.
    pub fn prune(&mut self, now: Instant) -> usize {
        let mut removed = 0;
        while let Some(&oldest) = self.admitted.front() {
            if now.saturating_duration_since(oldest) <= self.interval {
                break;
            }
            self.admitted.pop_front();
            removed += 1;
        }
        removed
    }

    /// Number of timestamps still inside the window (as of the last prune).
    pub fn active_count(&self) -> usize {
        self.admitted.len()
    }

    /// Whether one more admission fits in the window.
    pub fn has_capacity(&self) -> bool {
        self.admitted.len() < self.max_count
    }

    /// Charge one quota unit at `now`.
    pub fn record(&mut self, now: Instant) {
        debug_assert!(self.has_capacity(), "recorded admission over quota");
        self.admitted.push_back(now);
    }

    /// When a queued request could next be admitted, if one is blocked on quota.
    pub fn next_expiry(&self) -> Option<Instant> {
        if self.waiting.is_empty() || self.has_capacity() {
            return None;
        }
        // Windows too long to represent as an instant never expire
        self.admitted
            .front()
            .and_then(|&oldest| oldest.checked_add(self.interval.saturating_add(EXPIRY_SLACK)))
    }

    /// Append a request to the back of the waiting queue.
    pub fn enqueue(&mut self, request: AdmissionRequest) {
        self.waiting.push_back(request);
    }

    /// Take the oldest waiting request.
    pub fn pop_waiter(&mut self) -> Option<AdmissionRequest> {
        self.waiting.pop_front()
    }

    /// Number of queued requests, cancelled ones included.
    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    /// Whether no request is queued.
    pub fn is_queue_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Remove every queued request in arrival order.
    pub fn drain_waiting(&mut self) -> impl Iterator<Item = AdmissionRequest> + '_ {
        self.waiting.drain(..)
    }
}
