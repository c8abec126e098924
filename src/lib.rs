//! Slidegate - Precise Sliding-Window Rate Limiting
//!
//! This crate implements a rate limiter that bounds how many operations may be
//! admitted within any rolling time window. All window state is owned by a single
//! coordinator task; callers talk to it only through messages, so no lock ever
//! guards the admission history.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{LimiterError, Result};
pub use ratelimit::{CancelReason, CancelToken, CoordinatorState, Limiter};
