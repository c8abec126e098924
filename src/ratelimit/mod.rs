//! Rate limiting logic and state management.

mod coordinator;
mod limiter;
mod request;
mod token;
mod window;

pub use coordinator::CoordinatorState;
pub use limiter::Limiter;
pub use request::Reply;
pub use token::{CancelReason, CancelToken};
