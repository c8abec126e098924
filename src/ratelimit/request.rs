//! Messages exchanged between callers and the coordinator.

use tokio::sync::{mpsc, oneshot};

use super::token::{CancelReason, CancelToken};
use crate::error::LimiterError;

/// The coordinator's single answer to an admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// One quota unit was consumed for this caller
    Admitted,
    /// The caller's token had fired when the coordinator looked at it
    Cancelled(CancelReason),
    /// The limiter is shutting down
    Stopped,
    /// The limiter is configured to never admit
    Rejected,
}

impl Reply {
    /// Convert the reply into the caller-facing result.
    pub fn into_result(self, max_count: i64) -> crate::error::Result<()> {
        match self {
            Reply::Admitted => Ok(()),
            Reply::Cancelled(reason) => Err(LimiterError::Cancelled(reason)),
            Reply::Stopped => Err(LimiterError::Stopped),
            Reply::Rejected => Err(LimiterError::InvalidConfig(format!(
                "max_count must be positive, got {}",
                max_count
            ))),
        }
    }
}

/// A single-use request for one quota unit.
#[derive(Debug)]
pub struct AdmissionRequest {
    /// The caller's cancellation token
    pub token: CancelToken,
    /// Where the coordinator sends its answer
    reply: oneshot::Sender<Reply>,
}

impl AdmissionRequest {
    /// Create a request along with the receiver the caller waits on.
    pub fn new(token: CancelToken) -> (Self, oneshot::Receiver<Reply>) {
        let (reply, rx) = oneshot::channel();
        (Self { token, reply }, rx)
    }

    /// Whether the caller's token has fired or the caller stopped listening.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.token.reason().or_else(|| {
            if self.reply.is_closed() {
                Some(CancelReason::Cancelled)
            } else {
                None
            }
        })
    }

    /// Deliver the reply, consuming the request.
    ///
    /// Returns `false` if the caller already gave up on it, in which case the
    /// reply was never observed.
    pub fn respond(self, reply: Reply) -> bool {
        self.reply.send(reply).is_ok()
    }

    /// Reply `Cancelled` if the token has fired, otherwise `fallback`.
    pub fn respond_or_cancelled(self, fallback: Reply) {
        let reply = match self.token.reason() {
            Some(reason) => Reply::Cancelled(reason),
            None => fallback,
        };
        let _ = self.respond(reply); // Caller may have gone away
    }
}

pub type RequestTx = mpsc::Sender<AdmissionRequest>;
pub type RequestRx = mpsc::Receiver<AdmissionRequest>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respond_delivers_once() {
        let (request, mut rx) = AdmissionRequest::new(CancelToken::new());
        assert!(request.respond(Reply::Admitted));
        assert_eq!(rx.try_recv().unwrap(), Reply::Admitted);
    }

    #[test]
    fn test_respond_to_closed_receiver() {
        let (request, mut rx) = AdmissionRequest::new(CancelToken::new());
        rx.close();
        assert_eq!(request.cancel_reason(), Some(CancelReason::Cancelled));
        assert!(!request.respond(Reply::Admitted));
    }

    #[test]
    fn test_respond_or_cancelled_prefers_token() {
        let token = CancelToken::new();
        token.cancel();
        let (request, mut rx) = AdmissionRequest::new(token);
        request.respond_or_cancelled(Reply::Stopped);
        assert_eq!(
            rx.try_recv().unwrap(),
            Reply::Cancelled(CancelReason::Cancelled)
        );

        let (request, mut rx) = AdmissionRequest::new(CancelToken::new());
        request.respond_or_cancelled(Reply::Stopped);
        assert_eq!(rx.try_recv().unwrap(), Reply::Stopped);
    }

    #[test]
    fn test_reply_into_result() {
        assert!(Reply::Admitted.into_result(1).is_ok());
        assert!(Reply::Stopped.into_result(1).unwrap_err().is_stopped());
        assert_eq!(
            Reply::Cancelled(CancelReason::DeadlineExceeded)
                .into_result(1)
                .unwrap_err()
                .cancel_reason(),
            Some(CancelReason::DeadlineExceeded)
        );
        assert!(matches!(
            Reply::Rejected.into_result(0),
            Err(LimiterError::InvalidConfig(_))
        ));
    }
}
