//! Error taxonomy
//!
//! Three families with different blast radii:
//!
//! - [`ActionError`] — a handler-level failure, surfaced to the peer as a
//!   `CallError` frame; the connection stays open.
//! - [`CallFailure`] — an outbound call that did not complete, surfaced to
//!   the local caller only, never to the wire.
//! - [`TransportError`] — the link itself failed.
//!
//! Frame parse errors live in [`crate::protocol::FrameError`]; illegal state
//! machine moves in [`crate::charge_point::TransitionRejected`] (those come
//! back as `Rejected` statuses inside successful CallResults, not as
//! protocol errors).

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Failure while handling an inbound Call. Each variant maps onto a wire
/// error code; none of them terminate the session.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action not implemented: {0}")]
    NotImplemented(String),

    #[error("action not supported: {0}")]
    NotSupported(String),

    #[error("formation violation: {0}")]
    FormationViolation(String),

    #[error("{0}")]
    Internal(String),
}

impl ActionError {
    /// The wire error code this failure is reported under.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::NotImplemented(_) => ErrorCode::NotImplemented,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::FormationViolation(_) => ErrorCode::FormationViolation,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

/// Why an outbound call did not produce a result payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallFailure {
    /// No reply before the per-call deadline; the pending entry is gone.
    #[error("call timed out")]
    Timeout,

    /// The connection went down while the call was pending.
    #[error("connection closed")]
    ConnectionClosed,

    /// The session was already closing when the call was attempted.
    #[error("session closed")]
    SessionClosed,

    /// The frame never made it onto the wire.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The peer answered with a CallError frame.
    #[error("peer error {code}: {description}")]
    CallError { code: String, description: String },

    /// The peer answered, but the payload did not match the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Transport-level failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("transport error: {0}")]
    Io(String),
}
