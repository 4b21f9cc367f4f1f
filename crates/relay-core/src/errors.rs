//! Error hierarchy for the relay.
//!
//! - [`StoreError`]: session registry failures (missing, expired, backend down)
//! - [`BusError`]: shared channel failures
//! - [`HandshakeError`]: always fatal to the connection that caused it
//! - [`RelayError`]: top-level enum for anything crossing crate boundaries
//!
//! A routing miss (no opposite-role subscriber) is deliberately not an error.

use thiserror::Error;

use crate::protocol::CloseReason;
use crate::retry::Retryable;
use crate::role::Role;

/// Session registry errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No session with this id.
    #[error("session not found: {0}")]
    NotFound(String),
    /// The session exists but its TTL has elapsed.
    #[error("session expired: {0}")]
    Expired(String),
    /// The backing store could not be reached.
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// `NotFound` and `Expired` are indistinguishable to callers.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Expired(_))
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Shared channel errors.
#[derive(Debug, Error)]
pub enum BusError {
    /// The pub/sub backend could not be reached.
    #[error("message bus unavailable: {0}")]
    Unavailable(String),
    /// An event could not be serialized.
    #[error("failed to encode bus event: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Retryable for BusError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Reasons a handshake is refused. Never retried server-side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The first frame was not a `hello`.
    #[error("first message must be hello")]
    NotHello,
    /// A `hello` with missing or mistyped fields.
    #[error("malformed hello: {0}")]
    Malformed(String),
    /// Role other than `workstation` / `phone`.
    #[error("invalid role: {0}")]
    InvalidRole(String),
    /// Unknown or expired session id.
    #[error("unknown session")]
    UnknownSession,
    /// Token does not match the session.
    #[error("invalid token")]
    BadToken,
    /// Role already joined and the conflict policy rejects newcomers.
    #[error("role already joined: {0}")]
    RoleOccupied(Role),
    /// No handshake within the allowed window.
    #[error("handshake timed out")]
    Timeout,
    /// Registry or bus outage while validating.
    #[error("{0}")]
    Unavailable(String),
}

impl HandshakeError {
    /// Close reason sent to the client.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Unavailable(_) => CloseReason::Unavailable,
            _ => CloseReason::HandshakeFailed,
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NotHello => "not_hello",
            Self::Malformed(_) => "malformed",
            Self::InvalidRole(_) => "invalid_role",
            Self::UnknownSession => "unknown_session",
            Self::BadToken => "bad_token",
            Self::RoleOccupied(_) => "role_occupied",
            Self::Timeout => "timeout",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl From<StoreError> for HandshakeError {
    fn from(err: StoreError) -> Self {
        if err.is_missing() {
            Self::UnknownSession
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

impl From<BusError> for HandshakeError {
    fn from(err: BusError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Top-level relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Registry error.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Bus error.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// Handshake refused.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

impl RelayError {
    /// Whether this is a missing/expired session.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_missing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_covers_not_found_and_expired() {
        assert!(StoreError::NotFound("a".into()).is_missing());
        assert!(StoreError::Expired("a".into()).is_missing());
        assert!(!StoreError::Unavailable("down".into()).is_missing());
    }

    #[test]
    fn only_outages_are_retryable() {
        assert!(StoreError::Unavailable("down".into()).is_retryable());
        assert!(!StoreError::NotFound("a".into()).is_retryable());
        assert!(BusError::Unavailable("down".into()).is_retryable());
        let encode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!BusError::Encode(encode).is_retryable());
    }

    #[test]
    fn expired_session_handshake_is_unknown_session() {
        let err: HandshakeError = StoreError::Expired("s".into()).into();
        assert_eq!(err, HandshakeError::UnknownSession);
        let err: HandshakeError = StoreError::NotFound("s".into()).into();
        assert_eq!(err, HandshakeError::UnknownSession);
    }

    #[test]
    fn store_outage_handshake_closes_as_unavailable() {
        let err: HandshakeError = StoreError::Unavailable("refused".into()).into();
        assert_matches!(err, HandshakeError::Unavailable(ref m) if m.contains("refused"));
        assert_eq!(err.close_reason(), CloseReason::Unavailable);
    }

    #[test]
    fn credential_failures_close_as_handshake_failed() {
        for err in [
            HandshakeError::NotHello,
            HandshakeError::BadToken,
            HandshakeError::UnknownSession,
            HandshakeError::Timeout,
            HandshakeError::RoleOccupied(Role::Phone),
        ] {
            assert_eq!(err.close_reason(), CloseReason::HandshakeFailed);
        }
    }

    #[test]
    fn relay_error_wraps_store_errors() {
        let err: RelayError = StoreError::NotFound("x".into()).into();
        assert!(err.is_missing());
        assert_eq!(err.to_string(), "session not found: x");
    }

    #[test]
    fn labels_are_snake_case() {
        assert_eq!(HandshakeError::BadToken.label(), "bad_token");
        assert_eq!(HandshakeError::RoleOccupied(Role::Phone).label(), "role_occupied");
    }
}
