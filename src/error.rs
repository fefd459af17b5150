//! Error types for the Custom Tabs connection.
//!
//! Internal operations return [`Result<T>`]. The client-facing operations
//! of [`CustomTabsConnection`](crate::CustomTabsConnection) fold these errors
//! into `false` or [`PostMessageResult::FailureMessagingError`](crate::PostMessageResult)
//! and never surface them to the caller.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Session | [`Error::UnknownSession`], [`Error::DuplicateSession`], [`Error::UidMismatch`] |
//! | Policy | [`Error::InvalidUrl`], [`Error::Throttled`], [`Error::UntrustedOrigin`] |
//! | Messaging | [`Error::Messaging`] |
//! | Persistence | [`Error::Store`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionClosed`], [`Error::Protocol`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`], [`Error::ChannelClosed`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{SessionToken, Uid};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the connection builder is missing a collaborator or a
    /// policy value is out of range.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// Session token was never registered or has been cleaned up.
    #[error("Unknown session: {session}")]
    UnknownSession {
        /// The unknown token.
        session: SessionToken,
    },

    /// Session token is already registered.
    #[error("Session already registered: {session}")]
    DuplicateSession {
        /// The duplicate token.
        session: SessionToken,
    },

    /// Caller UID differs from the UID the session was registered with.
    #[error("UID {caller} does not own {session}")]
    UidMismatch {
        /// The session.
        session: SessionToken,
        /// The calling UID.
        caller: Uid,
    },

    // ========================================================================
    // Policy Errors
    // ========================================================================
    /// URL is empty, unparsable or uses a scheme other than http/https.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL text.
        url: String,
    },

    /// Speculation denied by the UID throttler.
    #[error("Throttled: uid {uid}")]
    Throttled {
        /// The throttled UID.
        uid: Uid,
    },

    /// Origin is not verified for the session's package.
    #[error("Untrusted origin: {origin}")]
    UntrustedOrigin {
        /// The origin that failed verification.
        origin: String,
    },

    // ========================================================================
    // Messaging Errors
    // ========================================================================
    /// Post-message channel not ready, content gone or validation pending.
    #[error("Messaging error: {message}")]
    Messaging {
        /// Description of the messaging failure.
        message: String,
    },

    // ========================================================================
    // Persistence Errors
    // ========================================================================
    /// Throttle store failure.
    #[error("Store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Connection failure on the RPC transport.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// The control loop or a client link has shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol violation or malformed message.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an unknown session error.
    #[inline]
    pub fn unknown_session(session: SessionToken) -> Self {
        Self::UnknownSession { session }
    }

    /// Creates a duplicate session error.
    #[inline]
    pub fn duplicate_session(session: SessionToken) -> Self {
        Self::DuplicateSession { session }
    }

    /// Creates a UID mismatch error.
    #[inline]
    pub fn uid_mismatch(session: SessionToken, caller: Uid) -> Self {
        Self::UidMismatch { session, caller }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a throttled error.
    #[inline]
    pub fn throttled(uid: Uid) -> Self {
        Self::Throttled { uid }
    }

    /// Creates an untrusted origin error.
    #[inline]
    pub fn untrusted_origin(origin: impl Into<String>) -> Self {
        Self::UntrustedOrigin {
            origin: origin.into(),
        }
    }

    /// Creates a messaging error.
    #[inline]
    pub fn messaging(message: impl Into<String>) -> Self {
        Self::Messaging {
            message: message.into(),
        }
    }

    /// Creates a store error.
    #[inline]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the request was refused by policy rather than
    /// failing on malformed input.
    #[inline]
    #[must_use]
    pub fn is_policy_denial(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::UntrustedOrigin { .. } | Self::UidMismatch { .. }
        )
    }

    /// Returns `true` if the error names a missing or duplicate session.
    #[inline]
    #[must_use]
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownSession { .. } | Self::DuplicateSession { .. } | Self::UidMismatch { .. }
        )
    }

    /// Returns `true` if this is a transport error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::ConnectionClosed
                | Self::Protocol { .. }
                | Self::WebSocket(_)
                | Self::ChannelClosed(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_url("chrome://version");
        assert_eq!(err.to_string(), "Invalid URL: chrome://version");
    }

    #[test]
    fn test_session_error_display() {
        let session = SessionToken::from_u64(3).expect("non-zero");
        let err = Error::uid_mismatch(session, Uid::new(10));
        assert_eq!(err.to_string(), "UID 10 does not own session-3");
        assert!(err.is_session_error());
        assert!(err.is_policy_denial());
    }

    #[test]
    fn test_is_policy_denial() {
        assert!(Error::throttled(Uid::new(1)).is_policy_denial());
        assert!(Error::untrusted_origin("https://a.test").is_policy_denial());
        assert!(!Error::invalid_url("").is_policy_denial());
    }

    #[test]
    fn test_is_transport_error() {
        assert!(Error::ConnectionClosed.is_transport_error());
        assert!(Error::protocol("bad frame").is_transport_error());
        assert!(!Error::config("x").is_transport_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
