//! Type-safe identifiers for sessions, clients and renderers.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time.
//!
//! | Type | Wraps | Description |
//! |------|-------|-------------|
//! | [`SessionToken`] | `NonZeroU64` | Opaque client-held session handle |
//! | [`Uid`] | `u32` | Calling application's user id |
//! | [`RendererId`] | `NonZeroU64` | Speculative or spare renderer handle |
//! | [`RequestId`] | `Uuid` | RPC request/response correlation |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Counters
// ============================================================================

/// Next session token value. Starts at 1 (0 is the null token).
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Next renderer id value.
static NEXT_RENDERER: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SessionToken
// ============================================================================

/// Opaque handle identifying one client-held communication channel.
///
/// Tokens compare by identity: two tokens are equal only if they were
/// produced from the same value. The wire form is a non-zero integer; `0`
/// is the null token and never yields a `SessionToken`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(NonZeroU64);

impl SessionToken {
    /// Allocates a fresh process-unique token.
    #[must_use]
    pub fn next() -> Self {
        let raw = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and only grows.
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Wraps a raw wire value. Returns `None` for the null token.
    #[inline]
    #[must_use]
    pub fn from_u64(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

// ============================================================================
// Uid
// ============================================================================

/// User id of a calling application.
///
/// Several sessions may share a UID, and with it a throttler and the
/// warmup-called flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(u32);

impl Uid {
    /// Creates a UID.
    #[inline]
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RendererId
// ============================================================================

/// Identifier of a renderer handed out by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(NonZeroU64);

impl RendererId {
    /// Allocates a fresh process-unique renderer id.
    #[must_use]
    pub fn next() -> Self {
        let raw = NEXT_RENDERER.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RendererId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "renderer-{}", self.0)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Correlation id for RPC requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a random request id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The nil id, used for the `hello` handshake reply.
    #[inline]
    #[must_use]
    pub const fn handshake() -> Self {
        Self(Uuid::nil())
    }

    /// Returns `true` for the handshake id.
    #[inline]
    #[must_use]
    pub fn is_handshake(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_tokens_are_unique() {
        let a = SessionToken::next();
        let b = SessionToken::next();
        assert_ne!(a, b);
    }

    #[test]
    fn test_null_session_token_rejected() {
        assert!(SessionToken::from_u64(0).is_none());
        let token = SessionToken::from_u64(42).expect("non-zero");
        assert_eq!(token.as_u64(), 42);
        assert_eq!(token.to_string(), "session-42");
    }

    #[test]
    fn test_session_token_serializes_transparently() {
        let token = SessionToken::from_u64(7).expect("non-zero");
        assert_eq!(serde_json::to_string(&token).expect("serialize"), "7");
        let back: SessionToken = serde_json::from_str("7").expect("deserialize");
        assert_eq!(back, token);
        assert!(serde_json::from_str::<SessionToken>("0").is_err());
    }

    #[test]
    fn test_renderer_ids_increase() {
        let a = RendererId::next();
        let b = RendererId::next();
        assert!(b > a);
    }

    #[test]
    fn test_handshake_request_id() {
        assert!(RequestId::handshake().is_handshake());
        assert!(!RequestId::generate().is_handshake());
    }
}
