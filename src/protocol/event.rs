//! Event message types.
//!
//! Events are pushed from the server to the client of a link when
//! something happens to one of its sessions.
//!
//! | Event | Params |
//! |-------|--------|
//! | `warmup.completed` | none |
//! | `message.channelReady` | none |
//! | `message.received` | `message` |
//! | `relationship.validated` | `relation`, `origin`, `verified` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::engine::Relation;
use crate::identifiers::SessionToken;
use crate::url_policy::Origin;

// ============================================================================
// Event
// ============================================================================

/// A notification for one session.
///
/// # Format
///
/// ```json
/// {
///   "session": 1,
///   "event": "message.received",
///   "params": { "message": "..." }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Session the event is about.
    pub session: SessionToken,

    /// Event name in `module.eventName` format.
    pub event: String,

    /// Event-specific data.
    #[serde(default)]
    pub params: Value,
}

impl Event {
    fn new(session: SessionToken, event: &str, params: Value) -> Self {
        Self {
            session,
            event: event.to_string(),
            params,
        }
    }

    /// Engine initialization requested by the client finished.
    #[inline]
    #[must_use]
    pub fn warmup_completed(session: SessionToken) -> Self {
        Self::new(session, "warmup.completed", json!({}))
    }

    /// The post-message channel is ready.
    #[inline]
    #[must_use]
    pub fn channel_ready(session: SessionToken) -> Self {
        Self::new(session, "message.channelReady", json!({}))
    }

    /// The page posted a message.
    #[inline]
    #[must_use]
    pub fn message_received(session: SessionToken, message: &str) -> Self {
        Self::new(session, "message.received", json!({ "message": message }))
    }

    /// A relationship validation finished.
    #[must_use]
    pub fn relationship_validated(
        session: SessionToken,
        relation: Relation,
        origin: &Origin,
        verified: bool,
    ) -> Self {
        Self::new(
            session,
            "relationship.validated",
            json!({
                "relation": relation,
                "origin": origin.as_str(),
                "verified": verified,
            }),
        )
    }

    /// Returns the module name from the event.
    #[inline]
    #[must_use]
    pub fn module(&self) -> &str {
        self.event.split('.').next().unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_received_format() {
        let session = SessionToken::from_u64(5).expect("token");
        let event = Event::message_received(session, "hello");
        let json = serde_json::to_value(&event).expect("serialize");

        assert_eq!(json["session"], 5);
        assert_eq!(json["event"], "message.received");
        assert_eq!(json["params"]["message"], "hello");
        assert_eq!(event.module(), "message");
    }

    #[test]
    fn test_relationship_validated_params() {
        let session = SessionToken::next();
        let origin = Origin::parse("https://example.com/page").expect("origin");
        let event = Event::relationship_validated(session, Relation::UseAsOrigin, &origin, false);

        assert_eq!(event.params["relation"], "useAsOrigin");
        assert_eq!(event.params["origin"], "https://example.com");
        assert_eq!(event.params["verified"], false);
    }
}
