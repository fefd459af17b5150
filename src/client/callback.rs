//! Notifications delivered to the client that owns a session.

// ============================================================================
// Imports
// ============================================================================

use crate::engine::Relation;
use crate::url_policy::Origin;

// ============================================================================
// SessionCallback
// ============================================================================

/// Receiver of per-session notifications.
///
/// Called from the connection's control loop; implementations must not
/// block. Every method defaults to doing nothing.
pub trait SessionCallback: Send + Sync {
    /// Engine initialization requested by this UID finished.
    fn on_warmup_completed(&self) {}

    /// The post-message channel became ready.
    fn on_message_channel_ready(&self) {}

    /// The page posted `message` to the client.
    fn on_post_message(&self, message: &str) {
        let _ = message;
    }

    /// A relationship validation finished.
    fn on_relationship_validated(&self, relation: Relation, origin: &Origin, verified: bool) {
        let _ = (relation, origin, verified);
    }
}
