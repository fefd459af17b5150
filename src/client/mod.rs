//! Session registry.
//!
//! [`ClientManager`] maps session tokens to [`SessionRecord`]s and owns the
//! per-UID throttlers. It is not synchronized; the connection's control
//! loop is its only user.
//!
//! | Item | Scope |
//! |------|-------|
//! | [`SessionRecord`] | One session: UID, package, flags, verified origins, channel |
//! | [`PostMessageChannel`] | Per-session post-message state |
//! | [`SessionCallback`] | Notifications pushed to the client of a session |
//! | [`WarmupState`], [`PredictionOutcome`] | Diagnostics |

// ============================================================================
// Submodules
// ============================================================================

/// Client notifications.
pub mod callback;

/// Post-message channel state.
pub mod channel;

/// Session registry.
pub mod manager;

/// Diagnostic classifications.
pub mod outcome;

/// Per-session record.
pub mod record;

// ============================================================================
// Re-exports
// ============================================================================

pub use callback::SessionCallback;
pub use channel::PostMessageChannel;
pub use manager::ClientManager;
pub use outcome::{PredictionOutcome, WarmupState};
pub use record::SessionRecord;
