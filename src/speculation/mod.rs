//! Speculation state machine.
//!
//! At most one speculative navigation exists per connection. The
//! [`SpeculationSlot`] owns it together with its renderer handle and is the
//! only place a speculative renderer is released:
//!
//! | Exit edge | [`DiscardReason`] |
//! |-----------|-------------------|
//! | New `mayLaunchUrl` | `Replaced` |
//! | Null-URL `mayLaunchUrl` | `Cancelled` |
//! | Launch with another URL | `UrlMismatch` |
//! | Launch with another referrer | `ReferrerMismatch` |
//! | Launch from a foreign client | `SessionMismatch` |
//! | Engine refused the hand-off | `AdoptFailed` |
//! | Load failed | `LoadFailed` |
//! | Owner disconnected | `SessionCleanedUp` |
//! | Connection shut down | `Shutdown` |

// ============================================================================
// Submodules
// ============================================================================

/// Speculation modes.
pub mod mode;

/// Single-speculation slot.
pub mod slot;

// ============================================================================
// Re-exports
// ============================================================================

pub use mode::SpeculationMode;
pub use slot::{DiscardReason, Speculation, SpeculationSlot, SpeculationSnapshot, TakeOutcome};
