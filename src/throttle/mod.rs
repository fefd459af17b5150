//! Per-UID throttling of speculative navigation requests.
//!
//! Every calling application (identified by [`Uid`](crate::Uid)) gets one
//! [`RequestThrottler`], shared by all of its sessions. The throttler keeps a
//! credit balance: each speculative request costs one unit, each request the
//! user actually navigates to earns [`ThrottlePolicy::success_credit`] back.
//! A client whose balance sinks to `-ban_threshold` is banned for
//! [`ThrottlePolicy::ban_duration`]; between requests a doubling backoff
//! delay applies while predictions keep missing.
//!
//! # Module Structure
//!
//! | Module | Description |
//! |--------|-------------|
//! | `policy` | Tunable thresholds and delays |
//! | `store` | Durable per-UID records (memory, JSON files) |
//! | `throttler` | [`RequestThrottler`] and [`ThrottlerRegistry`] |
//!
//! # Thread Safety
//!
//! Throttlers hold no locks. They are owned by the connection's control loop
//! and mutated only there; the store is the only shared piece.

// ============================================================================
// Submodules
// ============================================================================

/// Throttling thresholds and delays.
pub mod policy;

/// Durable throttle record storage.
pub mod store;

/// Throttler and per-UID registry.
pub mod throttler;

// ============================================================================
// Re-exports
// ============================================================================

pub use policy::ThrottlePolicy;
pub use store::{JsonFileThrottleStore, MemoryThrottleStore, ThrottleRecord, ThrottleStore};
pub use throttler::{RequestThrottler, ThrottlerRegistry};
