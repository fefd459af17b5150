//! WebSocket protocol message types.
//!
//! Each WebSocket link carries the calls of one client application.
//!
//! | Message Type | Direction | Purpose |
//! |--------------|-----------|---------|
//! | `Request` | Client → Server | Call with correlation id |
//! | `Response` | Server → Client | Call result or error |
//! | `Event` | Server → Client | Session notification |
//!
//! The first request of a link must be `hello`, sent with the nil id.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `call` | Typed calls |
//! | `event` | Pushed events |
//! | `request` | Request and Response types |

// ============================================================================
// Submodules
// ============================================================================

/// Typed call definitions.
pub mod call;

/// Event message types.
pub mod event;

/// Request and Response message types.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use call::{Call, string_entries};
pub use event::Event;
pub use request::{Request, Response, ResponseType};
