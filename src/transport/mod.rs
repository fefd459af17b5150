//! WebSocket transport layer.
//!
//! Client applications reach the connection over WebSocket. Each socket is
//! one link, the counterpart of a platform binder: it identifies its UID
//! once, owns the sessions it creates and ends them when it closes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌──────────────────────┐
//! │  Client app     │         WebSocket            │  RpcServer           │
//! │                 │◄────────────────────────────►│  → ClientLink        │
//! │  hello, calls   │      localhost:PORT          │  → CustomTabs-       │
//! │                 │                              │    Connection        │
//! └─────────────────┘                              └──────────────────────┘
//! ```
//!
//! # Link Lifecycle
//!
//! 1. `RpcServer::bind` - Bind to an address
//! 2. `RpcServer::spawn` - Accept links in the background
//! 3. Client sends `hello {uid, package}`; the package must belong to the UID
//! 4. Calls are answered in order, events are pushed as they happen
//! 5. On close, the link's sessions are cleaned up
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `link` | One client link: handshake, dispatch, events |
//! | `server` | Server binding and acceptance |

// ============================================================================
// Submodules
// ============================================================================

/// One client link.
pub mod link;

/// WebSocket RPC server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use link::Peer;
pub use server::{RpcServer, ServerHandle};
