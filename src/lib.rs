//! Custom Tabs connection - session, throttling and speculation coordinator.
//!
//! This library sits between client applications and a browser engine. It
//! keeps track of the sessions apps open, decides whether a navigation hint
//! is worth acting on, and runs at most one speculative navigation at a time.
//!
//! # Architecture
//!
//! The connection follows a single-owner model:
//!
//! - **Façade**: [`CustomTabsConnection`] is a cheap clonable handle, safe to
//!   call from any task
//! - **Control loop**: one task owns the [`ClientManager`], the speculation
//!   slot and the throttlers, and applies commands in order
//! - **Engine**: rendering, navigation and verification live behind the
//!   traits in [`engine`]
//!
//! Key design principles:
//!
//! - Every request is attributed to a session token and the caller's UID
//! - A speculative renderer has exactly one owner and is released exactly once
//! - Apps that keep mispredicting are slowed down, then banned
//! - Session callbacks never run while internal locks are held
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use customtabs_connection::engine::{MemoryPlatform, Platform};
//! use customtabs_connection::{CustomTabsConnection, MayLaunchExtras, Result, SessionToken, Uid};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let memory = Arc::new(MemoryPlatform::new());
//!     memory.register_package(Uid::new(10_001), "com.example.app");
//!
//!     let connection = CustomTabsConnection::builder()
//!         .platform(Platform::in_memory(memory))
//!         .build()?;
//!
//!     let uid = Uid::new(10_001);
//!     let session = SessionToken::next();
//!     connection.new_session(session, uid, None).await;
//!     connection.warmup(uid, 0);
//!
//!     let accepted = connection
//!         .may_launch_url(session, uid, Some("https://example.com/"), MayLaunchExtras::default(), &[])
//!         .await;
//!     println!("speculation accepted: {accepted}");
//!
//!     connection.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`clock`] | Time source, real or manual |
//! | [`client`] | Per-session records and [`ClientManager`] |
//! | [`connection`] | The [`CustomTabsConnection`] façade |
//! | [`engine`] | Browser-engine collaborator traits |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | RPC message types |
//! | [`speculation`] | Speculation slot and modes |
//! | [`throttle`] | Per-UID request throttling |
//! | [`transport`] | WebSocket RPC server |
//! | [`url_policy`] | URL, origin and referrer rules |

// ============================================================================
// Modules
// ============================================================================

/// Time source used by throttling and bookkeeping.
pub mod clock;

/// Client sessions.
///
/// - [`SessionCallback`] - Notifications towards the client
/// - [`ClientManager`] - Registry of live sessions
pub mod client;

/// Connection façade and its control loop.
///
/// Use [`CustomTabsConnection::builder()`] to create a connection.
pub mod connection;

/// Browser-engine collaborators.
pub mod engine;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for sessions, apps and renderers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// RPC protocol message types.
pub mod protocol;

/// Speculative navigation state.
pub mod speculation;

/// Request throttling per calling application.
pub mod throttle;

/// WebSocket transport for out-of-process clients.
pub mod transport;

/// URL parsing and matching rules.
pub mod url_policy;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientManager, PredictionOutcome, SessionCallback, WarmupState};

// Clock types
pub use clock::{Clock, ManualClock, SystemClock};

// Connection types
pub use connection::{
    ConnectionBuilder, ConnectionEvent, ConnectionObserver, ConnectionOptions,
    CustomTabsConnection, ExtraCommand, MayLaunchExtras, ParallelRequestStatus,
    PostMessageResult,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{RendererId, RequestId, SessionToken, Uid};

// Speculation types
pub use speculation::SpeculationMode;

// Throttle types
pub use throttle::{RequestThrottler, ThrottlePolicy};

// Transport types
pub use transport::{RpcServer, ServerHandle};
