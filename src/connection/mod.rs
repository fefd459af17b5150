//! The Custom Tabs connection.
//!
//! [`CustomTabsConnection`] is the surface clients call. It forwards every
//! operation to a single control task that owns the session registry, the
//! throttlers and the speculation slot, so the at-most-one-speculation rule
//! holds no matter how many callers race.
//!
//! | Item | Role |
//! |------|------|
//! | [`CustomTabsConnection`] | Thread-safe façade, cheap to clone |
//! | [`ConnectionBuilder`] | Collaborators, clock, throttle policy and store |
//! | [`ConnectionOptions`] | Tunables of the control loop |
//! | [`MayLaunchExtras`], [`ExtraCommand`] | Typed request extras |
//! | [`ConnectionObserver`] | Lifecycle events for diagnostics |
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use customtabs_connection::{CustomTabsConnection, SessionToken, Uid};
//! use customtabs_connection::connection::ExtraCommand;
//! use customtabs_connection::engine::{MemoryPlatform, Platform};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> customtabs_connection::Result<()> {
//! let engine = Arc::new(MemoryPlatform::new());
//! let uid = Uid::new(10_001);
//! engine.register_package(uid, "com.example.app");
//!
//! let connection = CustomTabsConnection::builder()
//!     .platform(Platform::in_memory(engine))
//!     .build()?;
//!
//! let token = SessionToken::next();
//! connection.new_session(token, uid, None).await;
//! connection
//!     .extra_command(token, uid, ExtraCommand::SetIgnoreFragments(true))
//!     .await;
//! # connection.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Connection builder.
pub mod builder;

/// Control loop owning all connection state.
mod control;

/// The connection façade.
pub mod core;

/// Typed request extras.
pub mod extras;

/// Post-message channel handling.
pub mod messaging;

/// Connection lifecycle events.
pub mod observer;

/// Control loop tunables.
pub mod options;

/// Detached requests on behalf of a verified origin.
pub mod parallel;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use self::core::CustomTabsConnection;
pub use extras::{DebugOverride, ExtraCommand, MayLaunchExtras};
pub use messaging::PostMessageResult;
pub use observer::{ConnectionEvent, ConnectionObserver, ObserverList};
pub use options::ConnectionOptions;
pub use parallel::ParallelRequestStatus;
