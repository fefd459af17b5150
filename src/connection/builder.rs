//! Builder for [`CustomTabsConnection`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use customtabs_connection::CustomTabsConnection;
//! use customtabs_connection::engine::{MemoryPlatform, Platform};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> customtabs_connection::Result<()> {
//! let connection = CustomTabsConnection::builder()
//!     .platform(Platform::in_memory(Arc::new(MemoryPlatform::new())))
//!     .build()?;
//! # connection.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::client::ClientManager;
use crate::clock::{Clock, SystemClock};
use crate::engine::Platform;
use crate::error::{Error, Result};
use crate::throttle::{MemoryThrottleStore, ThrottlePolicy, ThrottleStore, ThrottlerRegistry};

use super::core::CustomTabsConnection;
use super::options::ConnectionOptions;

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`CustomTabsConnection`].
///
/// Use [`CustomTabsConnection::builder()`] to create one.
#[derive(Default)]
pub struct ConnectionBuilder {
    platform: Option<Platform>,
    policy: ThrottlePolicy,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn ThrottleStore>>,
    options: ConnectionOptions,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("has_platform", &self.platform.is_some())
            .field("policy", &self.policy)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder with default policy and options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the engine collaborators. Required.
    #[inline]
    #[must_use]
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Sets the throttling policy.
    #[inline]
    #[must_use]
    pub fn throttle_policy(mut self, policy: ThrottlePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the clock used for throttling. Defaults to [`SystemClock`].
    #[inline]
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the throttle store. Defaults to [`MemoryThrottleStore`].
    #[inline]
    #[must_use]
    pub fn throttle_store(mut self, store: Arc<dyn ThrottleStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the connection options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Builds the connection and starts its control loop.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if no platform was set
    /// - [`Error::Config`] if the throttle policy is invalid
    /// - [`Error::Config`] if called outside a tokio runtime
    pub fn build(self) -> Result<CustomTabsConnection> {
        let platform = self.validate_platform()?;
        self.policy.validate()?;
        Self::validate_runtime()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryThrottleStore::new()));
        let throttlers = ThrottlerRegistry::new(self.policy, Arc::clone(&clock), store);
        let clients = ClientManager::new(throttlers, Arc::clone(&platform.packages), clock);

        Ok(CustomTabsConnection::start(clients, platform, self.options))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ConnectionBuilder {
    fn validate_platform(&self) -> Result<Platform> {
        self.platform.clone().ok_or_else(|| {
            Error::config(
                "Engine platform is required. Use .platform() to set it.\n\
                 Example: CustomTabsConnection::builder().platform(Platform::in_memory(engine))",
            )
        })
    }

    fn validate_runtime() -> Result<()> {
        Handle::try_current()
            .map(|_| ())
            .map_err(|_| Error::config("CustomTabsConnection must be built inside a tokio runtime"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::engine::MemoryPlatform;

    fn platform() -> Platform {
        Platform::in_memory(Arc::new(MemoryPlatform::new()))
    }

    #[test]
    fn test_new_creates_empty_builder() {
        let builder = ConnectionBuilder::new();
        assert!(builder.platform.is_none());
        assert!(builder.clock.is_none());
        assert!(builder.store.is_none());
        assert_eq!(builder.options, ConnectionOptions::default());
    }

    #[tokio::test]
    async fn test_build_fails_without_platform() {
        let err = ConnectionBuilder::new().build().expect_err("no platform");
        assert!(err.to_string().contains("platform"));
    }

    #[tokio::test]
    async fn test_build_fails_with_invalid_policy() {
        let policy = ThrottlePolicy::default()
            .with_min_delay(Duration::from_secs(60))
            .with_max_delay(Duration::from_secs(1));
        let result = ConnectionBuilder::new()
            .platform(platform())
            .throttle_policy(policy)
            .build();
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[test]
    fn test_build_fails_outside_runtime() {
        let err = ConnectionBuilder::new()
            .platform(platform())
            .build()
            .expect_err("no runtime");
        assert!(err.to_string().contains("tokio runtime"));
    }

    #[tokio::test]
    async fn test_build_succeeds() {
        let connection = ConnectionBuilder::new()
            .platform(platform())
            .build()
            .expect("build");
        connection.shutdown().await;
    }
}
