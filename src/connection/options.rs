//! Connection tunables.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use customtabs_connection::ConnectionOptions;
//!
//! let options = ConnectionOptions::new()
//!     .with_max_low_confidence_urls(5)
//!     .with_origin_verification_timeout(Duration::from_secs(2));
//! assert_eq!(options.max_low_confidence_urls, 5);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default cap on low-confidence candidates per `mayLaunchUrl`.
const DEFAULT_MAX_LOW_CONFIDENCE_URLS: usize = 10;

/// Default limit for one origin verification.
const DEFAULT_ORIGIN_VERIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Default control queue depth that triggers a warning.
const DEFAULT_COMMAND_QUEUE_WARN_DEPTH: usize = 256;

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Tunables of a [`CustomTabsConnection`](crate::CustomTabsConnection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Low-confidence candidates beyond this count are ignored.
    pub max_low_confidence_urls: usize,

    /// Verifications running longer than this count as failed.
    pub origin_verification_timeout: Duration,

    /// Pending control commands above this depth are logged.
    pub command_queue_warn_depth: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options with default values.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_low_confidence_urls: DEFAULT_MAX_LOW_CONFIDENCE_URLS,
            origin_verification_timeout: DEFAULT_ORIGIN_VERIFICATION_TIMEOUT,
            command_queue_warn_depth: DEFAULT_COMMAND_QUEUE_WARN_DEPTH,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the low-confidence candidate cap.
    #[inline]
    #[must_use]
    pub fn with_max_low_confidence_urls(mut self, max: usize) -> Self {
        self.max_low_confidence_urls = max;
        self
    }

    /// Sets the origin verification timeout.
    #[inline]
    #[must_use]
    pub fn with_origin_verification_timeout(mut self, timeout: Duration) -> Self {
        self.origin_verification_timeout = timeout;
        self
    }

    /// Sets the queue depth warning threshold.
    #[inline]
    #[must_use]
    pub fn with_command_queue_warn_depth(mut self, depth: usize) -> Self {
        self.command_queue_warn_depth = depth;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::default();
        assert_eq!(options.max_low_confidence_urls, 10);
        assert_eq!(options.origin_verification_timeout, Duration::from_secs(10));
        assert_eq!(options, ConnectionOptions::new());
    }

    #[test]
    fn test_builder_chain() {
        let options = ConnectionOptions::new()
            .with_max_low_confidence_urls(3)
            .with_origin_verification_timeout(Duration::from_millis(500))
            .with_command_queue_warn_depth(8);
        assert_eq!(options.max_low_confidence_urls, 3);
        assert_eq!(options.origin_verification_timeout, Duration::from_millis(500));
        assert_eq!(options.command_queue_warn_depth, 8);
    }
}
