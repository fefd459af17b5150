//! How a session wants `mayLaunchUrl` to be served.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// SpeculationMode
// ============================================================================

/// Speculation strategy of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeculationMode {
    /// Warm a spare renderer only.
    NoSpeculation,
    /// Warm a spare renderer and prefetch the URL.
    PrefetchOnly,
    /// Prerender the URL.
    #[default]
    Prerender,
    /// Load the URL in a hidden tab.
    HiddenTab,
}

impl SpeculationMode {
    /// Returns `true` for modes that keep a page loaded in a renderer.
    #[inline]
    #[must_use]
    pub fn loads_page(self) -> bool {
        matches!(self, Self::Prerender | Self::HiddenTab)
    }

    /// Returns the wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoSpeculation => "noSpeculation",
            Self::PrefetchOnly => "prefetchOnly",
            Self::Prerender => "prerender",
            Self::HiddenTab => "hiddenTab",
        }
    }
}

impl fmt::Display for SpeculationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================
