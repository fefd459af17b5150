//! Typed request options.
//!
//! | Type | Carried by |
//! |------|------------|
//! | [`MayLaunchExtras`] | `mayLaunchUrl` |
//! | [`ExtraCommand`] | `extraCommand` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::speculation::SpeculationMode;

// ============================================================================
// DebugOverride
// ============================================================================

/// Per-request override of the session's speculation mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DebugOverride {
    /// Use the session's mode.
    #[default]
    Default,
    /// Warm a spare renderer only.
    NoPrerendering,
    /// Prefetch only.
    PrefetchOnly,
}

// ============================================================================
// MayLaunchExtras
// ============================================================================

/// Options of one `mayLaunchUrl` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MayLaunchExtras {
    /// Speculation mode override.
    pub debug_override: DebugOverride,

    /// Referrer to load the page with. Used only if the session may claim
    /// it; otherwise the session's default referrer applies.
    pub referrer: Option<String>,
}

impl MayLaunchExtras {
    /// Creates empty extras.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the mode override.
    #[inline]
    #[must_use]
    pub fn with_debug_override(mut self, value: DebugOverride) -> Self {
        self.debug_override = value;
        self
    }

    /// Sets the requested referrer.
    #[inline]
    #[must_use]
    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    /// Mode actually used for a session configured with `session_mode`.
    #[must_use]
    pub fn effective_mode(&self, session_mode: SpeculationMode) -> SpeculationMode {
        match self.debug_override {
            DebugOverride::Default => session_mode,
            DebugOverride::NoPrerendering => SpeculationMode::NoSpeculation,
            DebugOverride::PrefetchOnly => SpeculationMode::PrefetchOnly,
        }
    }
}

// ============================================================================
// ExtraCommand
// ============================================================================

/// Per-session setting changed through `extraCommand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "value", rename_all = "camelCase")]
pub enum ExtraCommand {
    /// Selects how `mayLaunchUrl` is served.
    SetSpeculationMode(SpeculationMode),
    /// Launches compare URLs without fragments.
    SetIgnoreFragments(bool),
    /// Allows speculation on cellular networks.
    SetPrerenderOnCellular(bool),
    /// Hides the domain in the UI.
    SetHideDomain(bool),
    /// Allows parallel requests.
    SetAllowParallelRequest(bool),
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_mode() {
        let extras = MayLaunchExtras::new();
        assert_eq!(
            extras.effective_mode(SpeculationMode::HiddenTab),
            SpeculationMode::HiddenTab
        );

        let extras = extras.with_debug_override(DebugOverride::NoPrerendering);
        assert_eq!(
            extras.effective_mode(SpeculationMode::HiddenTab),
            SpeculationMode::NoSpeculation
        );

        let extras = extras.with_debug_override(DebugOverride::PrefetchOnly);
        assert_eq!(
            extras.effective_mode(SpeculationMode::Prerender),
            SpeculationMode::PrefetchOnly
        );
    }

    #[test]
    fn test_extras_deserialize_with_defaults() {
        let extras: MayLaunchExtras = serde_json::from_str("{}").expect("json");
        assert_eq!(extras, MayLaunchExtras::default());

        let extras: MayLaunchExtras =
            serde_json::from_str(r#"{"debugOverride":"prefetchOnly","referrer":"https://a.com/"}"#)
                .expect("json");
        assert_eq!(extras.debug_override, DebugOverride::PrefetchOnly);
        assert_eq!(extras.referrer.as_deref(), Some("https://a.com/"));
    }

    #[test]
    fn test_unknown_override_rejected() {
        assert!(serde_json::from_str::<MayLaunchExtras>(r#"{"debugOverride":"turbo"}"#).is_err());
    }

    #[test]
    fn test_clients_cannot_grant_themselves_trust() {
        let result = serde_json::from_str::<ExtraCommand>(
            r#"{"command":"setTrustedPublisher","value":true}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_extra_command_wire_format() {
        let command: ExtraCommand =
            serde_json::from_str(r#"{"command":"setSpeculationMode","value":"hiddenTab"}"#)
                .expect("json");
        assert_eq!(
            command,
            ExtraCommand::SetSpeculationMode(SpeculationMode::HiddenTab)
        );

        let json = serde_json::to_string(&ExtraCommand::SetIgnoreFragments(true)).expect("json");
        assert_eq!(json, r#"{"command":"setIgnoreFragments","value":true}"#);
    }
}
