//! Diagnostic classifications derived from session state.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;

// ============================================================================
// WarmupState
// ============================================================================

/// Whether a session exists and whether its UID has called `warmup`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarmupState {
    NoSessionNoWarmup,
    NoSessionWarmup,
    SessionNoWarmupNotCalled,
    SessionNoWarmupAlreadyCalled,
    SessionWarmup,
}

impl WarmupState {
    /// Classifies a session.
    ///
    /// `session_warmed` is whether the session itself has seen `warmup`
    /// since it was created; `uid_called` whether any session of the UID
    /// (or the UID without a session) ever has.
    #[must_use]
    pub fn classify(has_session: bool, uid_called: bool, session_warmed: bool) -> Self {
        match (has_session, uid_called, session_warmed) {
            (false, false, _) => Self::NoSessionNoWarmup,
            (false, true, _) => Self::NoSessionWarmup,
            (true, _, true) => Self::SessionWarmup,
            (true, true, false) => Self::SessionNoWarmupAlreadyCalled,
            (true, false, false) => Self::SessionNoWarmupNotCalled,
        }
    }
}

// ============================================================================
// PredictionOutcome
// ============================================================================

/// How the launched URL relates to the session's last prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionOutcome {
    /// No prediction before the launch.
    NoPrediction,
    /// The launch matched the prediction.
    GoodPrediction,
    /// The launch did not match.
    BadPrediction,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_without_session() {
        assert_eq!(
            WarmupState::classify(false, false, false),
            WarmupState::NoSessionNoWarmup
        );
        assert_eq!(
            WarmupState::classify(false, true, false),
            WarmupState::NoSessionWarmup
        );
    }

    #[test]
    fn test_classify_with_session() {
        assert_eq!(
            WarmupState::classify(true, false, false),
            WarmupState::SessionNoWarmupNotCalled
        );
        assert_eq!(
            WarmupState::classify(true, true, false),
            WarmupState::SessionNoWarmupAlreadyCalled
        );
        assert_eq!(
            WarmupState::classify(true, true, true),
            WarmupState::SessionWarmup
        );
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_string(&PredictionOutcome::GoodPrediction).expect("json");
        assert_eq!(json, "\"GOOD_PREDICTION\"");
    }
}
