//! Session registry and per-UID bookkeeping.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, info};
use url::Url;

use crate::clock::Clock;
use crate::engine::{PackageResolver, Relation};
use crate::error::{Error, Result};
use crate::identifiers::{SessionToken, Uid};
use crate::speculation::SpeculationMode;
use crate::throttle::ThrottlerRegistry;
use crate::url_policy::{Origin, Referrer, match_key, urls_match};

use super::callback::SessionCallback;
use super::outcome::{PredictionOutcome, WarmupState};
use super::record::SessionRecord;

// ============================================================================
// ClientManager
// ============================================================================

/// Maps session tokens to [`SessionRecord`]s.
///
/// Owns the [`ThrottlerRegistry`], so sessions sharing a UID share its
/// throttler. Not synchronized.
pub struct ClientManager {
    sessions: FxHashMap<SessionToken, SessionRecord>,
    uids_called_warmup: FxHashSet<Uid>,
    throttlers: ThrottlerRegistry,
    packages: Arc<dyn PackageResolver>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientManager")
            .field("sessions", &self.sessions.len())
            .field("uids_called_warmup", &self.uids_called_warmup.len())
            .field("throttlers", &self.throttlers)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ClientManager - Sessions
// ============================================================================

impl ClientManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        throttlers: ThrottlerRegistry,
        packages: Arc<dyn PackageResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            sessions: FxHashMap::default(),
            uids_called_warmup: FxHashSet::default(),
            throttlers,
            packages,
            clock,
        }
    }

    /// Registers `token` for `uid`, resolving the package of the UID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateSession`] if the token is registered.
    pub fn new_session(
        &mut self,
        token: SessionToken,
        uid: Uid,
        callback: Option<Arc<dyn SessionCallback>>,
    ) -> Result<()> {
        if self.sessions.contains_key(&token) {
            return Err(Error::duplicate_session(token));
        }

        let package = self.packages.package_for_uid(uid);
        let mut record = SessionRecord::new(token, uid, package, self.clock.now_ms(), callback);
        record.trusted_publisher = record
            .package()
            .is_some_and(|package| self.packages.is_trusted_publisher(package));
        info!(session = %token, uid = %uid, package = ?record.package(), "Session created");
        self.sessions.insert(token, record);
        Ok(())
    }

    /// Returns the record of `token`.
    #[inline]
    #[must_use]
    pub fn session(&self, token: SessionToken) -> Option<&SessionRecord> {
        self.sessions.get(&token)
    }

    /// Returns the record of `token` mutably.
    #[inline]
    pub fn session_mut(&mut self, token: SessionToken) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(&token)
    }

    /// Returns the record of `token` if `uid` owns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownSession`] or [`Error::UidMismatch`].
    pub fn owned_session_mut(&mut self, token: SessionToken, uid: Uid) -> Result<&mut SessionRecord> {
        let record = self
            .sessions
            .get_mut(&token)
            .ok_or_else(|| Error::unknown_session(token))?;
        if record.uid() != uid {
            return Err(Error::uid_mismatch(token, uid));
        }
        Ok(record)
    }

    /// UID owning `token`.
    #[inline]
    #[must_use]
    pub fn uid_for_session(&self, token: SessionToken) -> Option<Uid> {
        self.sessions.get(&token).map(SessionRecord::uid)
    }

    /// Tokens of every session owned by `uid`.
    #[must_use]
    pub fn sessions_for_uid(&self, uid: Uid) -> Vec<SessionToken> {
        self.sessions
            .values()
            .filter(|record| record.uid() == uid)
            .map(SessionRecord::token)
            .collect()
    }

    /// Number of registered sessions.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Forgets `token`. Returns its record, if it was registered.
    pub fn cleanup_session(&mut self, token: SessionToken) -> Option<SessionRecord> {
        let record = self.sessions.remove(&token)?;
        info!(session = %token, uid = %record.uid(), "Session cleaned up");
        Some(record)
    }

    /// Forgets every session.
    pub fn cleanup_all(&mut self) -> Vec<SessionToken> {
        let tokens: Vec<_> = self.sessions.drain().map(|(token, _)| token).collect();
        if !tokens.is_empty() {
            info!(count = tokens.len(), "All sessions cleaned up");
        }
        tokens
    }
}

// ============================================================================
// ClientManager - Warmup
// ============================================================================

impl ClientManager {
    /// Marks `uid` (and its current sessions) as having called `warmup`.
    pub fn record_uid_has_called_warmup(&mut self, uid: Uid) {
        self.uids_called_warmup.insert(uid);
        for record in self.sessions.values_mut() {
            if record.uid() == uid {
                record.warmup_called = true;
            }
        }
    }

    /// Returns `true` if `uid` ever called `warmup`.
    #[inline]
    #[must_use]
    pub fn has_uid_called_warmup(&self, uid: Uid) -> bool {
        self.uids_called_warmup.contains(&uid)
    }

    /// Classifies `token` for diagnostics. `caller` is used when the
    /// session is unknown.
    #[must_use]
    pub fn warmup_state(&self, token: SessionToken, caller: Uid) -> WarmupState {
        match self.sessions.get(&token) {
            Some(record) => WarmupState::classify(
                true,
                self.has_uid_called_warmup(record.uid()),
                record.warmup_called,
            ),
            None => WarmupState::classify(false, self.has_uid_called_warmup(caller), false),
        }
    }
}

// ============================================================================
// ClientManager - Throttling & Predictions
// ============================================================================

impl ClientManager {
    /// Gate for speculative requests.
    ///
    /// Allowed only for a known session owned by `uid` whose throttler
    /// currently permits a request. When allowed, the request is charged
    /// to the throttler under the session's fragment policy and `url`
    /// becomes the session's prediction. A denial changes nothing.
    pub fn update_stats_and_return_whether_allowed(
        &mut self,
        token: SessionToken,
        uid: Uid,
        url: &Url,
    ) -> bool {
        match self.charge_speculation(token, uid, url) {
            Ok(()) => true,
            Err(e) => {
                debug!(session = %token, error = %e, "Speculation denied");
                false
            }
        }
    }

    fn charge_speculation(&mut self, token: SessionToken, uid: Uid, url: &Url) -> Result<()> {
        let record = self
            .sessions
            .get_mut(&token)
            .ok_or_else(|| Error::unknown_session(token))?;
        if record.uid() != uid {
            return Err(Error::uid_mismatch(token, uid));
        }

        let throttler = self.throttlers.get_for_uid(uid);
        if !throttler.is_prerendering_allowed() {
            return Err(Error::throttled(uid));
        }

        throttler.register_prerender_request(&match_key(url, record.ignore_fragments));
        record.predicted_url = Some(url.clone());
        Ok(())
    }

    /// Classifies a launch of `url` against the session's prediction.
    #[must_use]
    pub fn prediction_outcome(&self, token: SessionToken, url: &Url) -> PredictionOutcome {
        let Some(record) = self.sessions.get(&token) else {
            return PredictionOutcome::NoPrediction;
        };
        match &record.predicted_url {
            None => PredictionOutcome::NoPrediction,
            Some(predicted) if urls_match(predicted, url, record.ignore_fragments) => {
                PredictionOutcome::GoodPrediction
            }
            Some(_) => PredictionOutcome::BadPrediction,
        }
    }

    /// Records a launch of `url`: classifies it, credits the throttler on a
    /// good prediction and clears the prediction.
    pub fn register_launch(&mut self, token: SessionToken, url: &Url) -> PredictionOutcome {
        let outcome = self.prediction_outcome(token, url);
        let Some(record) = self.sessions.get_mut(&token) else {
            return outcome;
        };

        if let Some(predicted) = record.predicted_url.take()
            && outcome == PredictionOutcome::GoodPrediction
        {
            let key = match_key(&predicted, record.ignore_fragments);
            self.throttlers.get_for_uid(record.uid()).register_success(&key);
        }
        debug!(session = %token, url = %url, ?outcome, "Launch registered");
        outcome
    }

    /// Throttlers of every UID.
    #[inline]
    pub fn throttlers_mut(&mut self) -> &mut ThrottlerRegistry {
        &mut self.throttlers
    }
}

// ============================================================================
// ClientManager - Session Flags
// ============================================================================

impl ClientManager {
    fn update(&mut self, token: SessionToken, apply: impl FnOnce(&mut SessionRecord)) -> bool {
        match self.sessions.get_mut(&token) {
            Some(record) => {
                apply(record);
                true
            }
            None => false,
        }
    }

    /// Sets the fragment policy. Returns `false` for unknown sessions.
    pub fn set_ignore_fragments_for_session(&mut self, token: SessionToken, value: bool) -> bool {
        self.update(token, |r| r.ignore_fragments = value)
    }

    /// Allows speculation on cellular networks.
    pub fn set_prerender_on_cellular_for_session(
        &mut self,
        token: SessionToken,
        value: bool,
    ) -> bool {
        self.update(token, |r| r.prerender_on_cellular = value)
    }

    /// Selects the speculation mode.
    pub fn set_speculation_mode_for_session(
        &mut self,
        token: SessionToken,
        mode: SpeculationMode,
    ) -> bool {
        self.update(token, |r| r.speculation_mode = mode)
    }

    /// Allows parallel requests.
    pub fn set_allow_parallel_request_for_session(
        &mut self,
        token: SessionToken,
        value: bool,
    ) -> bool {
        self.update(token, |r| r.allow_parallel_request = value)
    }

    /// Hides the domain in the UI.
    pub fn set_hide_domain_for_session(&mut self, token: SessionToken, value: bool) -> bool {
        self.update(token, |r| r.hide_domain = value)
    }

    /// Replaces the package name of the session.
    pub fn override_package_name_for_session(
        &mut self,
        token: SessionToken,
        package: impl Into<String>,
    ) -> bool {
        let package = package.into();
        let trusted = self.packages.is_trusted_publisher(&package);
        self.update(token, |r| r.set_package(package, trusted))
    }

    /// Records a verified relationship for the session.
    pub fn add_verified_origin(
        &mut self,
        token: SessionToken,
        origin: Origin,
        relation: Relation,
    ) -> bool {
        self.update(token, |r| r.add_verified_origin(origin, relation))
    }

    /// `android-app://<package>/` of the session.
    #[must_use]
    pub fn default_referrer_for_session(&self, token: SessionToken) -> Option<Referrer> {
        self.sessions.get(&token)?.default_referrer()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::clock::ManualClock;
    use crate::engine::MemoryPlatform;
    use crate::throttle::{MemoryThrottleStore, ThrottlePolicy};

    const UID: Uid = Uid::new(10_001);
    const OTHER_UID: Uid = Uid::new(10_002);

    fn manager() -> (ClientManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let engine = Arc::new(MemoryPlatform::new());
        engine.register_package(UID, "com.example.app");
        let throttlers = ThrottlerRegistry::new(
            ThrottlePolicy::default(),
            clock.clone(),
            Arc::new(MemoryThrottleStore::new()),
        );
        (ClientManager::new(throttlers, engine, clock.clone()), clock)
    }

    fn url(raw: &str) -> Url {
        Url::parse(raw).expect("url")
    }

    #[test]
    fn test_new_session_rejects_duplicates() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        manager.new_session(token, UID, None).expect("first");
        let err = manager.new_session(token, UID, None).expect_err("duplicate");
        assert!(matches!(err, Error::DuplicateSession { .. }));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_new_session_resolves_package() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        manager.new_session(token, UID, None).expect("session");
        assert_eq!(
            manager.default_referrer_for_session(token).map(|r| r.to_string()),
            Some("android-app://com.example.app/".to_owned())
        );

        assert!(manager.override_package_name_for_session(token, "com.foo.me"));
        assert_eq!(
            manager.default_referrer_for_session(token).map(|r| r.to_string()),
            Some("android-app://com.foo.me/".to_owned())
        );
    }

    #[test]
    fn test_warmup_states() {
        let (mut manager, _) = manager();
        let unknown = SessionToken::next();
        assert_eq!(manager.warmup_state(unknown, UID), WarmupState::NoSessionNoWarmup);

        let before = SessionToken::next();
        manager.new_session(before, UID, None).expect("session");
        assert_eq!(
            manager.warmup_state(before, UID),
            WarmupState::SessionNoWarmupNotCalled
        );

        manager.record_uid_has_called_warmup(UID);
        assert_eq!(manager.warmup_state(before, UID), WarmupState::SessionWarmup);
        assert_eq!(manager.warmup_state(unknown, UID), WarmupState::NoSessionWarmup);

        let after = SessionToken::next();
        manager.new_session(after, UID, None).expect("session");
        assert_eq!(
            manager.warmup_state(after, UID),
            WarmupState::SessionNoWarmupAlreadyCalled
        );
    }

    #[test]
    fn test_gate_rejects_unknown_and_foreign() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        let target = url("https://example.com/");
        assert!(!manager.update_stats_and_return_whether_allowed(token, UID, &target));

        manager.new_session(token, UID, None).expect("session");
        assert!(!manager.update_stats_and_return_whether_allowed(token, OTHER_UID, &target));
        assert!(manager.session(token).and_then(SessionRecord::predicted_url).is_none());
        assert!(manager.update_stats_and_return_whether_allowed(token, UID, &target));
    }

    #[test]
    fn test_gate_applies_backoff() {
        let (mut manager, clock) = manager();
        let token = SessionToken::next();
        manager.new_session(token, UID, None).expect("session");
        let target = url("https://example.com/");

        assert!(manager.update_stats_and_return_whether_allowed(token, UID, &target));
        assert!(!manager.update_stats_and_return_whether_allowed(token, UID, &target));
        clock.advance(Duration::from_millis(100));
        assert!(manager.update_stats_and_return_whether_allowed(token, UID, &target));
    }

    #[test]
    fn test_prediction_outcome_with_fragments() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        manager.new_session(token, UID, None).expect("session");
        let plain = url("https://example.com/page.html");
        let fragment = url("https://example.com/page.html#yeah");

        assert_eq!(
            manager.prediction_outcome(token, &plain),
            PredictionOutcome::NoPrediction
        );

        assert!(manager.update_stats_and_return_whether_allowed(token, UID, &plain));
        assert_eq!(
            manager.prediction_outcome(token, &fragment),
            PredictionOutcome::BadPrediction
        );

        manager.set_ignore_fragments_for_session(token, true);
        assert_eq!(
            manager.prediction_outcome(token, &fragment),
            PredictionOutcome::GoodPrediction
        );
    }

    #[test]
    fn test_register_launch_credits_throttler() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        manager.new_session(token, UID, None).expect("session");
        let target = url("https://example.com/a");

        assert!(manager.update_stats_and_return_whether_allowed(token, UID, &target));
        assert_eq!(
            manager.register_launch(token, &target),
            PredictionOutcome::GoodPrediction
        );
        assert!(manager.session(token).and_then(SessionRecord::predicted_url).is_none());
        // A confirmed hit lifts the backoff immediately.
        assert!(manager.update_stats_and_return_whether_allowed(token, UID, &target));
    }

    #[test]
    fn test_sessions_do_not_share_flags() {
        let (mut manager, clock) = manager();
        let a = SessionToken::next();
        let b = SessionToken::next();
        manager.new_session(a, UID, None).expect("session");
        manager.new_session(b, UID, None).expect("session");
        manager.set_ignore_fragments_for_session(b, true);
        manager.set_speculation_mode_for_session(b, SpeculationMode::HiddenTab);

        assert!(manager.update_stats_and_return_whether_allowed(a, UID, &url("https://example.com/x#1")));
        clock.advance(Duration::from_secs(1));

        let b_record = manager.session(b).expect("b");
        assert!(b_record.ignore_fragments);
        assert_eq!(b_record.speculation_mode, SpeculationMode::HiddenTab);
        assert!(b_record.predicted_url().is_none());
        let a_record = manager.session(a).expect("a");
        assert!(!a_record.ignore_fragments);
        assert_eq!(a_record.speculation_mode, SpeculationMode::Prerender);
    }

    #[test]
    fn test_setters_on_unknown_session() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        assert!(!manager.set_ignore_fragments_for_session(token, true));
        assert!(!manager.set_allow_parallel_request_for_session(token, true));
        assert!(!manager.override_package_name_for_session(token, "com.foo.me"));
    }

    #[test]
    fn test_cleanup() {
        let (mut manager, _) = manager();
        let a = SessionToken::next();
        let b = SessionToken::next();
        manager.new_session(a, UID, None).expect("session");
        manager.new_session(b, OTHER_UID, None).expect("session");
        assert_eq!(manager.sessions_for_uid(UID), vec![a]);

        assert!(manager.cleanup_session(a).is_some());
        assert!(manager.cleanup_session(a).is_none());
        assert_eq!(manager.cleanup_all(), vec![b]);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_owned_session_mut() {
        let (mut manager, _) = manager();
        let token = SessionToken::next();
        assert!(manager.owned_session_mut(token, UID).is_err());
        manager.new_session(token, UID, None).expect("session");
        let err = manager.owned_session_mut(token, OTHER_UID).expect_err("foreign");
        assert!(err.is_policy_denial());
        assert!(manager.owned_session_mut(token, UID).is_ok());
    }
}
