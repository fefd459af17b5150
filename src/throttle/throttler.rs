//! Request throttler and per-UID registry.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::identifiers::Uid;

use super::policy::ThrottlePolicy;
use super::store::{ThrottleRecord, ThrottleStore};

// ============================================================================
// RequestThrottler
// ============================================================================

/// Rate limiter and ban tracker for one UID.
///
/// Not synchronized: obtain it through [`ThrottlerRegistry::get_for_uid`]
/// on the thread that owns the registry.
pub struct RequestThrottler {
    uid: Uid,
    record: ThrottleRecord,
    policy: Arc<ThrottlePolicy>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ThrottleStore>,
}

impl fmt::Debug for RequestThrottler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestThrottler")
            .field("uid", &self.uid)
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RequestThrottler - Constructor
// ============================================================================

impl RequestThrottler {
    fn load(
        uid: Uid,
        policy: Arc<ThrottlePolicy>,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ThrottleStore>,
    ) -> Self {
        let now = clock.now_ms();
        let record = match store.load(uid) {
            Ok(Some(record)) if is_forgotten(&record, &policy, now) => {
                debug!(uid = %uid, "Discarding idle throttle record");
                ThrottleRecord::default()
            }
            Ok(Some(record)) => record,
            Ok(None) => ThrottleRecord::default(),
            Err(e) => {
                warn!(uid = %uid, error = %e, "Failed to load throttle record");
                ThrottleRecord::default()
            }
        };

        Self {
            uid,
            record,
            policy,
            clock,
            store,
        }
    }
}

// ============================================================================
// RequestThrottler - Public API
// ============================================================================

impl RequestThrottler {
    /// Returns the UID this throttler belongs to.
    #[inline]
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Returns the current record.
    #[inline]
    #[must_use]
    pub fn record(&self) -> &ThrottleRecord {
        &self.record
    }

    /// Returns `true` if a new speculative request may be issued now.
    ///
    /// False while banned or while the backoff delay since the last
    /// unmatched request has not elapsed.
    pub fn is_prerendering_allowed(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.expire_ban(now);

        if self.record.banned_until_ms.is_some() {
            return false;
        }

        match self.record.last_request_ms {
            None => true,
            Some(last) => {
                let delay = self.policy.delay_for_streak(self.record.miss_streak);
                now >= last.saturating_add(delay.as_millis() as u64)
            }
        }
    }

    /// Returns `true` if the UID is currently banned.
    pub fn is_banned(&mut self) -> bool {
        let now = self.clock.now_ms();
        self.expire_ban(now);
        self.record.banned_until_ms.is_some()
    }

    /// Records that a speculative request for `url` was issued.
    ///
    /// Costs one unit of credit and extends the miss streak; bans the UID
    /// once the debt reaches the policy threshold.
    pub fn register_prerender_request(&mut self, url: &str) {
        let now = self.clock.now_ms();
        self.expire_ban(now);

        let floor = self.policy.ban_floor();
        self.record.credit = (self.record.credit - 1.0).max(floor);
        self.record.miss_streak = self.record.miss_streak.saturating_add(1);
        self.record.last_request_ms = Some(now);
        self.record.pending_url = Some(url.to_owned());

        if self.record.credit <= floor && self.record.banned_until_ms.is_none() {
            self.ban_at(now);
        }

        self.persist();
    }

    /// Records that the pending request for `url` was actually launched.
    ///
    /// Ignored if `url` is not the most recent request.
    pub fn register_success(&mut self, url: &str) {
        if self.record.pending_url.as_deref() != Some(url) {
            debug!(uid = %self.uid, url = %url, "Launch does not match pending request");
            return;
        }

        self.record.credit =
            (self.record.credit + self.policy.success_credit).min(self.policy.max_credit);
        self.record.miss_streak = 0;
        self.record.last_request_ms = None;
        self.record.pending_url = None;
        self.persist();
    }

    /// Bans the UID immediately, regardless of its credit.
    pub fn ban(&mut self) {
        let now = self.clock.now_ms();
        self.ban_at(now);
        self.persist();
    }

    /// Forgets all history for the UID.
    pub fn reset(&mut self) {
        self.record = ThrottleRecord::default();
        if let Err(e) = self.store.remove(self.uid) {
            warn!(uid = %self.uid, error = %e, "Failed to remove throttle record");
        }
    }
}

// ============================================================================
// RequestThrottler - Internal
// ============================================================================

impl RequestThrottler {
    fn ban_at(&mut self, now: u64) {
        let until = now.saturating_add(self.policy.ban_duration_ms);
        self.record.banned_until_ms = Some(until);
        info!(uid = %self.uid, banned_until_ms = until, "UID banned from speculation");
    }

    /// Lifts an expired ban and starts the UID over with a clean record.
    fn expire_ban(&mut self, now: u64) {
        if let Some(until) = self.record.banned_until_ms
            && now >= until
        {
            info!(uid = %self.uid, "Speculation ban expired");
            self.record = ThrottleRecord::default();
            self.persist();
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(self.uid, &self.record) {
            warn!(uid = %self.uid, error = %e, "Failed to persist throttle record");
        }
    }
}

/// Returns `true` if an unbanned record has been idle past `forget_after`.
fn is_forgotten(record: &ThrottleRecord, policy: &ThrottlePolicy, now: u64) -> bool {
    if record.banned_until_ms.is_some() {
        return false;
    }
    match record.last_request_ms {
        Some(last) => now.saturating_sub(last) > policy.forget_after_ms,
        None => false,
    }
}

// ============================================================================
// ThrottlerRegistry
// ============================================================================

/// Lazily-populated map of UID to [`RequestThrottler`].
///
/// Returns the same throttler for the same UID for the lifetime of the
/// registry; state shared with other processes goes through the store.
pub struct ThrottlerRegistry {
    throttlers: FxHashMap<Uid, RequestThrottler>,
    policy: Arc<ThrottlePolicy>,
    clock: Arc<dyn Clock>,
    store: Arc<dyn ThrottleStore>,
}

impl fmt::Debug for ThrottlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottlerRegistry")
            .field("loaded", &self.throttlers.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ThrottlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        policy: ThrottlePolicy,
        clock: Arc<dyn Clock>,
        store: Arc<dyn ThrottleStore>,
    ) -> Self {
        Self {
            throttlers: FxHashMap::default(),
            policy: Arc::new(policy),
            clock,
            store,
        }
    }

    /// Returns the throttler for `uid`, loading it from the store on first
    /// use.
    pub fn get_for_uid(&mut self, uid: Uid) -> &mut RequestThrottler {
        let policy = &self.policy;
        let clock = &self.clock;
        let store = &self.store;
        self.throttlers.entry(uid).or_insert_with(|| {
            RequestThrottler::load(
                uid,
                Arc::clone(policy),
                Arc::clone(clock),
                Arc::clone(store),
            )
        })
    }

    /// Clears the history of one UID.
    pub fn reset_throttling(&mut self, uid: Uid) {
        self.get_for_uid(uid).reset();
        debug!(uid = %uid, "Throttling reset");
    }

    /// Bans `uid` immediately.
    pub fn ban(&mut self, uid: Uid) {
        self.get_for_uid(uid).ban();
    }

    /// Drops every loaded throttler and every stored record.
    pub fn purge_all_entries_for_testing(&mut self) {
        self.throttlers.clear();
        if let Err(e) = self.store.purge() {
            warn!(error = %e, "Failed to purge throttle store");
        }
    }

    /// Returns the active policy.
    #[inline]
    #[must_use]
    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use proptest::prelude::*;

    use crate::clock::ManualClock;
    use crate::throttle::store::MemoryThrottleStore;

    const UID: Uid = Uid::new(10_123);
    const URL: &str = "https://www.example.com/";

    fn registry() -> (ThrottlerRegistry, Arc<ManualClock>, Arc<MemoryThrottleStore>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = Arc::new(MemoryThrottleStore::new());
        let policy = ThrottlePolicy::default().with_ban_duration(Duration::from_secs(60));
        let registry = ThrottlerRegistry::new(policy, clock.clone(), store.clone());
        (registry, clock, store)
    }

    #[test]
    fn test_fresh_uid_is_allowed() {
        let (mut registry, _, _) = registry();
        assert!(registry.get_for_uid(UID).is_prerendering_allowed());
    }

    #[test]
    fn test_backoff_grows_with_misses() {
        let (mut registry, clock, _) = registry();
        let throttler = registry.get_for_uid(UID);

        throttler.register_prerender_request(URL);
        assert!(!throttler.is_prerendering_allowed());
        clock.advance(Duration::from_millis(100));
        assert!(throttler.is_prerendering_allowed());

        throttler.register_prerender_request(URL);
        clock.advance(Duration::from_millis(100));
        assert!(!throttler.is_prerendering_allowed());
        clock.advance(Duration::from_millis(100));
        assert!(throttler.is_prerendering_allowed());

        throttler.register_prerender_request(URL);
        clock.advance(Duration::from_millis(200));
        assert!(!throttler.is_prerendering_allowed());
        clock.advance(Duration::from_millis(250));
        assert!(throttler.is_prerendering_allowed());
    }

    #[test]
    fn test_success_resets_backoff() {
        let (mut registry, _, _) = registry();
        let throttler = registry.get_for_uid(UID);

        throttler.register_prerender_request(URL);
        assert!(!throttler.is_prerendering_allowed());
        throttler.register_success(URL);
        assert!(throttler.is_prerendering_allowed());
    }

    #[test]
    fn test_success_for_other_url_is_ignored() {
        let (mut registry, _, _) = registry();
        let throttler = registry.get_for_uid(UID);

        throttler.register_prerender_request(URL);
        throttler.register_success("https://other.example.com/");
        assert_eq!(throttler.record().miss_streak, 1);
    }

    #[test]
    fn test_hundred_misses_ban() {
        let (mut registry, _, _) = registry();
        let throttler = registry.get_for_uid(UID);

        for _ in 0..99 {
            throttler.register_prerender_request(URL);
        }
        assert!(!throttler.is_banned());
        throttler.register_prerender_request(URL);
        assert!(throttler.is_banned());
        assert!(!throttler.is_prerendering_allowed());
    }

    #[test]
    fn test_ban_decays_to_fresh_backoff() {
        let (mut registry, clock, _) = registry();
        let throttler = registry.get_for_uid(UID);

        throttler.ban();
        assert!(!throttler.is_prerendering_allowed());

        clock.advance(Duration::from_secs(61));
        assert!(throttler.is_prerendering_allowed());

        throttler.register_prerender_request(URL);
        assert!(!throttler.is_prerendering_allowed());
        clock.advance(Duration::from_millis(100));
        assert!(throttler.is_prerendering_allowed());
    }

    #[test]
    fn test_state_shared_through_store() {
        let (mut registry, clock, store) = registry();
        registry.ban(UID);

        let mut other = ThrottlerRegistry::new(ThrottlePolicy::default(), clock, store);
        assert!(other.get_for_uid(UID).is_banned());
    }

    #[test]
    fn test_reset_and_purge() {
        let (mut registry, _, store) = registry();
        registry.ban(UID);
        registry.reset_throttling(UID);
        assert!(registry.get_for_uid(UID).is_prerendering_allowed());

        registry.get_for_uid(UID).register_prerender_request(URL);
        assert!(!store.is_empty());
        registry.purge_all_entries_for_testing();
        assert!(store.is_empty());
    }

    #[test]
    fn test_idle_record_forgotten_on_load() {
        let (mut registry, clock, store) = registry();
        registry.get_for_uid(UID).register_prerender_request(URL);

        clock.advance(Duration::from_secs(15 * 24 * 60 * 60));
        let mut reloaded = ThrottlerRegistry::new(ThrottlePolicy::default(), clock, store);
        assert_eq!(reloaded.get_for_uid(UID).record(), &ThrottleRecord::default());
    }

    proptest! {
        #[test]
        fn prop_always_matched_never_banned(requests in 1usize..400) {
            let (mut registry, _, _) = registry();
            let throttler = registry.get_for_uid(UID);
            for i in 0..requests {
                let url = format!("https://example.com/{i}");
                throttler.register_prerender_request(&url);
                throttler.register_success(&url);
            }
            prop_assert!(!throttler.is_banned());
            prop_assert!(throttler.is_prerendering_allowed());
        }

        #[test]
        fn prop_alternating_hits_never_banned(pairs in 1usize..300) {
            let (mut registry, _, _) = registry();
            let throttler = registry.get_for_uid(UID);
            for i in 0..pairs {
                throttler.register_prerender_request("https://example.com/miss");
                let hit = format!("https://example.com/hit/{i}");
                throttler.register_prerender_request(&hit);
                throttler.register_success(&hit);
            }
            prop_assert!(!throttler.is_banned());
        }
    }
}
