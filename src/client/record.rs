//! Per-session record.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashSet;
use url::Url;

use crate::engine::Relation;
use crate::identifiers::{SessionToken, Uid};
use crate::speculation::SpeculationMode;
use crate::url_policy::{Origin, Referrer};

use super::callback::SessionCallback;
use super::channel::PostMessageChannel;

// ============================================================================
// SessionRecord
// ============================================================================

/// Everything known about one session.
pub struct SessionRecord {
    token: SessionToken,
    uid: Uid,
    package: Option<String>,
    created_at_ms: u64,

    /// Launches compare URLs without their fragment.
    pub ignore_fragments: bool,
    /// Speculation is allowed on cellular networks.
    pub prerender_on_cellular: bool,
    /// How `mayLaunchUrl` is served.
    pub speculation_mode: SpeculationMode,
    /// Parallel requests are allowed.
    pub allow_parallel_request: bool,
    /// The UI should hide the domain of pages shown for this session.
    pub hide_domain: bool,
    pub(crate) trusted_publisher: bool,
    pub(crate) warmup_called: bool,
    pub(crate) predicted_url: Option<Url>,
    pub(crate) channel: PostMessageChannel,
    verified: FxHashSet<(Origin, Relation)>,
    callback: Option<Arc<dyn SessionCallback>>,
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("token", &self.token)
            .field("uid", &self.uid)
            .field("package", &self.package)
            .field("speculation_mode", &self.speculation_mode)
            .field("ignore_fragments", &self.ignore_fragments)
            .finish_non_exhaustive()
    }
}

impl SessionRecord {
    pub(crate) fn new(
        token: SessionToken,
        uid: Uid,
        package: Option<String>,
        created_at_ms: u64,
        callback: Option<Arc<dyn SessionCallback>>,
    ) -> Self {
        Self {
            token,
            uid,
            package,
            created_at_ms,
            ignore_fragments: false,
            prerender_on_cellular: false,
            speculation_mode: SpeculationMode::default(),
            allow_parallel_request: false,
            hide_domain: false,
            trusted_publisher: false,
            warmup_called: false,
            predicted_url: None,
            channel: PostMessageChannel::default(),
            verified: FxHashSet::default(),
            callback,
        }
    }

    /// Session token.
    #[inline]
    #[must_use]
    pub fn token(&self) -> SessionToken {
        self.token
    }

    /// Owning UID.
    #[inline]
    #[must_use]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Package name, if resolved.
    #[inline]
    #[must_use]
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    pub(crate) fn set_package(&mut self, package: String, trusted_publisher: bool) {
        self.package = Some(package);
        self.trusted_publisher = trusted_publisher;
    }

    /// Returns `true` if the platform trusts the session's package to send
    /// any referrer.
    #[inline]
    #[must_use]
    pub fn is_trusted_publisher(&self) -> bool {
        self.trusted_publisher
    }

    /// Creation time in clock milliseconds.
    #[inline]
    #[must_use]
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    /// URL of the last prediction not yet matched against a launch.
    #[inline]
    #[must_use]
    pub fn predicted_url(&self) -> Option<&Url> {
        self.predicted_url.as_ref()
    }

    /// `android-app://<package>/`, if the package is known.
    #[must_use]
    pub fn default_referrer(&self) -> Option<Referrer> {
        self.package
            .as_deref()
            .and_then(|package| Referrer::for_package(package).ok())
    }

    /// Records a verified relationship.
    pub fn add_verified_origin(&mut self, origin: Origin, relation: Relation) {
        self.verified.insert((origin, relation));
    }

    /// Returns `true` if `origin` was verified for `relation`.
    #[must_use]
    pub fn is_origin_verified(&self, origin: &Origin, relation: Relation) -> bool {
        self.verified.contains(&(origin.clone(), relation))
    }

    /// Returns `true` if `referrer` may be sent on this session's behalf.
    ///
    /// Accepted: the session's own app referrer, any referrer of a
    /// trusted publisher, or a web referrer whose origin is verified.
    #[must_use]
    pub fn accepts_referrer(&self, referrer: &Referrer) -> bool {
        if self.trusted_publisher {
            return true;
        }
        if let Some(package) = referrer.package() {
            return self.package.as_deref() == Some(package);
        }
        referrer
            .origin()
            .is_some_and(|origin| self.is_origin_verified(&origin, Relation::UseAsOrigin))
    }

    /// Post-message channel.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &PostMessageChannel {
        &self.channel
    }

    /// Client callback.
    #[inline]
    #[must_use]
    pub fn callback(&self) -> Option<&Arc<dyn SessionCallback>> {
        self.callback.as_ref()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(package: Option<&str>) -> SessionRecord {
        SessionRecord::new(
            SessionToken::next(),
            Uid::new(10_001),
            package.map(str::to_owned),
            0,
            None,
        )
    }

    #[test]
    fn test_default_referrer() {
        let record = record(Some("com.example.app"));
        assert_eq!(
            record.default_referrer().map(|r| r.to_string()),
            Some("android-app://com.example.app/".to_owned())
        );
        assert!(self::record(None).default_referrer().is_none());
    }

    #[test]
    fn test_accepts_own_app_referrer_only() {
        let record = record(Some("com.example.app"));
        let own = Referrer::for_package("com.example.app").expect("referrer");
        let other = Referrer::for_package("com.other.app").expect("referrer");
        assert!(record.accepts_referrer(&own));
        assert!(!record.accepts_referrer(&other));
    }

    #[test]
    fn test_accepts_verified_web_referrer() {
        let mut record = record(Some("com.example.app"));
        let web = Referrer::parse("https://example.com/page").expect("referrer");
        assert!(!record.accepts_referrer(&web));

        let origin = Origin::parse("https://example.com").expect("origin");
        record.add_verified_origin(origin.clone(), Relation::HandleAllUrls);
        assert!(!record.accepts_referrer(&web));
        record.add_verified_origin(origin, Relation::UseAsOrigin);
        assert!(record.accepts_referrer(&web));
    }

    #[test]
    fn test_trusted_publisher_accepts_anything() {
        let mut record = record(Some("com.example.app"));
        record.trusted_publisher = true;
        let web = Referrer::parse("https://anything.example/").expect("referrer");
        assert!(record.accepts_referrer(&web));
    }

    #[test]
    fn test_defaults() {
        let record = record(None);
        assert_eq!(record.speculation_mode, SpeculationMode::Prerender);
        assert!(!record.ignore_fragments);
        assert!(!record.allow_parallel_request);
        assert!(!record.channel().is_ready());
    }
}
