//! The connection façade.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::client::{ClientManager, PredictionOutcome, SessionCallback, WarmupState};
use crate::engine::{PageChannel, Platform, Relation, RendererHandle, WarmupPool};
use crate::identifiers::{SessionToken, Uid};
use crate::speculation::SpeculationSnapshot;
use crate::url_policy::Referrer;

use super::builder::ConnectionBuilder;
use super::control::{ControlCommand, ControlHandle, ControlLoop, Reply};
use super::extras::{ExtraCommand, MayLaunchExtras};
use super::messaging::PostMessageResult;
use super::observer::{ConnectionObserver, ObserverList};
use super::options::ConnectionOptions;
use super::parallel::ParallelRequestStatus;

// ============================================================================
// CustomTabsConnection
// ============================================================================

/// Entry point for Custom Tabs clients.
///
/// Cheap to clone; all clones drive the same control loop. Every operation
/// is answered by the loop in submission order. Failures never surface as
/// errors: callers see `false`, `None` or
/// [`PostMessageResult::FailureMessagingError`], and the reason is logged.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use customtabs_connection::{CustomTabsConnection, MayLaunchExtras, SessionToken, Uid};
/// use customtabs_connection::engine::{MemoryPlatform, Platform};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> customtabs_connection::Result<()> {
/// let engine = Arc::new(MemoryPlatform::new());
/// let uid = Uid::new(10_001);
/// engine.register_package(uid, "com.example.app");
///
/// let connection = CustomTabsConnection::builder()
///     .platform(Platform::in_memory(engine.clone()))
///     .build()?;
///
/// let token = SessionToken::next();
/// assert!(connection.warmup(uid, 0));
/// assert!(connection.new_session(token, uid, None).await);
/// assert!(
///     connection
///         .may_launch_url(token, uid, Some("https://example.com/"), MayLaunchExtras::new(), &[])
///         .await
/// );
///
/// let handle = connection
///     .take_speculated_url(token, "https://example.com/", None)
///     .await;
/// assert!(handle.is_some());
/// # connection.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CustomTabsConnection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    control: ControlHandle,
    warmup: Arc<dyn WarmupPool>,
    observers: Arc<ObserverList>,
}

impl fmt::Debug for CustomTabsConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomTabsConnection")
            .field("control", &self.inner.control)
            .field("observers", &self.inner.observers.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// CustomTabsConnection - Construction
// ============================================================================

impl CustomTabsConnection {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub(super) fn start(clients: ClientManager, platform: Platform, options: ConnectionOptions) -> Self {
        let warmup = Arc::clone(&platform.warmup);
        let observers = Arc::new(ObserverList::default());
        let control = ControlLoop::spawn(clients, platform, options, Arc::clone(&observers));

        Self {
            inner: Arc::new(ConnectionInner {
                control,
                warmup,
                observers,
            }),
        }
    }

    /// Sends a command and waits for the answer, or `fallback` if the
    /// loop is gone.
    async fn ask<T>(&self, fallback: T, make: impl FnOnce(Reply<T>) -> ControlCommand) -> T {
        match self.inner.control.request(make).await {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Control loop unavailable");
                fallback
            }
        }
    }

    fn post(&self, command: ControlCommand) -> bool {
        match self.inner.control.post(command) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Control loop unavailable");
                false
            }
        }
    }
}

// ============================================================================
// CustomTabsConnection - Sessions & Warmup
// ============================================================================

impl CustomTabsConnection {
    /// Registers a session for `uid`. `false` if the token is taken.
    pub async fn new_session(
        &self,
        token: SessionToken,
        uid: Uid,
        callback: Option<Arc<dyn SessionCallback>>,
    ) -> bool {
        self.ask(false, |reply| ControlCommand::NewSession {
            token,
            uid,
            callback,
            reply,
        })
        .await
    }

    /// Schedules engine initialization and a spare renderer.
    ///
    /// Returns immediately; sessions of `uid` are told through
    /// [`SessionCallback::on_warmup_completed`] when initialization is done.
    /// `false` only if the engine library is not available.
    pub fn warmup(&self, uid: Uid, flags: u64) -> bool {
        if !self.inner.warmup.is_engine_loaded() {
            debug!(uid = %uid, "Warmup before engine is loaded");
            return false;
        }
        self.post(ControlCommand::Warmup { uid, flags })
    }

    /// Forgets a session, destroying its speculation.
    pub async fn cleanup_session(&self, token: SessionToken) -> bool {
        self.ask(false, |reply| ControlCommand::CleanupSession {
            token,
            reply: Some(reply),
        })
        .await
    }

    /// Disconnect notification. Safe from any thread; the cleanup runs on
    /// the control loop.
    pub fn session_disconnected(&self, token: SessionToken) {
        self.post(ControlCommand::CleanupSession { token, reply: None });
    }

    /// Applies a per-session setting. `false` unless `uid` owns the session.
    pub async fn extra_command(&self, token: SessionToken, uid: Uid, command: ExtraCommand) -> bool {
        self.ask(false, |reply| ControlCommand::ExtraCommand {
            token,
            uid,
            command,
            reply,
        })
        .await
    }

    /// Replaces the package name of a session. Meant for tests.
    pub async fn override_package_name_for_session(
        &self,
        token: SessionToken,
        package: impl Into<String>,
    ) -> bool {
        let package = package.into();
        self.ask(false, |reply| ControlCommand::OverridePackage {
            token,
            package,
            reply,
        })
        .await
    }
}

// ============================================================================
// CustomTabsConnection - Speculation
// ============================================================================

impl CustomTabsConnection {
    /// Hints that `url` may be launched soon.
    ///
    /// - `url` set: throttled speculation in the session's mode, replacing
    ///   any existing speculation.
    /// - `url` empty, `other_likely_urls` given: prefetch the candidates.
    /// - both empty: cancel the session's own speculation.
    ///
    /// Invalid candidates are skipped.
    pub async fn may_launch_url(
        &self,
        token: SessionToken,
        uid: Uid,
        url: Option<&str>,
        extras: MayLaunchExtras,
        other_likely_urls: &[String],
    ) -> bool {
        let url = url.map(str::to_owned);
        let other_likely_urls = other_likely_urls.to_vec();
        self.ask(false, |reply| ControlCommand::MayLaunchUrl {
            token,
            uid,
            url,
            extras,
            other_likely_urls,
            reply,
        })
        .await
    }

    /// Hands the speculated renderer to a launching tab.
    ///
    /// `referrer` defaults to the session's app referrer. Returns `None`
    /// and destroys the speculation on any mismatch.
    pub async fn take_speculated_url(
        &self,
        token: SessionToken,
        url: &str,
        referrer: Option<&str>,
    ) -> Option<RendererHandle> {
        let url = url.to_owned();
        let referrer = referrer.map(str::to_owned);
        self.ask(None, |reply| ControlCommand::TakeSpeculatedUrl {
            token,
            url,
            referrer,
            reply,
        })
        .await
    }

    /// Returns `true` if a page-loading speculation could run for the
    /// session right now.
    pub async fn may_speculate(&self, token: SessionToken) -> bool {
        self.ask(false, |reply| ControlCommand::MaySpeculate { token, reply })
            .await
    }

    /// The current speculation, if any.
    pub async fn speculation_snapshot(&self) -> Option<SpeculationSnapshot> {
        self.ask(None, |reply| ControlCommand::Snapshot { reply })
            .await
    }
}

// ============================================================================
// CustomTabsConnection - Messaging
// ============================================================================

impl CustomTabsConnection {
    /// Requests a post-message channel to `origin`.
    ///
    /// Verification runs asynchronously; the channel becomes ready once it
    /// succeeded and a page is attached.
    pub async fn request_post_message_channel(&self, token: SessionToken, uid: Uid, origin: &str) -> bool {
        let origin = origin.to_owned();
        self.ask(false, |reply| ControlCommand::RequestChannel {
            token,
            uid,
            origin,
            reply,
        })
        .await
    }

    /// Attaches the page of the launched tab to the session's channel.
    pub async fn attach_page(&self, token: SessionToken, page: Arc<dyn PageChannel>) -> bool {
        self.ask(false, |reply| ControlCommand::AttachPage { token, page, reply })
            .await
    }

    /// Posts `message` to the session's page.
    pub async fn post_message(&self, token: SessionToken, uid: Uid, message: &str) -> PostMessageResult {
        let message = message.to_owned();
        self.ask(PostMessageResult::FailureMessagingError, |reply| {
            ControlCommand::PostMessage {
                token,
                uid,
                message,
                reply,
            }
        })
        .await
    }

    /// Delivers a message from the page to the session's client.
    pub async fn deliver_page_message(&self, token: SessionToken, message: &str) -> bool {
        let message = message.to_owned();
        self.ask(false, |reply| ControlCommand::PageMessage {
            token,
            message,
            reply,
        })
        .await
    }

    /// Verifies `relation` with `origin`; the result goes to
    /// [`SessionCallback::on_relationship_validated`].
    pub async fn validate_relationship(
        &self,
        token: SessionToken,
        uid: Uid,
        relation: Relation,
        origin: &str,
    ) -> bool {
        let origin = origin.to_owned();
        self.ask(false, |reply| ControlCommand::ValidateRelationship {
            token,
            uid,
            relation,
            origin,
            reply,
        })
        .await
    }
}

// ============================================================================
// CustomTabsConnection - Parallel Requests
// ============================================================================

impl CustomTabsConnection {
    /// Returns `true` if the session may issue parallel requests for
    /// `origin`.
    pub async fn can_do_parallel_request(&self, token: SessionToken, uid: Uid, origin: &str) -> bool {
        self.parallel_request_status(token, uid, None, origin)
            .await
            .is_success()
    }

    /// Issues a detached request to `url` on behalf of `origin`.
    pub async fn start_parallel_request(
        &self,
        token: SessionToken,
        uid: Uid,
        url: &str,
        origin: &str,
    ) -> bool {
        self.parallel_request_status(token, uid, Some(url), origin)
            .await
            .is_success()
    }

    /// Like [`start_parallel_request`](Self::start_parallel_request), with
    /// the failure reason. Without `url`, only checks.
    pub async fn parallel_request_status(
        &self,
        token: SessionToken,
        uid: Uid,
        url: Option<&str>,
        origin: &str,
    ) -> ParallelRequestStatus {
        let url = url.map(str::to_owned);
        let origin = origin.to_owned();
        self.ask(ParallelRequestStatus::FailureNotInitialized, |reply| {
            ControlCommand::ParallelRequest {
                token,
                uid,
                url,
                origin,
                reply,
            }
        })
        .await
    }
}

// ============================================================================
// CustomTabsConnection - Diagnostics & Administration
// ============================================================================

impl CustomTabsConnection {
    /// Warmup classification of a session.
    pub async fn warmup_state(&self, token: SessionToken, uid: Uid) -> WarmupState {
        self.ask(WarmupState::NoSessionNoWarmup, |reply| {
            ControlCommand::WarmupState { token, uid, reply }
        })
        .await
    }

    /// How a launch of `url` relates to the session's last prediction.
    pub async fn prediction_outcome(&self, token: SessionToken, url: &str) -> PredictionOutcome {
        let url = url.to_owned();
        self.ask(PredictionOutcome::NoPrediction, |reply| {
            ControlCommand::PredictionOutcome { token, url, reply }
        })
        .await
    }

    /// `android-app://<package>/` of the session.
    pub async fn default_referrer_for_session(&self, token: SessionToken) -> Option<Referrer> {
        self.ask(None, |reply| ControlCommand::DefaultReferrer { token, reply })
            .await
    }

    /// Returns `true` once engine initialization finished.
    pub async fn is_engine_initialized(&self) -> bool {
        self.ask(false, |reply| ControlCommand::EngineInitialized { reply })
            .await
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.ask(0, |reply| ControlCommand::SessionCount { reply })
            .await
    }

    /// Commands waiting for the control loop.
    #[must_use]
    pub fn pending_commands(&self) -> usize {
        self.inner.control.pending()
    }

    /// Clears the throttling history of `uid`.
    pub async fn reset_throttling(&self, uid: Uid) {
        self.ask((), |reply| ControlCommand::ResetThrottling { uid, reply })
            .await;
    }

    /// Bans `uid` from speculating.
    pub async fn ban(&self, uid: Uid) {
        self.ask((), |reply| ControlCommand::Ban { uid, reply })
            .await;
    }

    /// Drops all throttling state, persisted records included.
    pub async fn purge_throttle_entries_for_testing(&self) {
        self.ask((), |reply| ControlCommand::PurgeThrottling { reply })
            .await;
    }

    /// Registers a connection observer.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        self.inner.observers.add(observer);
    }

    /// Unregisters a connection observer.
    pub fn remove_observer(&self, observer: &Arc<dyn ConnectionObserver>) -> bool {
        self.inner.observers.remove(observer)
    }

    /// Destroys any speculation, forgets every session and stops the
    /// control loop. Later calls fail softly.
    pub async fn shutdown(&self) {
        self.ask((), |reply| ControlCommand::Shutdown { reply })
            .await;
    }
}

// ============================================================================
// Tests
// ============================================================================
