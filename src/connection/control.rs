//! Control loop.
//!
//! One task owns the [`ClientManager`], the throttlers and the
//! [`SpeculationSlot`]. Every entry point of the connection sends a
//! [`ControlCommand`] and, when it needs an answer, waits on a oneshot
//! reply. Commands run in submission order.
//!
//! Asynchronous work (engine initialization, load completion, origin
//! verification) runs on spawned tasks that post their result back as a
//! command, so state is only ever touched here.
//!
//! The loop keeps only a weak sender to itself: it ends when the last
//! [`CustomTabsConnection`](crate::CustomTabsConnection) clone is dropped or
//! on [`ControlCommand::Shutdown`], and destroys any live speculation on the
//! way out.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::client::{ClientManager, PredictionOutcome, SessionCallback, SessionRecord, WarmupState};
use crate::engine::{PageChannel, Platform, Relation, RendererHandle};
use crate::error::{Error, Result};
use crate::identifiers::{RendererId, SessionToken, Uid};
use crate::speculation::{
    DiscardReason, Speculation, SpeculationMode, SpeculationSlot, SpeculationSnapshot, TakeOutcome,
};
use crate::url_policy::{Origin, Referrer, parse_navigable_url};

use super::extras::{ExtraCommand, MayLaunchExtras};
use super::messaging::PostMessageResult;
use super::observer::{ConnectionEvent, ObserverList};
use super::options::ConnectionOptions;
use super::parallel::ParallelRequestStatus;

// ============================================================================
// Types
// ============================================================================

/// Reply channel of a command.
pub(crate) type Reply<T> = oneshot::Sender<T>;

/// Engine initialization progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineState {
    Cold,
    Initializing,
    Ready,
    Failed,
}

/// What to do once an origin verification finishes.
pub(crate) enum AfterVerify {
    /// Complete a post-message channel request.
    Channel,
    /// Report to the session callback.
    Relationship,
    /// Answer a parallel request.
    Parallel {
        url: Option<Url>,
        reply: Reply<ParallelRequestStatus>,
    },
}

// ============================================================================
// ControlCommand
// ============================================================================

/// Commands for the control loop.
pub(crate) enum ControlCommand {
    NewSession {
        token: SessionToken,
        uid: Uid,
        callback: Option<Arc<dyn SessionCallback>>,
        reply: Reply<bool>,
    },
    Warmup {
        uid: Uid,
        flags: u64,
    },
    MayLaunchUrl {
        token: SessionToken,
        uid: Uid,
        url: Option<String>,
        extras: MayLaunchExtras,
        other_likely_urls: Vec<String>,
        reply: Reply<bool>,
    },
    TakeSpeculatedUrl {
        token: SessionToken,
        url: String,
        referrer: Option<String>,
        reply: Reply<Option<RendererHandle>>,
    },
    RequestChannel {
        token: SessionToken,
        uid: Uid,
        origin: String,
        reply: Reply<bool>,
    },
    AttachPage {
        token: SessionToken,
        page: Arc<dyn PageChannel>,
        reply: Reply<bool>,
    },
    PostMessage {
        token: SessionToken,
        uid: Uid,
        message: String,
        reply: Reply<PostMessageResult>,
    },
    PageMessage {
        token: SessionToken,
        message: String,
        reply: Reply<bool>,
    },
    ValidateRelationship {
        token: SessionToken,
        uid: Uid,
        relation: Relation,
        origin: String,
        reply: Reply<bool>,
    },
    ExtraCommand {
        token: SessionToken,
        uid: Uid,
        command: ExtraCommand,
        reply: Reply<bool>,
    },
    OverridePackage {
        token: SessionToken,
        package: String,
        reply: Reply<bool>,
    },
    ParallelRequest {
        token: SessionToken,
        uid: Uid,
        url: Option<String>,
        origin: String,
        reply: Reply<ParallelRequestStatus>,
    },
    CleanupSession {
        token: SessionToken,
        reply: Option<Reply<bool>>,
    },

    // Diagnostics
    Snapshot {
        reply: Reply<Option<SpeculationSnapshot>>,
    },
    WarmupState {
        token: SessionToken,
        uid: Uid,
        reply: Reply<WarmupState>,
    },
    PredictionOutcome {
        token: SessionToken,
        url: String,
        reply: Reply<PredictionOutcome>,
    },
    MaySpeculate {
        token: SessionToken,
        reply: Reply<bool>,
    },
    DefaultReferrer {
        token: SessionToken,
        reply: Reply<Option<Referrer>>,
    },
    EngineInitialized {
        reply: Reply<bool>,
    },
    SessionCount {
        reply: Reply<usize>,
    },

    // Throttling administration
    ResetThrottling {
        uid: Uid,
        reply: Reply<()>,
    },
    Ban {
        uid: Uid,
        reply: Reply<()>,
    },
    PurgeThrottling {
        reply: Reply<()>,
    },

    // Posted by spawned tasks
    InitializationFinished {
        ok: bool,
    },
    SpeculationLoaded {
        renderer: RendererId,
        ok: bool,
    },
    Verified {
        token: SessionToken,
        origin: Origin,
        relation: Relation,
        ok: bool,
        then: AfterVerify,
    },

    Shutdown {
        reply: Reply<()>,
    },
}

// ============================================================================
// ControlHandle
// ============================================================================

/// Sending side of the control loop.
#[derive(Clone)]
pub(crate) struct ControlHandle {
    tx: mpsc::UnboundedSender<ControlCommand>,
    depth: Arc<AtomicUsize>,
    warn_depth: usize,
}

impl fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandle")
            .field("pending", &self.pending())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl ControlHandle {
    /// Enqueues `command` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] once the loop has stopped.
    pub(crate) fn post(&self, command: ControlCommand) -> Result<()> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if depth == self.warn_depth.saturating_add(1) {
            warn!(depth, max = self.warn_depth, "Control queue is backing up");
        }
        self.tx.send(command).map_err(|_| {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            Error::ConnectionClosed
        })
    }

    /// Enqueues a command and waits for its reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] or [`Error::ChannelClosed`] if
    /// the loop stopped before answering.
    pub(crate) async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> ControlCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.post(make(reply_tx))?;
        Ok(reply_rx.await?)
    }

    /// Commands sent but not yet picked up.
    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    fn downgrade(&self) -> WeakControlHandle {
        WeakControlHandle {
            tx: self.tx.downgrade(),
            depth: Arc::clone(&self.depth),
        }
    }
}

/// Sender used by the loop and its spawned tasks. Does not keep the loop
/// alive.
#[derive(Clone)]
pub(crate) struct WeakControlHandle {
    tx: mpsc::WeakUnboundedSender<ControlCommand>,
    depth: Arc<AtomicUsize>,
}

impl WeakControlHandle {
    fn post(&self, command: ControlCommand) {
        let Some(tx) = self.tx.upgrade() else {
            trace!("Control loop gone, dropping result");
            return;
        };
        self.depth.fetch_add(1, Ordering::SeqCst);
        if tx.send(command).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

// ============================================================================
// ControlLoop
// ============================================================================

/// State owned by the control task.
pub(crate) struct ControlLoop {
    pub(super) clients: ClientManager,
    pub(super) slot: SpeculationSlot,
    pub(super) platform: Platform,
    pub(super) options: ConnectionOptions,
    pub(super) observers: Arc<ObserverList>,
    pub(super) engine: EngineState,
    warmup_waiters: Vec<Uid>,
    spare_requested: bool,
    handle: WeakControlHandle,
}

impl ControlLoop {
    /// Spawns the loop on the current runtime.
    pub(crate) fn spawn(
        clients: ClientManager,
        platform: Platform,
        options: ConnectionOptions,
        observers: Arc<ObserverList>,
    ) -> ControlHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ControlHandle {
            tx,
            depth: Arc::new(AtomicUsize::new(0)),
            warn_depth: options.command_queue_warn_depth,
        };

        let control = Self {
            clients,
            slot: SpeculationSlot::new(),
            platform,
            options,
            observers,
            engine: EngineState::Cold,
            warmup_waiters: Vec::new(),
            spare_requested: false,
            handle: handle.downgrade(),
        };
        tokio::spawn(control.run(rx));

        handle
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControlCommand>) {
        debug!("Control loop started");
        let mut shutdown_reply = None;

        while let Some(command) = rx.recv().await {
            self.handle.depth.fetch_sub(1, Ordering::SeqCst);
            if let ControlCommand::Shutdown { reply } = command {
                shutdown_reply = Some(reply);
                break;
            }
            self.handle_command(command);
        }
        drop(rx);

        self.teardown();
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        info!("Control loop terminated");
    }

    fn handle_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::NewSession {
                token,
                uid,
                callback,
                reply,
            } => {
                let _ = reply.send(self.handle_new_session(token, uid, callback));
            }

            ControlCommand::Warmup { uid, flags } => self.handle_warmup(uid, flags),

            ControlCommand::MayLaunchUrl {
                token,
                uid,
                url,
                extras,
                other_likely_urls,
                reply,
            } => {
                let allowed = self.handle_may_launch_url(token, uid, url, &extras, &other_likely_urls);
                let _ = reply.send(allowed);
            }

            ControlCommand::TakeSpeculatedUrl {
                token,
                url,
                referrer,
                reply,
            } => {
                let _ = reply.send(self.handle_take_speculated_url(token, &url, referrer.as_deref()));
            }

            ControlCommand::RequestChannel {
                token,
                uid,
                origin,
                reply,
            } => {
                let _ = reply.send(self.handle_request_channel(token, uid, &origin));
            }

            ControlCommand::AttachPage { token, page, reply } => {
                let _ = reply.send(self.handle_attach_page(token, page));
            }

            ControlCommand::PostMessage {
                token,
                uid,
                message,
                reply,
            } => {
                let _ = reply.send(self.handle_post_message(token, uid, &message));
            }

            ControlCommand::PageMessage {
                token,
                message,
                reply,
            } => {
                let _ = reply.send(self.handle_page_message(token, &message));
            }

            ControlCommand::ValidateRelationship {
                token,
                uid,
                relation,
                origin,
                reply,
            } => {
                let _ = reply.send(self.handle_validate_relationship(token, uid, relation, &origin));
            }

            ControlCommand::ExtraCommand {
                token,
                uid,
                command,
                reply,
            } => {
                let _ = reply.send(self.handle_extra_command(token, uid, command));
            }

            ControlCommand::OverridePackage {
                token,
                package,
                reply,
            } => {
                let _ = reply.send(self.clients.override_package_name_for_session(token, package));
            }

            ControlCommand::ParallelRequest {
                token,
                uid,
                url,
                origin,
                reply,
            } => self.handle_parallel_request(token, uid, url, &origin, reply),

            ControlCommand::CleanupSession { token, reply } => {
                let existed = self.handle_cleanup_session(token);
                if let Some(reply) = reply {
                    let _ = reply.send(existed);
                }
            }

            ControlCommand::Snapshot { reply } => {
                let _ = reply.send(self.slot.snapshot());
            }

            ControlCommand::WarmupState { token, uid, reply } => {
                let _ = reply.send(self.clients.warmup_state(token, uid));
            }

            ControlCommand::PredictionOutcome { token, url, reply } => {
                let outcome = parse_navigable_url(&url)
                    .map(|url| self.clients.prediction_outcome(token, &url))
                    .unwrap_or(PredictionOutcome::NoPrediction);
                let _ = reply.send(outcome);
            }

            ControlCommand::MaySpeculate { token, reply } => {
                let allowed = self.clients.session(token).is_some_and(|record| {
                    self.speculation_blocker(record, record.speculation_mode)
                        .is_none()
                });
                let _ = reply.send(allowed);
            }

            ControlCommand::DefaultReferrer { token, reply } => {
                let _ = reply.send(self.clients.default_referrer_for_session(token));
            }

            ControlCommand::EngineInitialized { reply } => {
                let _ = reply.send(self.engine == EngineState::Ready);
            }

            ControlCommand::SessionCount { reply } => {
                let _ = reply.send(self.clients.len());
            }

            ControlCommand::ResetThrottling { uid, reply } => {
                self.clients.throttlers_mut().reset_throttling(uid);
                let _ = reply.send(());
            }

            ControlCommand::Ban { uid, reply } => {
                self.clients.throttlers_mut().ban(uid);
                let _ = reply.send(());
            }

            ControlCommand::PurgeThrottling { reply } => {
                self.clients.throttlers_mut().purge_all_entries_for_testing();
                let _ = reply.send(());
            }

            ControlCommand::InitializationFinished { ok } => self.handle_initialization_finished(ok),

            ControlCommand::SpeculationLoaded { renderer, ok } => {
                let navigator = Arc::clone(&self.platform.navigator);
                if let Some(snapshot) = self.slot.mark_loaded(navigator.as_ref(), renderer, ok) {
                    self.notify_discarded(snapshot, DiscardReason::LoadFailed);
                }
            }

            ControlCommand::Verified {
                token,
                origin,
                relation,
                ok,
                then,
            } => self.handle_verified(token, origin, relation, ok, then),

            // Intercepted by the loop before dispatch.
            ControlCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

// ============================================================================
// ControlLoop - Sessions & Warmup
// ============================================================================

impl ControlLoop {
    fn handle_new_session(
        &mut self,
        token: SessionToken,
        uid: Uid,
        callback: Option<Arc<dyn SessionCallback>>,
    ) -> bool {
        match self.clients.new_session(token, uid, callback) {
            Ok(()) => {
                self.observers
                    .notify(&ConnectionEvent::SessionCreated { session: token, uid });
                true
            }
            Err(e) => {
                debug!(session = %token, error = %e, "newSession rejected");
                false
            }
        }
    }

    fn handle_warmup(&mut self, uid: Uid, flags: u64) {
        debug!(uid = %uid, flags, "Warmup requested");
        self.clients.record_uid_has_called_warmup(uid);
        self.spare_requested = true;

        if self.engine == EngineState::Ready {
            self.maybe_create_spare();
            self.notify_warmup_completed(uid);
            return;
        }

        if !self.warmup_waiters.contains(&uid) {
            self.warmup_waiters.push(uid);
        }
        self.ensure_engine_initialization();
    }

    /// Starts engine initialization unless it is running or done.
    fn ensure_engine_initialization(&mut self) {
        if matches!(self.engine, EngineState::Initializing | EngineState::Ready) {
            return;
        }
        self.engine = EngineState::Initializing;

        let warmup = Arc::clone(&self.platform.warmup);
        let handle = self.handle.clone();
        tokio::spawn(async move {
            let ok = match warmup.initialize().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Engine initialization failed");
                    false
                }
            };
            handle.post(ControlCommand::InitializationFinished { ok });
        });
    }

    fn handle_initialization_finished(&mut self, ok: bool) {
        let waiters = std::mem::take(&mut self.warmup_waiters);
        if !ok {
            self.engine = EngineState::Failed;
            return;
        }

        self.engine = EngineState::Ready;
        info!(waiters = waiters.len(), "Engine initialized");
        if self.spare_requested {
            self.maybe_create_spare();
        }
        for uid in waiters {
            self.notify_warmup_completed(uid);
        }
    }

    fn notify_warmup_completed(&self, uid: Uid) {
        for token in self.clients.sessions_for_uid(uid) {
            if let Some(callback) = self.clients.session(token).and_then(SessionRecord::callback) {
                callback.on_warmup_completed();
            }
        }
        self.observers
            .notify(&ConnectionEvent::WarmupCompleted { uid });
    }

    /// A spare renderer is only kept while nothing is speculating.
    fn maybe_create_spare(&self) {
        if self.slot.is_idle() && !self.platform.warmup.has_spare_renderer() {
            self.platform.warmup.create_spare_renderer();
        }
    }

    fn handle_extra_command(&mut self, token: SessionToken, uid: Uid, command: ExtraCommand) -> bool {
        let record = match self.clients.owned_session_mut(token, uid) {
            Ok(record) => record,
            Err(e) => {
                debug!(session = %token, error = %e, "extraCommand rejected");
                return false;
            }
        };

        match command {
            ExtraCommand::SetSpeculationMode(mode) => record.speculation_mode = mode,
            ExtraCommand::SetIgnoreFragments(value) => record.ignore_fragments = value,
            ExtraCommand::SetPrerenderOnCellular(value) => record.prerender_on_cellular = value,
            ExtraCommand::SetHideDomain(value) => record.hide_domain = value,
            ExtraCommand::SetAllowParallelRequest(value) => record.allow_parallel_request = value,
        }
        true
    }

    fn handle_cleanup_session(&mut self, token: SessionToken) -> bool {
        let navigator = Arc::clone(&self.platform.navigator);
        if let Some(snapshot) =
            self.slot
                .discard_owned_by(navigator.as_ref(), token, DiscardReason::SessionCleanedUp)
        {
            self.notify_discarded(snapshot, DiscardReason::SessionCleanedUp);
        }

        if self.clients.cleanup_session(token).is_none() {
            return false;
        }
        self.observers
            .notify(&ConnectionEvent::SessionCleanedUp { session: token });
        true
    }

    fn teardown(&mut self) {
        let navigator = Arc::clone(&self.platform.navigator);
        if let Some(snapshot) = self.slot.discard(navigator.as_ref(), DiscardReason::Shutdown) {
            self.notify_discarded(snapshot, DiscardReason::Shutdown);
        }
        for token in self.clients.cleanup_all() {
            self.observers
                .notify(&ConnectionEvent::SessionCleanedUp { session: token });
        }
    }
}

// ============================================================================
// ControlLoop - Speculation
// ============================================================================

/// What a high-confidence request will do, decided from the session.
struct Plan {
    mode: SpeculationMode,
    ignore_fragments: bool,
    referrer: Option<Referrer>,
    blocker: Option<&'static str>,
}

impl ControlLoop {
    fn handle_may_launch_url(
        &mut self,
        token: SessionToken,
        uid: Uid,
        url: Option<String>,
        extras: &MayLaunchExtras,
        other_likely_urls: &[String],
    ) -> bool {
        match url.filter(|raw| !raw.trim().is_empty()) {
            None if other_likely_urls.is_empty() => self.cancel_speculation(token, uid),
            None => self.low_confidence(token, uid, other_likely_urls),
            Some(raw) => self.high_confidence(token, uid, &raw, extras, other_likely_urls),
        }
    }

    /// Null-URL request: the caller's own speculation is torn down.
    fn cancel_speculation(&mut self, token: SessionToken, uid: Uid) -> bool {
        if let Err(e) = self.clients.owned_session_mut(token, uid) {
            debug!(session = %token, error = %e, "Cancel rejected");
            return false;
        }

        let navigator = Arc::clone(&self.platform.navigator);
        if let Some(snapshot) =
            self.slot
                .discard_owned_by(navigator.as_ref(), token, DiscardReason::Cancelled)
        {
            self.notify_discarded(snapshot, DiscardReason::Cancelled);
        }
        true
    }

    /// Candidate list without a main URL: prefetch only, no speculation.
    fn low_confidence(&mut self, token: SessionToken, uid: Uid, candidates: &[String]) -> bool {
        if let Err(e) = self.clients.owned_session_mut(token, uid) {
            debug!(session = %token, error = %e, "Low-confidence request rejected");
            return false;
        }
        if !self.platform.warmup.is_engine_loaded() {
            return false;
        }
        self.ensure_engine_initialization();
        self.prefetch_candidates(candidates);
        true
    }

    fn high_confidence(
        &mut self,
        token: SessionToken,
        uid: Uid,
        raw: &str,
        extras: &MayLaunchExtras,
        candidates: &[String],
    ) -> bool {
        let url = match parse_navigable_url(raw) {
            Ok(url) => url,
            Err(e) => {
                debug!(session = %token, error = %e, "mayLaunchUrl rejected");
                return false;
            }
        };
        if !self.platform.warmup.is_engine_loaded() {
            debug!("mayLaunchUrl before engine is loaded");
            return false;
        }
        if !self
            .clients
            .update_stats_and_return_whether_allowed(token, uid, &url)
        {
            return false;
        }
        self.ensure_engine_initialization();

        let navigator = Arc::clone(&self.platform.navigator);
        if let Some(snapshot) = self.slot.discard(navigator.as_ref(), DiscardReason::Replaced) {
            self.notify_discarded(snapshot, DiscardReason::Replaced);
        }

        let Some(plan) = self.plan(token, extras) else {
            return false;
        };

        match plan {
            Plan {
                mode,
                ignore_fragments,
                referrer: Some(referrer),
                blocker: None,
            } if mode.loads_page() => {
                self.start_speculation(token, uid, url, referrer, mode, ignore_fragments);
            }
            Plan {
                mode: SpeculationMode::PrefetchOnly,
                ..
            } => {
                self.maybe_create_spare();
                navigator.prefetch(std::slice::from_ref(&url));
            }
            Plan { blocker, .. } => {
                if let Some(reason) = blocker {
                    debug!(session = %token, reason, "Speculation downgraded to spare renderer");
                }
                self.maybe_create_spare();
            }
        }

        self.prefetch_candidates(candidates);
        true
    }

    fn plan(&self, token: SessionToken, extras: &MayLaunchExtras) -> Option<Plan> {
        let record = self.clients.session(token)?;
        let mode = extras.effective_mode(record.speculation_mode);
        let referrer = resolve_referrer(record, extras.referrer.as_deref());
        let blocker = if !mode.loads_page() {
            None
        } else if referrer.is_none() {
            Some("no referrer for session")
        } else {
            self.speculation_blocker(record, mode)
        };

        Some(Plan {
            mode,
            ignore_fragments: record.ignore_fragments,
            referrer,
            blocker,
        })
    }

    /// Returns why a page-loading speculation may not run now.
    pub(super) fn speculation_blocker(
        &self,
        record: &SessionRecord,
        mode: SpeculationMode,
    ) -> Option<&'static str> {
        let device = &self.platform.device;
        if device.is_low_end_device() {
            Some("low-end device")
        } else if device.is_on_cellular() && !record.prerender_on_cellular {
            Some("cellular network")
        } else if mode == SpeculationMode::HiddenTab && device.third_party_cookies_blocked() {
            Some("third-party cookies blocked")
        } else {
            None
        }
    }

    fn start_speculation(
        &mut self,
        token: SessionToken,
        uid: Uid,
        url: Url,
        referrer: Referrer,
        mode: SpeculationMode,
        ignore_fragments: bool,
    ) {
        let navigator = Arc::clone(&self.platform.navigator);
        let handle = match mode {
            SpeculationMode::Prerender => navigator.begin_prerender(&url, &referrer),
            SpeculationMode::HiddenTab => {
                let spare = self.platform.warmup.take_spare_renderer(false, true);
                navigator.begin_hidden_tab_load(&url, &referrer, spare)
            }
            SpeculationMode::NoSpeculation | SpeculationMode::PrefetchOnly => None,
        };

        let Some(handle) = handle else {
            debug!(session = %token, url = %url, "Engine declined speculation");
            self.maybe_create_spare();
            return;
        };

        let renderer = handle.id();
        let speculation = Speculation::new(token, uid, url, referrer, mode, ignore_fragments, handle);
        if let Some(replaced) = self.slot.install(navigator.as_ref(), speculation) {
            self.notify_discarded(replaced, DiscardReason::Replaced);
        }
        if let Some(snapshot) = self.slot.snapshot() {
            self.observers
                .notify(&ConnectionEvent::SpeculationStarted(snapshot));
        }

        let handle = self.handle.clone();
        tokio::spawn(async move {
            let ok = navigator.wait_for_load(renderer).await;
            handle.post(ControlCommand::SpeculationLoaded { renderer, ok });
        });
    }

    fn prefetch_candidates(&self, candidates: &[String]) {
        let urls: Vec<Url> = candidates
            .iter()
            .filter_map(|raw| parse_navigable_url(raw).ok())
            .take(self.options.max_low_confidence_urls)
            .collect();
        if !urls.is_empty() {
            trace!(count = urls.len(), "Prefetching low-confidence candidates");
            self.platform.navigator.prefetch(&urls);
        }
    }

    fn handle_take_speculated_url(
        &mut self,
        token: SessionToken,
        raw: &str,
        referrer: Option<&str>,
    ) -> Option<RendererHandle> {
        let navigator = Arc::clone(&self.platform.navigator);

        let Ok(url) = parse_navigable_url(raw) else {
            if let Some(snapshot) = self.slot.discard(navigator.as_ref(), DiscardReason::UrlMismatch) {
                self.notify_discarded(snapshot, DiscardReason::UrlMismatch);
            }
            return None;
        };

        self.clients.register_launch(token, &url);
        let consumer_uid = self.clients.uid_for_session(token);
        let referrer = match referrer {
            Some(raw) => Referrer::parse(raw).ok(),
            None => self.clients.default_referrer_for_session(token),
        };
        let Some(referrer) = referrer else {
            if let Some(snapshot) =
                self.slot
                    .discard(navigator.as_ref(), DiscardReason::ReferrerMismatch)
            {
                self.notify_discarded(snapshot, DiscardReason::ReferrerMismatch);
            }
            return None;
        };

        match self
            .slot
            .take(navigator.as_ref(), token, consumer_uid, &url, &referrer)
        {
            TakeOutcome::Hit { handle, snapshot } => {
                self.observers
                    .notify(&ConnectionEvent::SpeculationConsumed(snapshot));
                Some(handle)
            }
            TakeOutcome::Discarded { reason, snapshot } => {
                self.notify_discarded(snapshot, reason);
                None
            }
            TakeOutcome::Idle => None,
        }
    }

    pub(super) fn notify_discarded(&self, snapshot: SpeculationSnapshot, reason: DiscardReason) {
        self.observers
            .notify(&ConnectionEvent::SpeculationDiscarded { snapshot, reason });
    }
}

/// Referrer for a speculation: the requested one if the session may claim
/// it, else the session's default.
fn resolve_referrer(record: &SessionRecord, requested: Option<&str>) -> Option<Referrer> {
    if let Some(raw) = requested {
        match Referrer::parse(raw) {
            Ok(referrer) if record.accepts_referrer(&referrer) => return Some(referrer),
            Ok(referrer) => {
                debug!(session = %record.token(), referrer = %referrer, "Referrer not accepted");
            }
            Err(e) => debug!(session = %record.token(), error = %e, "Invalid referrer"),
        }
    }
    record.default_referrer()
}

// ============================================================================
// ControlLoop - Verification
// ============================================================================

impl ControlLoop {
    fn handle_validate_relationship(
        &mut self,
        token: SessionToken,
        uid: Uid,
        relation: Relation,
        origin: &str,
    ) -> bool {
        let Ok(origin) = Origin::parse(origin) else {
            return false;
        };
        let package = match self.clients.owned_session_mut(token, uid) {
            Ok(record) => record.package().map(str::to_owned),
            Err(e) => {
                debug!(session = %token, error = %e, "validateRelationship rejected");
                return false;
            }
        };
        let Some(package) = package else {
            return false;
        };

        self.spawn_verification(token, package, origin, relation, AfterVerify::Relationship);
        true
    }

    /// Runs the origin verifier off the loop and posts the result back.
    pub(super) fn spawn_verification(
        &self,
        token: SessionToken,
        package: String,
        origin: Origin,
        relation: Relation,
        then: AfterVerify,
    ) {
        let verifier = Arc::clone(&self.platform.verifier);
        let limit = self.options.origin_verification_timeout;
        let handle = self.handle.clone();

        tokio::spawn(async move {
            let ok = match timeout(limit, verifier.verify(&package, &origin, relation)).await {
                Ok(ok) => ok,
                Err(_) => {
                    warn!(
                        package = %package,
                        origin = %origin,
                        timeout_ms = limit.as_millis() as u64,
                        "Origin verification timed out"
                    );
                    false
                }
            };
            handle.post(ControlCommand::Verified {
                token,
                origin,
                relation,
                ok,
                then,
            });
        });
    }

    fn handle_verified(
        &mut self,
        token: SessionToken,
        origin: Origin,
        relation: Relation,
        ok: bool,
        then: AfterVerify,
    ) {
        debug!(session = %token, origin = %origin, ?relation, ok, "Origin verification finished");
        if ok {
            self.clients.add_verified_origin(token, origin.clone(), relation);
        }

        match then {
            AfterVerify::Channel => self.finish_channel_validation(token, &origin, ok),
            AfterVerify::Relationship => {
                if let Some(callback) = self.clients.session(token).and_then(SessionRecord::callback) {
                    callback.on_relationship_validated(relation, &origin, ok);
                }
            }
            AfterVerify::Parallel { url, reply } => {
                let status = self.finish_parallel_request(token, url, &origin, ok);
                let _ = reply.send(status);
            }
        }
    }
}
