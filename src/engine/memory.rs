//! In-process engine implementation.
//!
//! [`MemoryPlatform`] stands in for the browser engine: it hands out
//! renderer ids, remembers which ones are alive, and answers device and
//! verification queries from switches the caller flips. Loads finish after
//! a configurable latency.
//!
//! # Example
//!
//! ```
//! use customtabs_connection::engine::{MemoryPlatform, Navigator, RendererKind, WarmupPool};
//! use customtabs_connection::url_policy::Referrer;
//! use url::Url;
//!
//! let engine = MemoryPlatform::new();
//! let url = Url::parse("https://example.com/").unwrap();
//! let referrer = Referrer::for_package("com.example.app").unwrap();
//!
//! let handle = engine.begin_prerender(&url, &referrer).unwrap();
//! assert_eq!(handle.kind(), RendererKind::Prerender);
//! assert_eq!(engine.live_renderer_count(), 1);
//!
//! engine.destroy_renderer(handle);
//! assert_eq!(engine.live_renderer_count(), 0);
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::identifiers::{RendererId, Uid};
use crate::url_policy::{Origin, Referrer, urls_match};

use super::collaborators::{
    DeviceConditions, Navigator, OriginVerifier, PackageResolver, PageChannel, Relation,
    RendererHandle, RendererKind, WarmupPool,
};

// ============================================================================
// Types
// ============================================================================

/// A renderer handed out and not yet destroyed or adopted.
#[derive(Debug, Clone)]
struct LiveRenderer {
    kind: RendererKind,
    url: Option<Url>,
}

/// Verified `(package, origin, relation)` triple.
type Grant = (String, Origin, Relation);

// ============================================================================
// MemoryPlatform
// ============================================================================

/// In-process engine with leak accounting.
pub struct MemoryPlatform {
    engine_loaded: AtomicBool,
    init_count: AtomicUsize,
    spare: Mutex<Option<RendererId>>,
    live: Mutex<FxHashMap<RendererId, LiveRenderer>>,
    adopted: Mutex<FxHashSet<RendererId>>,
    destroyed: AtomicUsize,
    unknown_destroys: AtomicUsize,
    load_latency: Mutex<Duration>,
    verify_latency: Mutex<Duration>,
    low_end: AtomicBool,
    cellular: AtomicBool,
    cookies_blocked: AtomicBool,
    grants: Mutex<FxHashSet<Grant>>,
    packages: Mutex<FxHashMap<Uid, String>>,
    trusted: Mutex<FxHashSet<String>>,
    prefetched: Mutex<Vec<Url>>,
    detached: Mutex<Vec<(Url, Origin)>>,
}

impl fmt::Debug for MemoryPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPlatform")
            .field("live", &self.live_renderer_count())
            .field("has_spare", &self.spare.lock().is_some())
            .field("destroyed", &self.destroyed_count())
            .finish_non_exhaustive()
    }
}

impl Default for MemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MemoryPlatform - Constructor
// ============================================================================

impl MemoryPlatform {
    /// Creates a loaded engine on a fast, unmetered, high-end device.
    #[must_use]
    pub fn new() -> Self {
        Self {
            engine_loaded: AtomicBool::new(true),
            init_count: AtomicUsize::new(0),
            spare: Mutex::new(None),
            live: Mutex::new(FxHashMap::default()),
            adopted: Mutex::new(FxHashSet::default()),
            destroyed: AtomicUsize::new(0),
            unknown_destroys: AtomicUsize::new(0),
            load_latency: Mutex::new(Duration::from_millis(5)),
            verify_latency: Mutex::new(Duration::ZERO),
            low_end: AtomicBool::new(false),
            cellular: AtomicBool::new(false),
            cookies_blocked: AtomicBool::new(false),
            grants: Mutex::new(FxHashSet::default()),
            packages: Mutex::new(FxHashMap::default()),
            trusted: Mutex::new(FxHashSet::default()),
            prefetched: Mutex::new(Vec::new()),
            detached: Mutex::new(Vec::new()),
        }
    }
}

// ============================================================================
// MemoryPlatform - Switches
// ============================================================================

impl MemoryPlatform {
    /// Marks the engine library as (un)available.
    pub fn set_engine_loaded(&self, loaded: bool) {
        self.engine_loaded.store(loaded, Ordering::SeqCst);
    }

    /// Sets how long speculative loads take.
    pub fn set_load_latency(&self, latency: Duration) {
        *self.load_latency.lock() = latency;
    }

    /// Sets how long origin verification takes.
    pub fn set_verify_latency(&self, latency: Duration) {
        *self.verify_latency.lock() = latency;
    }

    /// Simulates a low-end device.
    pub fn set_low_end_device(&self, low_end: bool) {
        self.low_end.store(low_end, Ordering::SeqCst);
    }

    /// Simulates a cellular connection.
    pub fn set_on_cellular(&self, cellular: bool) {
        self.cellular.store(cellular, Ordering::SeqCst);
    }

    /// Simulates the third-party cookie blocking setting.
    pub fn set_third_party_cookies_blocked(&self, blocked: bool) {
        self.cookies_blocked.store(blocked, Ordering::SeqCst);
    }

    /// Registers the package name of a UID.
    pub fn register_package(&self, uid: Uid, package: impl Into<String>) {
        self.packages.lock().insert(uid, package.into());
    }

    /// Marks `package` as a trusted publisher.
    pub fn trust_publisher(&self, package: impl Into<String>) {
        self.trusted.lock().insert(package.into());
    }

    /// Grants `package` the `relation` with `origin`.
    pub fn grant_origin(&self, package: impl Into<String>, origin: Origin, relation: Relation) {
        self.grants.lock().insert((package.into(), origin, relation));
    }
}

// ============================================================================
// MemoryPlatform - Inspection
// ============================================================================

impl MemoryPlatform {
    /// Renderers handed out and neither destroyed nor adopted by a tab.
    #[must_use]
    pub fn live_renderer_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Returns `true` if `id` is handed out and not destroyed or adopted.
    #[must_use]
    pub fn is_live(&self, id: RendererId) -> bool {
        self.live.lock().contains_key(&id)
    }

    /// What the live renderer `id` is serving, if it is live.
    #[must_use]
    pub fn live_renderer_kind(&self, id: RendererId) -> Option<RendererKind> {
        self.live.lock().get(&id).map(|renderer| renderer.kind)
    }

    /// Renderers adopted by tabs.
    #[must_use]
    pub fn adopted_count(&self) -> usize {
        self.adopted.lock().len()
    }

    /// Total successful destructions.
    #[must_use]
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Destructions of ids that were not alive (should stay zero).
    #[must_use]
    pub fn unknown_destroy_count(&self) -> usize {
        self.unknown_destroys.load(Ordering::SeqCst)
    }

    /// Number of engine initializations.
    #[must_use]
    pub fn init_count(&self) -> usize {
        self.init_count.load(Ordering::SeqCst)
    }

    /// URLs passed to [`Navigator::prefetch`].
    #[must_use]
    pub fn prefetched_urls(&self) -> Vec<Url> {
        self.prefetched.lock().clone()
    }

    /// Detached requests issued.
    #[must_use]
    pub fn detached_requests(&self) -> Vec<(Url, Origin)> {
        self.detached.lock().clone()
    }

    fn hand_out(&self, kind: RendererKind, url: Option<Url>) -> RendererHandle {
        let id = RendererId::next();
        self.live.lock().insert(id, LiveRenderer { kind, url });
        trace!(renderer = %id, ?kind, "Renderer handed out");
        RendererHandle::new(id, kind)
    }
}

// ============================================================================
// WarmupPool
// ============================================================================

#[async_trait]
impl WarmupPool for MemoryPlatform {
    fn is_engine_loaded(&self) -> bool {
        self.engine_loaded.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<()> {
        if !self.is_engine_loaded() {
            return Err(Error::config("Engine library not loaded"));
        }
        self.init_count.fetch_add(1, Ordering::SeqCst);
        debug!("Engine initialized");
        Ok(())
    }

    fn has_spare_renderer(&self) -> bool {
        self.spare.lock().is_some()
    }

    fn create_spare_renderer(&self) {
        let mut spare = self.spare.lock();
        if spare.is_none() {
            let id = RendererId::next();
            *spare = Some(id);
            trace!(renderer = %id, "Spare renderer created");
        }
    }

    fn take_spare_renderer(&self, _incognito: bool, _hidden: bool) -> Option<RendererHandle> {
        let id = self.spare.lock().take()?;
        self.live.lock().insert(
            id,
            LiveRenderer {
                kind: RendererKind::Spare,
                url: None,
            },
        );
        Some(RendererHandle::new(id, RendererKind::Spare))
    }
}

// ============================================================================
// Navigator
// ============================================================================

#[async_trait]
impl Navigator for MemoryPlatform {
    fn begin_prerender(&self, url: &Url, _referrer: &Referrer) -> Option<RendererHandle> {
        Some(self.hand_out(RendererKind::Prerender, Some(url.clone())))
    }

    fn begin_hidden_tab_load(
        &self,
        url: &Url,
        _referrer: &Referrer,
        spare: Option<RendererHandle>,
    ) -> Option<RendererHandle> {
        let Some(spare) = spare else {
            return Some(self.hand_out(RendererKind::HiddenTab, Some(url.clone())));
        };

        let id = spare.id();
        self.live.lock().insert(
            id,
            LiveRenderer {
                kind: RendererKind::HiddenTab,
                url: Some(url.clone()),
            },
        );
        Some(RendererHandle::new(id, RendererKind::HiddenTab))
    }

    async fn wait_for_load(&self, renderer: RendererId) -> bool {
        let latency = *self.load_latency.lock();
        tokio::time::sleep(latency).await;
        self.is_live(renderer)
    }

    fn destroy_renderer(&self, handle: RendererHandle) {
        let id = handle.id();
        let removed = self.live.lock().remove(&id).is_some();
        let adopted = self.adopted.lock().remove(&id);
        if removed || adopted {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            trace!(renderer = %id, "Renderer destroyed");
        } else {
            self.unknown_destroys.fetch_add(1, Ordering::SeqCst);
            warn!(renderer = %id, "Destroying unknown renderer");
        }
    }

    fn match_and_adopt(&self, handle: &RendererHandle, url: &Url) -> bool {
        let mut live = self.live.lock();
        let matches = live
            .get(&handle.id())
            .and_then(|r| r.url.as_ref())
            .is_some_and(|loaded| urls_match(loaded, url, true));
        if matches {
            live.remove(&handle.id());
            self.adopted.lock().insert(handle.id());
        }
        matches
    }

    fn prefetch(&self, urls: &[Url]) {
        self.prefetched.lock().extend(urls.iter().cloned());
    }

    fn start_detached_request(&self, url: &Url, referrer: &Origin) -> bool {
        self.detached.lock().push((url.clone(), referrer.clone()));
        true
    }
}

// ============================================================================
// OriginVerifier
// ============================================================================

#[async_trait]
impl OriginVerifier for MemoryPlatform {
    async fn verify(&self, package: &str, origin: &Origin, relation: Relation) -> bool {
        let latency = *self.verify_latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.grants
            .lock()
            .contains(&(package.to_owned(), origin.clone(), relation))
    }
}

// ============================================================================
// DeviceConditions / PackageResolver
// ============================================================================

impl DeviceConditions for MemoryPlatform {
    fn is_low_end_device(&self) -> bool {
        self.low_end.load(Ordering::SeqCst)
    }

    fn is_on_cellular(&self) -> bool {
        self.cellular.load(Ordering::SeqCst)
    }

    fn third_party_cookies_blocked(&self) -> bool {
        self.cookies_blocked.load(Ordering::SeqCst)
    }
}

impl PackageResolver for MemoryPlatform {
    fn package_for_uid(&self, uid: Uid) -> Option<String> {
        self.packages.lock().get(&uid).cloned()
    }

    fn is_trusted_publisher(&self, package: &str) -> bool {
        self.trusted.lock().contains(package)
    }
}

// ============================================================================
// MemoryPage
// ============================================================================

/// Page that records the messages posted to it.
#[derive(Debug)]
pub struct MemoryPage {
    alive: AtomicBool,
    received: Mutex<Vec<String>>,
}

impl Default for MemoryPage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPage {
    /// Creates a live page.
    #[must_use]
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            received: Mutex::new(Vec::new()),
        }
    }

    /// Simulates the page's web contents being destroyed.
    pub fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// Messages delivered so far.
    #[must_use]
    pub fn received(&self) -> Vec<String> {
        self.received.lock().clone()
    }
}

impl PageChannel for MemoryPage {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn post_to_page(&self, message: &str) -> bool {
        if !self.is_alive() {
            return false;
        }
        self.received.lock().push(message.to_owned());
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
