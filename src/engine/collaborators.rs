//! Collaborator traits and renderer handles.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;
use crate::identifiers::{RendererId, Uid};
use crate::url_policy::{Origin, Referrer};

// ============================================================================
// RendererHandle
// ============================================================================

/// What a renderer was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RendererKind {
    /// Warmed renderer with no navigation.
    Spare,
    /// Prerendered page.
    Prerender,
    /// Page loading in a hidden tab.
    HiddenTab,
}

/// Owned handle to an engine renderer.
///
/// Not `Clone`: whoever holds the handle is responsible for giving it back
/// through [`Navigator::destroy_renderer`] or handing it on. Moving the
/// handle into the destroy call makes a second destruction impossible.
#[derive(PartialEq, Eq)]
pub struct RendererHandle {
    id: RendererId,
    kind: RendererKind,
}

impl RendererHandle {
    /// Creates a handle. Only engines should call this.
    #[must_use]
    pub fn new(id: RendererId, kind: RendererKind) -> Self {
        Self { id, kind }
    }

    /// Returns the renderer id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> RendererId {
        self.id
    }

    /// Returns what the renderer was created for.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> RendererKind {
        self.kind
    }
}

impl fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

// ============================================================================
// Relation
// ============================================================================

/// Relationship a package claims with a web origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    /// The package may act as the origin (referrer, post-message, parallel
    /// requests).
    UseAsOrigin,
    /// The package may handle every URL of the origin (link handling).
    HandleAllUrls,
}

// ============================================================================
// WarmupPool
// ============================================================================

/// Engine initialization and spare-renderer pool.
#[async_trait]
pub trait WarmupPool: Send + Sync {
    /// Returns `true` once the engine library is available.
    fn is_engine_loaded(&self) -> bool;

    /// Pre-initializes the engine. Called at most once per connection.
    async fn initialize(&self) -> Result<()>;

    /// Returns `true` if a spare renderer is waiting.
    fn has_spare_renderer(&self) -> bool;

    /// Starts creating a spare renderer if none is waiting.
    fn create_spare_renderer(&self);

    /// Takes the waiting spare renderer, if any.
    fn take_spare_renderer(&self, incognito: bool, hidden: bool) -> Option<RendererHandle>;
}

// ============================================================================
// Navigator
// ============================================================================

/// Speculative loads and detached network activity.
#[async_trait]
pub trait Navigator: Send + Sync {
    /// Starts prerendering `url`.
    fn begin_prerender(&self, url: &Url, referrer: &Referrer) -> Option<RendererHandle>;

    /// Starts loading `url` in a hidden tab, reusing `spare` if given.
    fn begin_hidden_tab_load(
        &self,
        url: &Url,
        referrer: &Referrer,
        spare: Option<RendererHandle>,
    ) -> Option<RendererHandle>;

    /// Resolves when the load in `renderer` finishes; `false` if it failed
    /// or the renderer was destroyed first.
    async fn wait_for_load(&self, renderer: RendererId) -> bool;

    /// Releases a renderer.
    fn destroy_renderer(&self, handle: RendererHandle);

    /// Checks that `handle` still shows `url` and may be handed to a tab.
    fn match_and_adopt(&self, handle: &RendererHandle, url: &Url) -> bool;

    /// Prefetches (or preconnects to) low-confidence candidates.
    fn prefetch(&self, urls: &[Url]);

    /// Issues a network request not tied to any tab.
    fn start_detached_request(&self, url: &Url, referrer: &Origin) -> bool;
}

// ============================================================================
// OriginVerifier
// ============================================================================

/// Verifies that a package is entitled to an origin.
#[async_trait]
pub trait OriginVerifier: Send + Sync {
    /// Resolves to `true` if `package` holds `relation` with `origin`.
    async fn verify(&self, package: &str, origin: &Origin, relation: Relation) -> bool;
}

// ============================================================================
// DeviceConditions
// ============================================================================

/// Device and settings state consulted before speculating.
pub trait DeviceConditions: Send + Sync {
    /// Low-end devices never speculate.
    fn is_low_end_device(&self) -> bool;

    /// Whether the active network is cellular.
    fn is_on_cellular(&self) -> bool;

    /// Hidden tabs are refused while third-party cookies are blocked.
    fn third_party_cookies_blocked(&self) -> bool;
}

// ============================================================================
// PackageResolver
// ============================================================================

/// Maps a calling UID to its package name.
pub trait PackageResolver: Send + Sync {
    /// Returns the package for `uid`, if known.
    fn package_for_uid(&self, uid: Uid) -> Option<String>;

    /// Returns `true` if `package` may send any referrer unverified.
    ///
    /// Decided by the platform, never by the client itself.
    fn is_trusted_publisher(&self, package: &str) -> bool {
        let _ = package;
        false
    }
}

// ============================================================================
// PageChannel
// ============================================================================

/// Message pipe into the page shown for a session.
///
/// Attached by the tab layer once the real navigation's content exists.
pub trait PageChannel: Send + Sync {
    /// Returns `false` once the page's web contents are destroyed.
    fn is_alive(&self) -> bool;

    /// Delivers `message` to the page. Returns `false` on failure.
    fn post_to_page(&self, message: &str) -> bool;
}
