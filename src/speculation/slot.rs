//! The single speculation and its exit edges.
//!
//! Every path that ends a speculation goes through [`SpeculationSlot`],
//! which moves the renderer handle into [`Navigator::destroy_renderer`] or
//! hands it to the caller. A handle is never reachable from two places, so
//! it is released exactly once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::engine::{Navigator, RendererHandle};
use crate::identifiers::{RendererId, SessionToken, Uid};
use crate::url_policy::{Referrer, urls_match};

use super::mode::SpeculationMode;

// ============================================================================
// DiscardReason
// ============================================================================

/// Why a speculation was torn down without being used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiscardReason {
    /// A newer speculation took its place.
    Replaced,
    /// The owner cancelled it with a null URL.
    Cancelled,
    /// The launched URL differs.
    UrlMismatch,
    /// The launch referrer differs.
    ReferrerMismatch,
    /// Launched from a client that may not use it.
    SessionMismatch,
    /// The engine refused to hand the renderer to the tab.
    AdoptFailed,
    /// The speculative load failed.
    LoadFailed,
    /// The owning session went away.
    SessionCleanedUp,
    /// The connection shut down.
    Shutdown,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Replaced => "replaced",
            Self::Cancelled => "cancelled",
            Self::UrlMismatch => "url mismatch",
            Self::ReferrerMismatch => "referrer mismatch",
            Self::SessionMismatch => "session mismatch",
            Self::AdoptFailed => "adopt failed",
            Self::LoadFailed => "load failed",
            Self::SessionCleanedUp => "session cleaned up",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Speculation
// ============================================================================

/// A speculative navigation holding a renderer.
pub struct Speculation {
    session: SessionToken,
    uid: Uid,
    url: Url,
    referrer: Referrer,
    mode: SpeculationMode,
    ignore_fragments: bool,
    handle: RendererHandle,
    loaded: Option<bool>,
}

impl fmt::Debug for Speculation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Speculation")
            .field("session", &self.session)
            .field("url", &self.url.as_str())
            .field("mode", &self.mode)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

impl Speculation {
    /// Creates a speculation. `ignore_fragments` is the owner's flag at the
    /// time of the request.
    #[must_use]
    pub fn new(
        session: SessionToken,
        uid: Uid,
        url: Url,
        referrer: Referrer,
        mode: SpeculationMode,
        ignore_fragments: bool,
        handle: RendererHandle,
    ) -> Self {
        Self {
            session,
            uid,
            url,
            referrer,
            mode,
            ignore_fragments,
            handle,
            loaded: None,
        }
    }

    /// Owning session.
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionToken {
        self.session
    }

    /// Speculated URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Referrer the page was loaded with.
    #[inline]
    #[must_use]
    pub fn referrer(&self) -> &Referrer {
        &self.referrer
    }

    /// Renderer id.
    #[inline]
    #[must_use]
    pub fn renderer(&self) -> RendererId {
        self.handle.id()
    }

    /// Returns a copy of the observable state.
    #[must_use]
    pub fn snapshot(&self) -> SpeculationSnapshot {
        SpeculationSnapshot {
            session: self.session,
            url: self.url.to_string(),
            referrer: self.referrer.to_string(),
            mode: self.mode,
            renderer: self.handle.id(),
            loaded: self.loaded,
        }
    }
}

/// Observable state of a speculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeculationSnapshot {
    /// Owning session.
    pub session: SessionToken,
    /// Speculated URL.
    pub url: String,
    /// Referrer used for the load.
    pub referrer: String,
    /// Mode it was started in.
    pub mode: SpeculationMode,
    /// Renderer holding the page.
    #[serde(skip)]
    pub renderer: RendererId,
    /// `None` while loading, then whether the load succeeded.
    pub loaded: Option<bool>,
}

// ============================================================================
// TakeOutcome
// ============================================================================

/// Result of offering a launch to the slot.
#[derive(Debug)]
pub enum TakeOutcome {
    /// The speculation matched; the renderer now belongs to the caller.
    Hit {
        handle: RendererHandle,
        snapshot: SpeculationSnapshot,
    },
    /// A speculation existed but did not match and was destroyed.
    Discarded {
        reason: DiscardReason,
        snapshot: SpeculationSnapshot,
    },
    /// Nothing was speculating.
    Idle,
}

impl TakeOutcome {
    /// Returns the handle of a hit.
    #[must_use]
    pub fn into_handle(self) -> Option<RendererHandle> {
        match self {
            Self::Hit { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

// ============================================================================
// SpeculationSlot
// ============================================================================

/// Holder of the at most one live speculation.
#[derive(Debug, Default)]
pub struct SpeculationSlot {
    current: Option<Speculation>,
}

impl SpeculationSlot {
    /// Creates an idle slot.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if nothing is speculating.
    #[inline]
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Number of renderers held (0 or 1).
    #[inline]
    #[must_use]
    pub fn live_count(&self) -> usize {
        usize::from(self.current.is_some())
    }

    /// Returns the current speculation.
    #[inline]
    #[must_use]
    pub fn current(&self) -> Option<&Speculation> {
        self.current.as_ref()
    }

    /// Returns the current speculation's observable state.
    #[must_use]
    pub fn snapshot(&self) -> Option<SpeculationSnapshot> {
        self.current.as_ref().map(Speculation::snapshot)
    }

    /// Destroys the current speculation, if any.
    pub fn discard(
        &mut self,
        navigator: &dyn Navigator,
        reason: DiscardReason,
    ) -> Option<SpeculationSnapshot> {
        let speculation = self.current.take()?;
        Some(release(navigator, speculation, reason))
    }

    /// Destroys the current speculation if `session` owns it.
    pub fn discard_owned_by(
        &mut self,
        navigator: &dyn Navigator,
        session: SessionToken,
        reason: DiscardReason,
    ) -> Option<SpeculationSnapshot> {
        if self.current.as_ref()?.session != session {
            return None;
        }
        self.discard(navigator, reason)
    }

    /// Stores `speculation`, destroying any previous one first.
    ///
    /// Callers discard before creating the new renderer; the check here
    /// keeps the slot sound if they did not.
    pub fn install(
        &mut self,
        navigator: &dyn Navigator,
        speculation: Speculation,
    ) -> Option<SpeculationSnapshot> {
        let replaced = self.discard(navigator, DiscardReason::Replaced);
        info!(
            session = %speculation.session,
            url = %speculation.url,
            mode = %speculation.mode,
            renderer = %speculation.handle.id(),
            "Speculation started"
        );
        self.current = Some(speculation);
        replaced
    }

    /// Records the end of the load in `renderer`.
    ///
    /// A failed load destroys the speculation and returns its state. Stale
    /// notifications for renderers no longer in the slot are ignored.
    pub fn mark_loaded(
        &mut self,
        navigator: &dyn Navigator,
        renderer: RendererId,
        ok: bool,
    ) -> Option<SpeculationSnapshot> {
        let current = self.current.as_mut()?;
        if current.handle.id() != renderer {
            return None;
        }
        current.loaded = Some(ok);
        if ok {
            debug!(renderer = %renderer, "Speculative load finished");
            None
        } else {
            self.discard(navigator, DiscardReason::LoadFailed)
        }
    }

    /// Offers a launch of `url` by `session` to the slot.
    ///
    /// A foreign session may use the speculation only when its UID is the
    /// owner's (`consumer_uid`). URLs compare under the owner's fragment
    /// policy captured at speculation time; referrers compare exactly. Any
    /// mismatch destroys the speculation.
    pub fn take(
        &mut self,
        navigator: &dyn Navigator,
        session: SessionToken,
        consumer_uid: Option<Uid>,
        url: &Url,
        referrer: &Referrer,
    ) -> TakeOutcome {
        let Some(speculation) = self.current.take() else {
            return TakeOutcome::Idle;
        };

        let reason = if speculation.session != session && consumer_uid != Some(speculation.uid) {
            Some(DiscardReason::SessionMismatch)
        } else if !urls_match(&speculation.url, url, speculation.ignore_fragments) {
            Some(DiscardReason::UrlMismatch)
        } else if speculation.referrer != *referrer {
            Some(DiscardReason::ReferrerMismatch)
        } else if !navigator.match_and_adopt(&speculation.handle, url) {
            Some(DiscardReason::AdoptFailed)
        } else {
            None
        };

        if let Some(reason) = reason {
            let snapshot = release(navigator, speculation, reason);
            return TakeOutcome::Discarded { reason, snapshot };
        }

        let snapshot = speculation.snapshot();
        info!(session = %session, url = %url, renderer = %snapshot.renderer, "Speculation consumed");
        TakeOutcome::Hit {
            handle: speculation.handle,
            snapshot,
        }
    }
}

/// Destroys the renderer of `speculation`.
fn release(
    navigator: &dyn Navigator,
    speculation: Speculation,
    reason: DiscardReason,
) -> SpeculationSnapshot {
    let snapshot = speculation.snapshot();
    debug!(
        session = %snapshot.session,
        url = %snapshot.url,
        reason = %reason,
        "Speculation discarded"
    );
    navigator.destroy_renderer(speculation.handle);
    snapshot
}

// ============================================================================
// Tests
// ============================================================================
