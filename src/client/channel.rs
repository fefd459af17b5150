//! Per-session post-message channel.
//!
//! The channel is ready once the requested origin has been verified and a
//! page is attached. Either may happen first; the request is held until
//! the page from the real navigation arrives.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::engine::PageChannel;
use crate::error::{Error, Result};
use crate::url_policy::Origin;

// ============================================================================
// PostMessageChannel
// ============================================================================

/// Post-message state of one session.
#[derive(Default)]
pub struct PostMessageChannel {
    origin: Option<Origin>,
    validated: Option<bool>,
    page: Option<Arc<dyn PageChannel>>,
    ready: bool,
}

impl fmt::Debug for PostMessageChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostMessageChannel")
            .field("origin", &self.origin)
            .field("validated", &self.validated)
            .field("has_page", &self.page.is_some())
            .field("ready", &self.ready)
            .finish()
    }
}

impl PostMessageChannel {
    /// Records a channel request for `origin`. Validation starts over.
    pub fn request(&mut self, origin: Origin) {
        self.origin = Some(origin);
        self.validated = None;
        self.ready = false;
    }

    /// Origin the channel was requested for.
    #[inline]
    #[must_use]
    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Returns `true` while verification is outstanding.
    #[inline]
    #[must_use]
    pub fn is_validation_pending(&self) -> bool {
        self.origin.is_some() && self.validated.is_none()
    }

    /// Records the verification result for `origin`.
    ///
    /// Results for an origin that is no longer requested are ignored.
    /// Returns `true` if the channel just became ready.
    pub fn set_validated(&mut self, origin: &Origin, verified: bool) -> bool {
        if self.origin.as_ref() != Some(origin) {
            return false;
        }
        self.validated = Some(verified);
        self.refresh()
    }

    /// Attaches the page of the real navigation.
    ///
    /// Returns `true` if the channel just became ready.
    pub fn attach_page(&mut self, page: Arc<dyn PageChannel>) -> bool {
        self.page = Some(page);
        self.refresh()
    }

    /// Returns `true` once the channel can carry messages.
    #[inline]
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Delivers `message` to the page.
    ///
    /// # Errors
    ///
    /// - [`Error::UntrustedOrigin`] if the origin failed verification
    /// - [`Error::Messaging`] if the channel is not ready or the page is gone
    pub fn post(&self, message: &str) -> Result<()> {
        if let (Some(origin), Some(false)) = (&self.origin, self.validated) {
            return Err(Error::untrusted_origin(origin.as_str()));
        }
        if !self.ready {
            return Err(Error::messaging("Channel not ready"));
        }
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| Error::messaging("No page attached"))?;
        if !page.is_alive() {
            return Err(Error::messaging("Page destroyed"));
        }
        if !page.post_to_page(message) {
            return Err(Error::messaging("Page rejected message"));
        }
        Ok(())
    }

    fn refresh(&mut self) -> bool {
        let was_ready = self.ready;
        self.ready = self.validated == Some(true)
            && self.page.as_ref().is_some_and(|page| page.is_alive());
        self.ready && !was_ready
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::MemoryPage;

    fn origin() -> Origin {
        Origin::parse("https://example.com").expect("origin")
    }

    #[test]
    fn test_ready_after_validation_then_page() {
        let mut channel = PostMessageChannel::default();
        channel.request(origin());
        assert!(channel.is_validation_pending());
        assert!(!channel.set_validated(&origin(), true));

        let page = Arc::new(MemoryPage::new());
        assert!(channel.attach_page(page.clone()));
        channel.post("hi").expect("post");
        assert_eq!(page.received(), vec!["hi".to_owned()]);
    }

    #[test]
    fn test_ready_after_page_then_validation() {
        let mut channel = PostMessageChannel::default();
        channel.request(origin());
        assert!(!channel.attach_page(Arc::new(MemoryPage::new())));
        assert!(channel.post("early").is_err());
        assert!(channel.set_validated(&origin(), true));
        assert!(channel.is_ready());
    }

    #[test]
    fn test_failed_validation_never_ready() {
        let mut channel = PostMessageChannel::default();
        channel.request(origin());
        channel.attach_page(Arc::new(MemoryPage::new()));
        assert!(!channel.set_validated(&origin(), false));

        let err = channel.post("x").expect_err("unverified");
        assert!(err.is_policy_denial());
    }

    #[test]
    fn test_stale_validation_ignored() {
        let mut channel = PostMessageChannel::default();
        channel.request(origin());
        let other = Origin::parse("https://other.example").expect("origin");
        assert!(!channel.set_validated(&other, true));
        assert!(channel.is_validation_pending());
    }

    #[test]
    fn test_destroyed_page_fails() {
        let mut channel = PostMessageChannel::default();
        channel.request(origin());
        let page = Arc::new(MemoryPage::new());
        channel.attach_page(page.clone());
        channel.set_validated(&origin(), true);
        page.close();

        let err = channel.post("x").expect_err("page closed");
        assert!(matches!(err, Error::Messaging { .. }));
    }
}
