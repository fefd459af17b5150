//! Post-message bridging between a client and its page.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::SessionRecord;
use crate::engine::{PageChannel, Relation};
use crate::identifiers::{SessionToken, Uid};
use crate::url_policy::Origin;

use super::control::{AfterVerify, ControlLoop};

// ============================================================================
// PostMessageResult
// ============================================================================

/// Result code of `postMessage`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostMessageResult {
    /// Delivered to the page.
    Success,
    /// Channel not ready, origin not validated, or page destroyed.
    FailureMessagingError,
}

impl PostMessageResult {
    /// Returns `true` for [`PostMessageResult::Success`].
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

// ============================================================================
// ControlLoop - Messaging
// ============================================================================

impl ControlLoop {
    /// Records a channel request and starts validating `origin`.
    pub(super) fn handle_request_channel(&mut self, token: SessionToken, uid: Uid, origin: &str) -> bool {
        let Ok(origin) = Origin::parse(origin) else {
            debug!(session = %token, origin, "Channel requested for invalid origin");
            return false;
        };
        let record = match self.clients.owned_session_mut(token, uid) {
            Ok(record) => record,
            Err(e) => {
                debug!(session = %token, error = %e, "Channel request rejected");
                return false;
            }
        };
        let Some(package) = record.package().map(str::to_owned) else {
            debug!(session = %token, "Channel request without package");
            return false;
        };

        record.channel.request(origin.clone());
        if record.is_origin_verified(&origin, Relation::UseAsOrigin) {
            self.finish_channel_validation(token, &origin, true);
        } else {
            self.spawn_verification(token, package, origin, Relation::UseAsOrigin, AfterVerify::Channel);
        }
        true
    }

    pub(super) fn finish_channel_validation(&mut self, token: SessionToken, origin: &Origin, ok: bool) {
        let Some(record) = self.clients.session_mut(token) else {
            return;
        };
        if record.channel.set_validated(origin, ok) {
            notify_channel_ready(record);
        }
    }

    /// Attaches the page of the launched navigation.
    pub(super) fn handle_attach_page(&mut self, token: SessionToken, page: Arc<dyn PageChannel>) -> bool {
        let Some(record) = self.clients.session_mut(token) else {
            return false;
        };
        if record.channel.attach_page(page) {
            notify_channel_ready(record);
        }
        true
    }

    pub(super) fn handle_post_message(
        &mut self,
        token: SessionToken,
        uid: Uid,
        message: &str,
    ) -> PostMessageResult {
        let record = match self.clients.owned_session_mut(token, uid) {
            Ok(record) => record,
            Err(e) => {
                debug!(session = %token, error = %e, "postMessage rejected");
                return PostMessageResult::FailureMessagingError;
            }
        };

        match record.channel.post(message) {
            Ok(()) => PostMessageResult::Success,
            Err(e) => {
                debug!(session = %token, error = %e, "postMessage failed");
                PostMessageResult::FailureMessagingError
            }
        }
    }

    /// Forwards a message from the page to the client.
    pub(super) fn handle_page_message(&mut self, token: SessionToken, message: &str) -> bool {
        let Some(record) = self.clients.session(token) else {
            return false;
        };
        if !record.channel().is_ready() {
            return false;
        }
        match record.callback() {
            Some(callback) => {
                callback.on_post_message(message);
                true
            }
            None => false,
        }
    }
}

fn notify_channel_ready(record: &SessionRecord) {
    info!(
        session = %record.token(),
        origin = ?record.channel().origin().map(Origin::as_str),
        "Message channel ready"
    );
    if let Some(callback) = record.callback() {
        callback.on_message_channel_ready();
    }
}
