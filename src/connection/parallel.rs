//! Detached requests issued on behalf of a verified origin.
//!
//! A parallel request needs, in order: an initialized engine, a session
//! owned by the caller with parallel requests allowed, an http(s) URL, an
//! http(s) origin, and that origin verified for the session's package.

// ============================================================================
// Imports
// ============================================================================

use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::engine::Relation;
use crate::identifiers::{SessionToken, Uid};
use crate::url_policy::{Origin, parse_navigable_url};

use super::control::{AfterVerify, ControlLoop, EngineState, Reply};

// ============================================================================
// ParallelRequestStatus
// ============================================================================

/// Outcome of a parallel request check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParallelRequestStatus {
    Success,
    FailureNotInitialized,
    FailureNotAuthorized,
    FailureInvalidUrl,
    FailureInvalidReferrer,
}

impl ParallelRequestStatus {
    /// Returns `true` for [`ParallelRequestStatus::Success`].
    #[inline]
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

// ============================================================================
// ControlLoop - Parallel Requests
// ============================================================================

impl ControlLoop {
    /// Checks a parallel request; with a `url`, also issues it.
    ///
    /// Answers through `reply`, possibly after verifying the origin.
    pub(super) fn handle_parallel_request(
        &mut self,
        token: SessionToken,
        uid: Uid,
        url: Option<String>,
        origin: &str,
        reply: Reply<ParallelRequestStatus>,
    ) {
        match self.check_parallel_request(token, uid, url.as_deref(), origin) {
            Err(status) => {
                debug!(session = %token, ?status, "Parallel request refused");
                let _ = reply.send(status);
            }
            Ok((url, origin, None)) => {
                let status = self.finish_parallel_request(token, url, &origin, true);
                let _ = reply.send(status);
            }
            Ok((url, origin, Some(package))) => {
                self.spawn_verification(
                    token,
                    package,
                    origin,
                    Relation::UseAsOrigin,
                    AfterVerify::Parallel { url, reply },
                );
            }
        }
    }

    /// Returns the parsed request and, if the origin still needs
    /// verification, the package to verify it for.
    fn check_parallel_request(
        &mut self,
        token: SessionToken,
        uid: Uid,
        url: Option<&str>,
        origin: &str,
    ) -> Result<(Option<Url>, Origin, Option<String>), ParallelRequestStatus> {
        if self.engine != EngineState::Ready {
            return Err(ParallelRequestStatus::FailureNotInitialized);
        }

        let record = self
            .clients
            .owned_session_mut(token, uid)
            .map_err(|_| ParallelRequestStatus::FailureNotAuthorized)?;
        if !record.allow_parallel_request {
            return Err(ParallelRequestStatus::FailureNotAuthorized);
        }

        let url = url
            .map(parse_navigable_url)
            .transpose()
            .map_err(|_| ParallelRequestStatus::FailureInvalidUrl)?;
        let origin =
            Origin::parse(origin).map_err(|_| ParallelRequestStatus::FailureInvalidReferrer)?;

        if record.is_origin_verified(&origin, Relation::UseAsOrigin) {
            return Ok((url, origin, None));
        }
        let package = record
            .package()
            .ok_or(ParallelRequestStatus::FailureNotAuthorized)?
            .to_owned();
        Ok((url, origin, Some(package)))
    }

    pub(super) fn finish_parallel_request(
        &mut self,
        token: SessionToken,
        url: Option<Url>,
        origin: &Origin,
        verified: bool,
    ) -> ParallelRequestStatus {
        if !verified || self.clients.session(token).is_none() {
            return ParallelRequestStatus::FailureNotAuthorized;
        }
        let Some(url) = url else {
            return ParallelRequestStatus::Success;
        };

        if self.platform.navigator.start_detached_request(&url, origin) {
            info!(session = %token, url = %url, origin = %origin, "Parallel request started");
            ParallelRequestStatus::Success
        } else {
            warn!(session = %token, url = %url, "Engine refused parallel request");
            ParallelRequestStatus::FailureNotInitialized
        }
    }
}
