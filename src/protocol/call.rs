//! Call definitions.
//!
//! Calls follow `module.methodName` format.
//!
//! | Module | Calls |
//! |--------|-------|
//! | `hello` | Handshake, first frame of every link |
//! | `session` | `new`, `extraCommand`, `validateRelationship`, `cleanup` |
//! | `connection` | `warmup` |
//! | `speculation` | `mayLaunchUrl` |
//! | `message` | `requestChannel`, `post` |
//! | `request` | `canDoParallel`, `startParallel` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connection::{ExtraCommand, MayLaunchExtras};
use crate::engine::Relation;
use crate::identifiers::{SessionToken, Uid};

// ============================================================================
// Call
// ============================================================================

/// A typed client call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Call {
    /// Identifies the client of a link.
    #[serde(rename = "hello")]
    Hello {
        /// UID the client runs as.
        uid: Uid,
        /// Package name the client claims.
        package: String,
    },

    /// Creates a session; the result carries its token.
    #[serde(rename = "session.new")]
    NewSession {},

    /// Warms up the engine.
    #[serde(rename = "connection.warmup")]
    Warmup {
        /// Reserved.
        #[serde(default)]
        flags: u64,
    },

    /// Hints a likely navigation.
    #[serde(rename = "speculation.mayLaunchUrl")]
    MayLaunchUrl {
        /// Calling session.
        session: SessionToken,
        /// Most likely URL; absent or empty cancels or goes low-confidence.
        #[serde(default)]
        url: Option<String>,
        /// Request extras.
        #[serde(default)]
        extras: MayLaunchExtras,
        /// Further candidates; non-string entries are ignored.
        #[serde(default, rename = "otherLikelyUrls")]
        other_likely_urls: Vec<Value>,
    },

    /// Requests a post-message channel.
    #[serde(rename = "message.requestChannel")]
    RequestChannel {
        /// Calling session.
        session: SessionToken,
        /// Web origin of the messages.
        origin: String,
    },

    /// Posts a message to the page.
    #[serde(rename = "message.post")]
    PostMessage {
        /// Calling session.
        session: SessionToken,
        /// Message text.
        message: String,
    },

    /// Changes a per-session setting.
    #[serde(rename = "session.extraCommand")]
    ExtraCommand {
        /// Calling session.
        session: SessionToken,
        /// The setting.
        command: ExtraCommand,
    },

    /// Checks whether parallel requests are possible.
    #[serde(rename = "request.canDoParallel")]
    CanDoParallelRequest {
        /// Calling session.
        session: SessionToken,
        /// Origin the request is made for.
        origin: String,
    },

    /// Issues a parallel request.
    #[serde(rename = "request.startParallel")]
    StartParallelRequest {
        /// Calling session.
        session: SessionToken,
        /// URL to request.
        url: String,
        /// Origin the request is made for.
        origin: String,
    },

    /// Verifies a relationship with an origin.
    #[serde(rename = "session.validateRelationship")]
    ValidateRelationship {
        /// Calling session.
        session: SessionToken,
        /// Claimed relation.
        relation: Relation,
        /// Web origin.
        origin: String,
    },

    /// Ends a session explicitly.
    #[serde(rename = "session.cleanup")]
    CleanupSession {
        /// Session to end.
        session: SessionToken,
    },
}

impl Call {
    /// Wire name of the call.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::NewSession {} => "session.new",
            Self::Warmup { .. } => "connection.warmup",
            Self::MayLaunchUrl { .. } => "speculation.mayLaunchUrl",
            Self::RequestChannel { .. } => "message.requestChannel",
            Self::PostMessage { .. } => "message.post",
            Self::ExtraCommand { .. } => "session.extraCommand",
            Self::CanDoParallelRequest { .. } => "request.canDoParallel",
            Self::StartParallelRequest { .. } => "request.startParallel",
            Self::ValidateRelationship { .. } => "session.validateRelationship",
            Self::CleanupSession { .. } => "session.cleanup",
        }
    }
}

/// Keeps the string entries of a candidate list.
#[must_use]
pub fn string_entries(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
