//! One client link.
//!
//! A link is the WebSocket of one client application. It starts with the
//! `hello` handshake, which pins the UID every later call runs as, then
//! answers requests in arrival order while pushing session events.
//!
//! When the link closes, for any reason, each session it created is
//! handed to [`CustomTabsConnection::session_disconnected`].

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{Value, from_str, json, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use crate::client::SessionCallback;
use crate::connection::CustomTabsConnection;
use crate::engine::{PackageResolver, Relation};
use crate::error::{Error, Result};
use crate::identifiers::{SessionToken, Uid};
use crate::protocol::{Call, Event, Request, Response, string_entries};
use crate::url_policy::{Origin, is_valid_package_name};

// ============================================================================
// Constants
// ============================================================================

/// Timeout for the `hello` handshake.
const HELLO_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<TcpStream>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Identity established by the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// UID every call of the link runs as.
    pub uid: Uid,
    /// Package name of the UID.
    pub package: String,
}

// ============================================================================
// LinkCallback
// ============================================================================

/// Turns session callbacks into events on the link.
struct LinkCallback {
    session: SessionToken,
    events: mpsc::UnboundedSender<Event>,
}

impl LinkCallback {
    fn push(&self, event: Event) {
        if self.events.send(event).is_err() {
            trace!(session = %self.session, "Link gone, event dropped");
        }
    }
}

impl SessionCallback for LinkCallback {
    fn on_warmup_completed(&self) {
        self.push(Event::warmup_completed(self.session));
    }

    fn on_message_channel_ready(&self) {
        self.push(Event::channel_ready(self.session));
    }

    fn on_post_message(&self, message: &str) {
        self.push(Event::message_received(self.session, message));
    }

    fn on_relationship_validated(&self, relation: Relation, origin: &Origin, verified: bool) {
        self.push(Event::relationship_validated(
            self.session,
            relation,
            origin,
            verified,
        ));
    }
}

// ============================================================================
// ClientLink
// ============================================================================

/// State of an established link.
pub(crate) struct ClientLink {
    connection: CustomTabsConnection,
    peer: Peer,
    sessions: Vec<SessionToken>,
    events_tx: mpsc::UnboundedSender<Event>,
}

impl ClientLink {
    /// Runs a link to completion: upgrade, handshake, calls, cleanup.
    pub(crate) async fn serve(
        stream: TcpStream,
        addr: SocketAddr,
        connection: CustomTabsConnection,
        packages: Arc<dyn PackageResolver>,
        shutdown: watch::Receiver<bool>,
    ) {
        let ws_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(ws_stream) => ws_stream,
            Err(e) => {
                warn!(?addr, error = %e, "WebSocket upgrade failed");
                return;
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let peer = match handshake(&mut write, &mut read, packages.as_ref()).await {
            Ok(peer) => peer,
            Err(e) => {
                warn!(?addr, error = %e, "Handshake failed");
                let _ = write.close().await;
                return;
            }
        };
        info!(?addr, uid = %peer.uid, package = %peer.package, "Client link established");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut link = Self {
            connection,
            peer,
            sessions: Vec::new(),
            events_tx,
        };
        link.run(write, read, events_rx, shutdown).await;
        link.disconnect();
    }

    async fn run(
        &mut self,
        mut write: WsSink,
        mut read: WsSource,
        mut events_rx: mpsc::UnboundedReceiver<Event>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                message = read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let Some(response) = self.handle_text(&text).await else {
                                continue;
                            };
                            if let Err(e) = send_json(&mut write, &response).await {
                                warn!(error = %e, "Failed to send response");
                                break;
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(uid = %self.peer.uid, "Link closed by client");
                            break;
                        }

                        Some(Err(e)) => {
                            warn!(uid = %self.peer.uid, error = %e, "WebSocket error");
                            break;
                        }

                        None => {
                            debug!(uid = %self.peer.uid, "WebSocket stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                Some(event) = events_rx.recv() => {
                    if let Err(e) = send_json(&mut write, &event).await {
                        warn!(error = %e, "Failed to push event");
                        break;
                    }
                }

                _ = shutdown.changed() => {
                    debug!(uid = %self.peer.uid, "Server shutting down, closing link");
                    let _ = write.close().await;
                    break;
                }
            }
        }
    }

    /// Answers one text frame. `None` if it is not a request at all.
    async fn handle_text(&mut self, text: &str) -> Option<Response> {
        let request = match from_str::<Request>(text) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Unparseable frame ignored");
                return None;
            }
        };

        let call = match request.call() {
            Ok(call) => call,
            Err(e) => {
                debug!(id = %request.id, error = %e, "Malformed call");
                return Some(Response::error(request.id, "invalid params", e.to_string()));
            }
        };

        trace!(id = %request.id, method = call.method(), "Dispatching call");
        Some(match self.dispatch(call).await {
            Ok(result) => Response::success(request.id, result),
            Err(e) => Response::error(request.id, error_code(&e), e.to_string()),
        })
    }

    /// Forwards every session of the link to the disconnect path.
    fn disconnect(&mut self) {
        let sessions = std::mem::take(&mut self.sessions);
        for token in &sessions {
            self.connection.session_disconnected(*token);
        }
        info!(uid = %self.peer.uid, sessions = sessions.len(), "Client link closed");
    }
}

// ============================================================================
// ClientLink - Dispatch
// ============================================================================

impl ClientLink {
    async fn dispatch(&mut self, call: Call) -> Result<Value> {
        let uid = self.peer.uid;
        let connection = &self.connection;

        let result = match call {
            Call::Hello { .. } => return Err(Error::protocol("Link already identified")),

            Call::NewSession {} => {
                let token = SessionToken::next();
                let callback: Arc<dyn SessionCallback> = Arc::new(LinkCallback {
                    session: token,
                    events: self.events_tx.clone(),
                });
                if !connection.new_session(token, uid, Some(callback)).await {
                    return Err(Error::duplicate_session(token));
                }
                self.sessions.push(token);
                json!({ "session": token })
            }

            Call::Warmup { flags } => json!(connection.warmup(uid, flags)),

            Call::MayLaunchUrl {
                session,
                url,
                extras,
                other_likely_urls,
            } => {
                let candidates = string_entries(&other_likely_urls);
                json!(
                    connection
                        .may_launch_url(session, uid, url.as_deref(), extras, &candidates)
                        .await
                )
            }

            Call::RequestChannel { session, origin } => {
                json!(connection.request_post_message_channel(session, uid, &origin).await)
            }

            Call::PostMessage { session, message } => {
                json!(connection.post_message(session, uid, &message).await)
            }

            Call::ExtraCommand { session, command } => {
                json!(connection.extra_command(session, uid, command).await)
            }

            Call::CanDoParallelRequest { session, origin } => {
                json!(connection.can_do_parallel_request(session, uid, &origin).await)
            }

            Call::StartParallelRequest {
                session,
                url,
                origin,
            } => json!(
                connection
                    .start_parallel_request(session, uid, &url, &origin)
                    .await
            ),

            Call::ValidateRelationship {
                session,
                relation,
                origin,
            } => json!(
                connection
                    .validate_relationship(session, uid, relation, &origin)
                    .await
            ),

            Call::CleanupSession { session } => {
                let Some(index) = self.sessions.iter().position(|t| *t == session) else {
                    return Ok(json!(false));
                };
                self.sessions.swap_remove(index);
                json!(connection.cleanup_session(session).await)
            }
        };
        Ok(result)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Reads `hello`, checks the claimed package and acknowledges it.
async fn handshake(
    write: &mut WsSink,
    read: &mut WsSource,
    packages: &dyn PackageResolver,
) -> Result<Peer> {
    let request = timeout(HELLO_TIMEOUT, read_request(read))
        .await
        .map_err(|_| Error::connection("Timed out waiting for hello"))??;

    match verify_hello(&request, packages) {
        Ok(peer) => {
            let ack = Response::success(request.id, json!({ "uid": peer.uid }));
            send_json(write, &ack).await?;
            Ok(peer)
        }
        Err(e) => {
            let _ = send_json(write, &Response::error(request.id, "handshake", e.to_string())).await;
            Err(e)
        }
    }
}

async fn read_request(read: &mut WsSource) -> Result<Request> {
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => return Ok(from_str::<Request>(&text)?),
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(Error::ConnectionClosed)
}

/// Accepts `hello` only for a package that really belongs to the UID.
fn verify_hello(request: &Request, packages: &dyn PackageResolver) -> Result<Peer> {
    let (uid, package) = match request.call()? {
        Call::Hello { uid, package } => (uid, package),
        other => {
            return Err(Error::protocol(format!(
                "Expected hello, got {}",
                other.method()
            )));
        }
    };

    if !is_valid_package_name(&package) {
        return Err(Error::protocol(format!("Invalid package name: {package}")));
    }
    match packages.package_for_uid(uid) {
        Some(known) if known == package => Ok(Peer { uid, package }),
        Some(_) => Err(Error::protocol(format!("Package {package} does not belong to uid {uid}"))),
        None => Err(Error::protocol(format!("Unknown uid {uid}"))),
    }
}

async fn send_json<T: Serialize>(write: &mut WsSink, value: &T) -> Result<()> {
    let json = to_string(value)?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Wire code of a failed call.
fn error_code(error: &Error) -> &'static str {
    if error.is_session_error() {
        "session"
    } else if error.is_policy_denial() {
        "denied"
    } else if error.is_transport_error() {
        "protocol"
    } else {
        "internal"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::engine::MemoryPlatform;
    use crate::identifiers::RequestId;

    fn resolver() -> MemoryPlatform {
        let engine = MemoryPlatform::new();
        engine.register_package(Uid::new(10_001), "com.example.app");
        engine
    }

    fn hello(uid: u32, package: &str) -> Request {
        Request::with_id(
            RequestId::handshake(),
            &Call::Hello {
                uid: Uid::new(uid),
                package: package.to_string(),
            },
        )
    }

    #[test]
    fn test_verify_hello_accepts_matching_package() {
        let peer = verify_hello(&hello(10_001, "com.example.app"), &resolver()).expect("peer");
        assert_eq!(peer.uid, Uid::new(10_001));
        assert_eq!(peer.package, "com.example.app");
    }

    #[test]
    fn test_verify_hello_rejects_spoofed_package() {
        let err = verify_hello(&hello(10_001, "com.example.bank"), &resolver()).expect_err("spoof");
        assert!(err.to_string().contains("does not belong"));
    }

    #[test]
    fn test_verify_hello_rejects_unknown_uid() {
        assert!(verify_hello(&hello(99, "com.example.app"), &resolver()).is_err());
    }

    #[test]
    fn test_verify_hello_requires_hello_first() {
        let request = Request::new(&Call::Warmup { flags: 0 });
        let err = verify_hello(&request, &resolver()).expect_err("not hello");
        assert!(err.to_string().contains("Expected hello"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(error_code(&Error::duplicate_session(SessionToken::next())), "session");
        assert_eq!(error_code(&Error::protocol("x")), "protocol");
        assert_eq!(error_code(&Error::config("x")), "internal");
    }
}
