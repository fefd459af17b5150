//! WebSocket RPC server.
//!
//! # Connection Flow
//!
//! 1. [`RpcServer::bind`] binds to an address (`port` 0 picks one)
//! 2. [`RpcServer::spawn`] starts accepting client links
//! 3. Every link sends `hello`, then calls
//! 4. [`ServerHandle::shutdown`] stops accepting and closes open links

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connection::CustomTabsConnection;
use crate::engine::PackageResolver;
use crate::error::Result;

use super::link::ClientLink;

// ============================================================================
// RpcServer
// ============================================================================

/// A bound RPC server that does not accept links yet.
///
/// # Example
///
/// ```no_run
/// use std::net::{IpAddr, Ipv4Addr};
/// use std::sync::Arc;
/// use customtabs_connection::CustomTabsConnection;
/// use customtabs_connection::engine::{MemoryPlatform, Platform};
/// use customtabs_connection::transport::RpcServer;
///
/// # async fn run() -> customtabs_connection::Result<()> {
/// let platform = Platform::in_memory(Arc::new(MemoryPlatform::new()));
/// let connection = CustomTabsConnection::builder()
///     .platform(platform.clone())
///     .build()?;
///
/// let server = RpcServer::bind(
///     IpAddr::V4(Ipv4Addr::LOCALHOST),
///     0,
///     connection,
///     platform.packages,
/// )
/// .await?;
/// let handle = server.spawn();
/// println!("listening on {}", handle.ws_url());
/// # handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct RpcServer {
    /// TCP listener for incoming links.
    listener: TcpListener,
    /// Port the server is bound to.
    port: u16,
    connection: CustomTabsConnection,
    packages: Arc<dyn PackageResolver>,
}

impl RpcServer {
    /// Binds the server.
    ///
    /// `packages` checks the package each client claims in `hello`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn bind(
        ip: IpAddr,
        port: u16,
        connection: CustomTabsConnection,
        packages: Arc<dyn PackageResolver>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let actual_port = listener.local_addr()?.port();

        debug!(port = actual_port, "RPC server bound");

        Ok(Self {
            listener,
            port: actual_port,
            connection,
            packages,
        })
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the local socket address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Returns the WebSocket URL for this server.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        ws_url(self.port)
    }

    /// Starts accepting links on the current runtime.
    #[must_use]
    pub fn spawn(self) -> ServerHandle {
        let port = self.port;
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        info!(port, "RPC server started");

        ServerHandle {
            port,
            stop_tx: Some(stop_tx),
            task,
        }
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        let (close_tx, close_rx) = watch::channel(false);

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            debug!(?addr, "TCP connection accepted");
                            tokio::spawn(ClientLink::serve(
                                stream,
                                addr,
                                self.connection.clone(),
                                Arc::clone(&self.packages),
                                close_rx.clone(),
                            ));
                        }
                        Err(e) => warn!(error = %e, "Accept failed"),
                    }
                }
            }
        }

        let _ = close_tx.send(true);
        info!(port = self.port, "RPC server stopped");
    }
}

// ============================================================================
// ServerHandle
// ============================================================================

/// A running RPC server.
///
/// Dropping the handle stops accepting too, without waiting.
#[derive(Debug)]
pub struct ServerHandle {
    port: u16,
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Returns the port the server listens on.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Returns the WebSocket URL for this server.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        ws_url(self.port)
    }

    /// Stops accepting links and closes the open ones.
    ///
    /// Sessions of closed links go through the disconnect path.
    pub async fn shutdown(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "RPC server task failed");
        }
    }
}

fn ws_url(port: u16) -> String {
    format!("ws://127.0.0.1:{port}")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::Ipv4Addr;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

    use crate::engine::{MemoryPage, MemoryPlatform, Platform, Relation};
    use crate::identifiers::{RequestId, SessionToken, Uid};
    use crate::protocol::{Call, Event, Request, Response};
    use crate::url_policy::Origin;

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    const APP: Uid = Uid::new(10_001);

    struct Fixture {
        engine: Arc<MemoryPlatform>,
        connection: CustomTabsConnection,
        server: ServerHandle,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let engine = Arc::new(MemoryPlatform::new());
        engine.register_package(APP, "com.example.app");
        let platform = Platform::in_memory(Arc::clone(&engine));
        let connection = CustomTabsConnection::builder()
            .platform(platform.clone())
            .build()?;

        let server = RpcServer::bind(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            0,
            connection.clone(),
            platform.packages,
        )
        .await?
        .spawn();

        Ok(Fixture {
            engine,
            connection,
            server,
        })
    }

    async fn send(client: &mut Client, request: &Request) -> anyhow::Result<()> {
        let json = serde_json::to_string(request)?;
        client.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Next text frame as JSON.
    async fn next_frame(client: &mut Client) -> anyhow::Result<Value> {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), client.next())
                .await?
                .ok_or_else(|| anyhow::anyhow!("link closed"))??;
            if let Message::Text(text) = message {
                return Ok(serde_json::from_str(&text)?);
            }
        }
    }

    async fn call(client: &mut Client, call: &Call) -> anyhow::Result<Response> {
        let request = Request::new(call);
        send(client, &request).await?;
        loop {
            let frame = next_frame(client).await?;
            if frame.get("type").is_some() {
                let response: Response = serde_json::from_value(frame)?;
                anyhow::ensure!(response.id == request.id, "response out of order");
                return Ok(response);
            }
        }
    }

    async fn next_event(client: &mut Client) -> anyhow::Result<Event> {
        loop {
            let frame = next_frame(client).await?;
            if frame.get("event").is_some() {
                return Ok(serde_json::from_value(frame)?);
            }
        }
    }

    async fn connect(fixture: &Fixture, uid: Uid, package: &str) -> anyhow::Result<(Client, Response)> {
        let (mut client, _) = connect_async(fixture.server.ws_url()).await?;
        let hello = Request::with_id(
            RequestId::handshake(),
            &Call::Hello {
                uid,
                package: package.to_string(),
            },
        );
        send(&mut client, &hello).await?;
        let ack: Response = serde_json::from_value(next_frame(&mut client).await?)?;
        Ok((client, ack))
    }

    async fn new_session(client: &mut Client) -> anyhow::Result<SessionToken> {
        let response = call(client, &Call::NewSession {}).await?;
        SessionToken::from_u64(response.get_u64("session"))
            .ok_or_else(|| anyhow::anyhow!("no session in {response:?}"))
    }

    async fn wait_for_sessions(connection: &CustomTabsConnection, count: usize) {
        for _ in 0..400 {
            if connection.session_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("session count never reached {count}");
    }

    #[tokio::test]
    async fn test_server_bind_random_port() -> anyhow::Result<()> {
        let fx = fixture().await?;
        assert!(fx.server.port() > 0);
        assert_eq!(fx.server.ws_url(), format!("ws://127.0.0.1:{}", fx.server.port()));
        fx.server.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_round_trip_speculation() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let (mut client, ack) = connect(&fx, APP, "com.example.app").await?;
        assert!(ack.is_success());
        assert!(ack.id.is_handshake());

        let session = new_session(&mut client).await?;
        let response = call(
            &mut client,
            &Call::MayLaunchUrl {
                session,
                url: Some("https://example.com/".to_string()),
                extras: Default::default(),
                other_likely_urls: vec![json!("https://example.com/next"), json!(7)],
            },
        )
        .await?;
        assert!(response.as_bool());
        assert_eq!(fx.engine.live_renderer_count(), 1);
        assert_eq!(fx.engine.prefetched_urls().len(), 1);

        let handle = fx
            .connection
            .take_speculated_url(session, "https://example.com/", None)
            .await;
        assert!(handle.is_some());

        fx.server.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_params_answered_not_dropped() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let (mut client, _) = connect(&fx, APP, "com.example.app").await?;

        let bad = Request {
            id: RequestId::generate(),
            method: "message.post".to_string(),
            params: json!({ "session": "seven" }),
        };
        send(&mut client, &bad).await?;
        let response: Response = serde_json::from_value(next_frame(&mut client).await?)?;
        assert_eq!(response.id, bad.id);
        assert_eq!(response.error.as_deref(), Some("invalid params"));

        // The link is still usable.
        assert!(call(&mut client, &Call::Warmup { flags: 0 }).await?.as_bool());

        fx.server.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_spoofed_package_rejected() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let (mut client, ack) = connect(&fx, APP, "com.example.bank").await?;
        assert!(ack.is_error());
        assert_eq!(ack.error.as_deref(), Some("handshake"));

        // The server closes the link after a failed handshake.
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match client.next().await {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return true,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await?;
        assert!(closed);

        fx.server.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_events_pushed_to_client() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let origin = Origin::parse("https://example.com")?;
        fx.engine
            .grant_origin("com.example.app", origin, Relation::UseAsOrigin);

        let (mut client, _) = connect(&fx, APP, "com.example.app").await?;
        let session = new_session(&mut client).await?;

        let response = call(
            &mut client,
            &Call::RequestChannel {
                session,
                origin: "https://example.com".to_string(),
            },
        )
        .await?;
        assert!(response.as_bool());

        let page = Arc::new(MemoryPage::new());
        assert!(fx.connection.attach_page(session, page.clone()).await);
        let event = next_event(&mut client).await?;
        assert_eq!(event.event, "message.channelReady");
        assert_eq!(event.session, session);

        let response = call(
            &mut client,
            &Call::PostMessage {
                session,
                message: "ping".to_string(),
            },
        )
        .await?;
        assert_eq!(response.result, Some(json!("SUCCESS")));
        assert_eq!(page.received(), vec!["ping".to_string()]);

        assert!(fx.connection.deliver_page_message(session, "pong").await);
        let event = next_event(&mut client).await?;
        assert_eq!(event.event, "message.received");
        assert_eq!(event.params["message"], "pong");

        fx.server.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_closing_link_cleans_up_sessions() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let (mut client, _) = connect(&fx, APP, "com.example.app").await?;
        let session = new_session(&mut client).await?;
        assert!(
            call(
                &mut client,
                &Call::MayLaunchUrl {
                    session,
                    url: Some("https://example.com/".to_string()),
                    extras: Default::default(),
                    other_likely_urls: Vec::new(),
                },
            )
            .await?
            .as_bool()
        );
        assert_eq!(fx.connection.session_count().await, 1);

        client.close(None).await?;
        wait_for_sessions(&fx.connection, 0).await;
        assert_eq!(fx.engine.live_renderer_count(), 0);

        fx.server.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_closes_links() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let (mut client, _) = connect(&fx, APP, "com.example.app").await?;
        new_session(&mut client).await?;

        fx.server.shutdown().await;
        wait_for_sessions(&fx.connection, 0).await;
        Ok(())
    }
}
