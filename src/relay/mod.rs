//! In-process message relay.
//!
//! The relay is the shared endpoint both peers connect to. It accepts
//! socket upgrades at `/editor-link` and forwards every JSON text frame
//! to all *other* connected clients, never inspecting payloads.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │                Relay                 │
//! │  web app ──frame──▶ ┌──────────┐     │
//! │                     │ broadcast│──▶ editor
//! │  editor  ──frame──▶ │ to others│──▶ web app
//! │                     └──────────┘     │
//! └──────────────────────────────────────┘
//! ```
//!
//! Production deployments run the relay inside the web app's server
//! process; this implementation exists so a peer library can be exercised
//! against a real socket endpoint, tests included.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::ENDPOINT_PATH;
use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Bind address; the link has no auth layer, so loopback only.
const BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Accept poll interval while checking the shutdown flag.
const ACCEPT_POLL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// Frame queued for one client's writer task.
enum ClientFrame {
    /// Forwarded text frame.
    Text(String),
    /// Server-initiated close.
    Close,
}

/// Per-client outbound queues, keyed by connection order.
type ClientMap = FxHashMap<u64, mpsc::UnboundedSender<ClientFrame>>;

// ============================================================================
// Relay
// ============================================================================

/// Frame-forwarding relay endpoint.
///
/// # Example
///
/// ```ignore
/// let relay = Relay::bind(0).await?;
/// println!("relay at {}", relay.ws_url());
/// ```
pub struct Relay {
    /// Bound port.
    port: u16,

    /// Connected clients by ID.
    clients: RwLock<ClientMap>,

    /// Next client ID.
    next_id: AtomicU64,

    /// Shutdown flag for the accept loop.
    shutdown: AtomicBool,
}

impl Relay {
    /// Binds the relay to `127.0.0.1:{port}` and starts accepting.
    ///
    /// Use port 0 for an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(port: u16) -> Result<Arc<Self>> {
        let addr = SocketAddr::new(BIND_IP, port);
        let listener = TcpListener::bind(addr).await?;
        let actual_port = listener.local_addr()?.port();

        let relay = Arc::new(Self {
            port: actual_port,
            clients: RwLock::new(ClientMap::default()),
            next_id: AtomicU64::new(1),
            shutdown: AtomicBool::new(false),
        });

        let accept_relay = Arc::clone(&relay);
        tokio::spawn(async move {
            accept_relay.accept_loop(listener).await;
        });

        info!(port = actual_port, "Relay started");
        Ok(relay)
    }

    /// Returns the socket endpoint URL.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}{ENDPOINT_PATH}", self.port)
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    /// Forcibly closes every client connection.
    ///
    /// The relay keeps running; peers observe an unexpected close.
    pub fn kick_all(&self) {
        let clients = self.clients.read();
        for sender in clients.values() {
            let _ = sender.send(ClientFrame::Close);
        }
        debug!(count = clients.len(), "Kicked all relay clients");
    }

    /// Stops accepting and closes all clients.
    pub async fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.kick_all();
        self.clients.write().clear();
        info!(port = self.port, "Relay shut down");
    }
}

// ============================================================================
// Relay - Accept Loop
// ============================================================================

impl Relay {
    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Relay accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            // Accept with timeout to allow checking the shutdown flag.
            match timeout(ACCEPT_POLL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let relay = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = relay.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Relay connection failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Relay accept failed");
                }
                Err(_) => continue,
            }
        }

        debug!("Relay accept loop terminated");
    }

    /// Serves one client until it disconnects.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        // Only the link endpoint path upgrades.
        let check_path = |request: &Request, response: Response| {
            if request.uri().path() == ENDPOINT_PATH {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("not found".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, check_path)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        let client_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        self.clients.write().insert(client_id, frame_tx);
        debug!(client_id, ?addr, "Relay client connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Writer: drains this client's queue. Ends when the queue closes
        // (client removed) or a forced close is requested.
        let writer = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                match frame {
                    ClientFrame::Text(text) => {
                        if ws_write.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    ClientFrame::Close => {
                        let _ = ws_write.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
            let _ = ws_write.close().await;
        });

        // Reader: forwards every text frame to all other clients.
        while let Some(frame) = ws_read.next().await {
            match frame {
                Ok(WsMessage::Text(text)) => {
                    self.broadcast(client_id, text.as_str());
                }
                Ok(WsMessage::Close(_)) | Err(_) => break,
                // Binary, Ping, Pong are not part of the protocol.
                Ok(_) => {}
            }
        }

        // Dropping the queue sender ends the writer task.
        self.clients.write().remove(&client_id);
        let _ = writer.await;
        debug!(client_id, "Relay client disconnected");

        Ok(())
    }

    /// Sends a frame to every client except its source.
    fn broadcast(&self, source_id: u64, text: &str) {
        let clients = self.clients.read();
        for (client_id, sender) in clients.iter() {
            if *client_id == source_id {
                continue;
            }
            let _ = sender.send(ClientFrame::Text(text.to_string()));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_tungstenite::connect_async;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let relay = Relay::bind(0).await.expect("bind");
        assert!(relay.port() > 0);
        assert!(relay.ws_url().ends_with("/editor-link"));
        assert_eq!(relay.client_count(), 0);
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejects_unknown_paths() {
        let relay = Relay::bind(0).await.expect("bind");
        let wrong = format!("ws://127.0.0.1:{}/somewhere-else", relay.port());
        assert!(connect_async(&wrong).await.is_err());
        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_broadcast_excludes_source() {
        let relay = Relay::bind(0).await.expect("bind");

        let (mut alpha, _) = connect_async(relay.ws_url()).await.expect("connect");
        let (mut beta, _) = connect_async(relay.ws_url()).await.expect("connect");

        // Let both registrations land before broadcasting.
        while relay.client_count() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        alpha
            .send(WsMessage::Text("{\"x\":1}".into()))
            .await
            .expect("send");

        let received = timeout(Duration::from_secs(5), beta.next())
            .await
            .expect("frame should arrive")
            .expect("stream open")
            .expect("frame ok");
        assert_eq!(received, WsMessage::Text("{\"x\":1}".into()));

        // The source must not hear its own frame back.
        let echo = timeout(Duration::from_millis(200), alpha.next()).await;
        assert!(echo.is_err());

        relay.shutdown().await;
    }

    #[tokio::test]
    async fn test_kick_all_closes_clients() {
        let relay = Relay::bind(0).await.expect("bind");
        let (mut client, _) = connect_async(relay.ws_url()).await.expect("connect");

        while relay.client_count() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        relay.kick_all();

        let frame = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("close should arrive")
            .expect("stream open")
            .expect("frame ok");
        assert!(matches!(frame, WsMessage::Close(_)));

        relay.shutdown().await;
    }
}
