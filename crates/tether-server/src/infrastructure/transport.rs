//! WebSocket half of the front door: one task pair per peer connection.
//!
//! ```text
//!            ┌──────────── writer task ────────────┐
//! sessions ──▶ mpsc queue ──▶ ws sink  (+ keepalive pings)
//!            └─────────────────────────────────────┘
//!   reader loop: ws stream ──▶ Tether::handle_frame
//! ```
//!
//! Sessions never touch the socket.  Once a peer says hello its session's
//! channel holds the queue's sender, so `send` only enqueues and never
//! blocks.  When the reader loop ends (close frame, socket error, EOF)
//! every session attached through this connection is torn down.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use tether_core::SessionId;

use crate::application::{InboundOutcome, PeerTransport, Tether};

/// Runs an upgraded peer socket until the peer goes away.
pub async fn serve_connection(
    socket: WebSocket,
    peer_addr: SocketAddr,
    tether: Arc<Tether>,
    ping_interval: Duration,
) {
    info!("peer transport established: {peer_addr}");
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();
    let transport: Arc<dyn PeerTransport> = Arc::new(frame_tx);

    // ── Writer: queue → socket, plus keepalive ────────────────────────────
    let writer = tokio::spawn(async move {
        let mut ticker = interval(ping_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                frame = frame_rx.recv() => {
                    let Some(text) = frame else { break };
                    if let Err(e) = ws_tx.send(Message::Text(text)).await {
                        debug!("transport {peer_addr}: send failed: {e}");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        debug!("transport {peer_addr}: keepalive ping failed");
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    // ── Reader: socket → Tether ───────────────────────────────────────────
    let mut attached: HashSet<SessionId> = HashSet::new();
    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                debug!("transport {peer_addr}: read ended: {e}");
                break;
            }
        };
        match message {
            Message::Text(text) => match tether.handle_frame(&text, &transport) {
                Ok(InboundOutcome::Attached { session, .. }) => {
                    attached.insert(session);
                }
                Ok(_) => {}
                Err(e) => warn!("transport {peer_addr}: inbound frame rejected: {e}"),
            },
            Message::Binary(_) => {
                warn!("transport {peer_addr}: unexpected binary frame (ignored)");
            }
            Message::Close(_) => {
                debug!("transport {peer_addr}: close frame received");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────
    for session in &attached {
        tether.disconnect(session);
    }
    drop(transport);
    writer.abort();
    info!(
        sessions = attached.len(),
        "peer transport {peer_addr} closed"
    );
}
