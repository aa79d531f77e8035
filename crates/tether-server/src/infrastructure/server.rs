//! Listener lifecycle and background housekeeping.
//!
//! One listener serves both the page requests and the peer WebSocket through
//! the router in [`super::http`].
//!
//! Shutdown is cooperative: the server stops accepting once the shared
//! `running` flag is cleared (checked every 200 ms), and the reaper task
//! stops on the same flag.

use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::time::interval;
use tracing::info;

use crate::application::Tether;
use crate::infrastructure::http::router;

const STOP_POLL: Duration = Duration::from_millis(200);

/// Binds `tether.config().bind_addr` and serves until `running` is cleared.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound.
pub async fn run_server(tether: Arc<Tether>, running: Arc<AtomicBool>) -> anyhow::Result<()> {
    let bind_addr = tether.config().bind_addr;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind listener on {bind_addr}"))?;
    serve(listener, tether, running).await
}

/// Serves connections from an already-bound listener.
///
/// Split out from [`run_server`] so tests can bind port 0 and learn the
/// address before serving.
pub async fn serve(
    listener: TcpListener,
    tether: Arc<Tether>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let local = listener.local_addr().context("listener has no local address")?;
    info!(
        "tether listening on http://{local} (peer bridge at {})",
        tether.config().ws_path
    );

    let reaper = tokio::spawn(reap_abandoned_sessions(
        Arc::clone(&tether),
        Arc::clone(&running),
    ));

    let app = router(tether);
    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(stopped(running))
    .await
    .context("http server failed");

    reaper.abort();
    result
}

async fn stopped(running: Arc<AtomicBool>) {
    let mut ticker = interval(STOP_POLL);
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
    }
    info!("shutdown flag set; no longer accepting connections");
}

/// Periodically discards sessions whose page was served but whose peer never
/// connected.
async fn reap_abandoned_sessions(tether: Arc<Tether>, running: Arc<AtomicBool>) {
    let period = (tether.config().handshake_timeout / 2).max(Duration::from_secs(1));
    let mut ticker = interval(period);
    ticker.tick().await;
    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        let reaped = tether.reap_abandoned();
        if reaped > 0 {
            info!(reaped, "abandoned sessions discarded");
        }
    }
}
