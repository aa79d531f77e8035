//! tether-server: entry point.
//!
//! Serves a demo page whose content is driven entirely from the server: the
//! greeting is written by an `execute`, the browser's user agent is read
//! back with a `query`, and clicks are streamed in through `listen`.
//!
//! # Usage
//!
//! ```text
//! tether-server [OPTIONS]
//!
//! Options:
//!   --config <FILE>             TOML configuration file
//!   --bind <ADDR>               Listen address [default: 0.0.0.0:7380]
//!   --ws-path <PATH>            WebSocket path [default: /bridge]
//!   --debug                     Capture origins for remote failures
//!   --query-timeout <SECS>      0 waits forever [default: 30]
//!   --watch <DIR>               Reload every page when DIR changes
//!   --log-level <FILTER>        Used when RUST_LOG is unset [default: info]
//! ```
//!
//! # Configuration precedence
//!
//! Command-line flag (or its environment variable) > config file > default.
//!
//! | Variable               | Flag               |
//! |------------------------|--------------------|
//! | `TETHER_CONFIG`        | `--config`         |
//! | `TETHER_BIND`          | `--bind`           |
//! | `TETHER_WS_PATH`       | `--ws-path`        |
//! | `TETHER_DEBUG`         | `--debug`          |
//! | `TETHER_QUERY_TIMEOUT` | `--query-timeout`  |
//! | `TETHER_WATCH`         | `--watch`          |
//! | `TETHER_LOG`           | `--log-level`      |

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::SessionId;
use tether_server::application::{PageBuilder, PageRequest, Tether};
use tether_server::domain::{PageTemplate, ServerConfig};
use tether_server::infrastructure::config_file::timeout_from_secs;
use tether_server::infrastructure::{run_server, run_watcher, FileConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Remote-execution server for browser pages.
#[derive(Debug, Parser)]
#[command(name = "tether-server", version)]
struct Cli {
    /// TOML configuration file; every key in it is optional.
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on for both pages and the peer WebSocket.
    #[arg(long, env = "TETHER_BIND")]
    bind: Option<SocketAddr>,

    /// Request path upgraded to the peer WebSocket.
    #[arg(long, env = "TETHER_WS_PATH")]
    ws_path: Option<String>,

    /// Record where every command was issued so remote failures can be
    /// traced back to it, and warn about slow page builds.
    #[arg(long, env = "TETHER_DEBUG")]
    debug: bool,

    /// Seconds a query waits for its answer; 0 waits forever.
    #[arg(long, env = "TETHER_QUERY_TIMEOUT")]
    query_timeout: Option<u64>,

    /// Directory to watch; every open page reloads when it changes.
    #[arg(long, env = "TETHER_WATCH")]
    watch: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, env = "TETHER_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Merges the three configuration layers into a [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--config` names a file that cannot be read or
    /// parsed.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut config = ServerConfig::default();
        if let Some(path) = &self.config {
            config = FileConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?
                .apply(config);
        }
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(ws_path) = self.ws_path {
            config.ws_path = ws_path;
        }
        if self.debug {
            config.debug = true;
        }
        if let Some(secs) = self.query_timeout {
            config.query_timeout = timeout_from_secs(secs);
        }
        if let Some(watch) = self.watch {
            config.watch_path = Some(watch);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        Ok(config)
    }
}

// ── Demo page ─────────────────────────────────────────────────────────────────

struct DemoPage;

#[async_trait]
impl PageBuilder for DemoPage {
    async fn build(
        &self,
        tether: Arc<Tether>,
        _request: &PageRequest,
        session: &SessionId,
        page: &mut PageTemplate,
    ) {
        page.title = "tether demo".into();
        page.add_style("body { font-family: sans-serif; margin: 3em; }");
        page.add_body(r#"<h1 id="greeting">connecting…</h1><p id="agent"></p>"#);

        if let Err(e) = tether.execute(
            session,
            "document.getElementById('greeting').textContent = 'Hello from the server'",
        ) {
            warn!(session = %session, "demo greeting not sent: {e}");
        }

        // Answers only arrive once the page is live, so wait in a task.
        let agent = tether.query(session, "navigator.userAgent");
        let clicks = tether.listen(
            session,
            "document.addEventListener('click', e => emit(e.clientX + ',' + e.clientY))",
        );
        let id = session.clone();
        tokio::spawn(async move {
            match agent.await {
                Ok(agent) => {
                    info!(session = %id, %agent, "peer identified");
                    let show = format!(
                        "document.getElementById('agent').textContent = {}",
                        serde_json::Value::String(agent)
                    );
                    let _ = tether.execute(&id, &show);
                }
                Err(e) => warn!(session = %id, "user agent query failed: {e}"),
            }
            let Ok(mut clicks) = clicks else { return };
            while let Some(at) = clicks.next_value().await {
                info!(session = %id, %at, "click");
            }
        });
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    // RUST_LOG wins; otherwise the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "tether-server starting: bind={}, debug={}",
        config.bind_addr, config.debug
    );

    let watch = config.watch_path.clone().map(|p| (p, config.watch_debounce));
    let tether = Arc::new(Tether::new(config).with_page_builder(Arc::new(DemoPage)));

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, shutting down");
                running_clone.store(false, Ordering::Relaxed);
            }
            Err(e) => error!("failed to listen for Ctrl+C signal: {e}"),
        }
    });

    if let Some((root, debounce)) = watch {
        let tether = Arc::clone(&tether);
        let running = Arc::clone(&running);
        tokio::spawn(async move {
            if let Err(e) = run_watcher(root, debounce, tether, running).await {
                error!("file watcher stopped: {e:#}");
            }
        });
    }

    run_server(tether, running).await?;

    info!("tether-server stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
