//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for every runtime setting.
//! It is built once at startup from three layers, highest priority first:
//!
//! 1. command-line flags (and their `TETHER_*` environment variables),
//! 2. an optional TOML file (see `infrastructure::config_file`),
//! 3. [`ServerConfig::default`].
//!
//! The struct itself performs no I/O; the infrastructure layer fills it in.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// All runtime configuration for the tether server.
///
/// Wrap it in an `Arc` after construction so session tasks can share it.
///
/// # Example
///
/// ```rust
/// use tether_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 7380);
/// assert!(!cfg.debug);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the single HTTP + WebSocket listener binds to.
    pub bind_addr: SocketAddr,

    /// Request path that is upgraded to the peer WebSocket.
    pub ws_path: String,

    /// Debug mode.
    ///
    /// When set, every dispatched command carries a diagnostic token and the
    /// page-build watchdog is armed.  When clear, no origin traces are
    /// captured at all.
    pub debug: bool,

    /// How long a query waits for its answer.  `None` waits forever.
    pub query_timeout: Option<Duration>,

    /// Page builds running longer than this are reported (debug mode only).
    pub page_build_warn_after: Duration,

    /// Diagnostic records older than this are swept on the next insert.
    pub diagnostic_retention: Duration,

    /// Interval between WebSocket keepalive pings.
    pub ping_interval: Duration,

    /// Sessions still buffering after this long are discarded.
    pub handshake_timeout: Duration,

    /// Directory watched for changes; every page is reloaded when it changes.
    pub watch_path: Option<PathBuf>,

    /// Quiet period that ends a burst of changes under `watch_path`.
    pub watch_debounce: Duration,

    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl ServerConfig {
    /// The page-build watchdog threshold, or `None` when the watchdog is off.
    pub fn watchdog_threshold(&self) -> Option<Duration> {
        self.debug.then_some(self.page_build_warn_after)
    }
}

impl Default for ServerConfig {
    /// | Field                   | Default        |
    /// |-------------------------|----------------|
    /// | bind_addr               | `0.0.0.0:7380` |
    /// | ws_path                 | `/bridge`      |
    /// | debug                   | `false`        |
    /// | query_timeout           | 30 seconds     |
    /// | page_build_warn_after   | 2 seconds      |
    /// | diagnostic_retention    | 60 seconds     |
    /// | ping_interval           | 15 seconds     |
    /// | handshake_timeout       | 60 seconds     |
    /// | watch_path              | none           |
    /// | watch_debounce          | 200 ms         |
    /// | log_level               | `info`         |
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 7380)),
            ws_path: "/bridge".to_string(),
            debug: false,
            query_timeout: Some(Duration::from_secs(30)),
            page_build_warn_after: Duration::from_secs(2),
            diagnostic_retention: Duration::from_secs(60),
            ping_interval: Duration::from_secs(15),
            handshake_timeout: Duration::from_secs(60),
            watch_path: None,
            watch_debounce: Duration::from_millis(200),
            log_level: "info".to_string(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
