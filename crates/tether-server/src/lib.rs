//! tether-server library crate.
//!
//! A server that drives browser pages remotely.  Every page it serves
//! belongs to a *session*; code on the server issues JavaScript commands
//! against the session and the page (the *peer*) runs them, optionally
//! answering back.
//!
//! # Architecture
//!
//! ```text
//! Browser peer  (JSON over WebSocket, one object per text frame)
//!         ↕
//! [tether-server]
//!   ├── domain/           ServerConfig, PageTemplate
//!   ├── application/      sessions, outbound channels, correlator,
//!   │                     diagnostics, refresh, watchdog, plugins
//!   └── infrastructure/
//!         ├── server/     single-port listener, session reaper
//!         ├── http/       axum router: pages and the bridge upgrade
//!         ├── transport/  peer WebSocket tasks
//!         ├── watcher/    reload-on-change
//!         └── config_file/ TOML layer
//! ```
//!
//! # Layer rules
//!
//! - `domain` does no I/O.
//! - `application` depends on `domain` and `tether-core`, and uses tokio only
//!   for channels and timers; it never touches a socket.
//! - `infrastructure` owns every socket and file handle.
//!
//! # Life of a session
//!
//! 1. A browser requests a page.  A session is created in *buffering* mode
//!    and the application's page builder runs; any command it issues is
//!    queued.
//! 2. The page loads, opens the WebSocket and sends `hello`.  The queue is
//!    flushed in order and the session goes *live*.
//! 3. Commands now go straight to the socket.  Queries and subscriptions are
//!    answered through `callback` frames; failing commands come back as
//!    `error` frames and, in debug mode, are reported against the server
//!    call site that issued them.
//! 4. When the socket closes the session is torn down and every waiter is
//!    told so.

/// Domain layer: configuration and page template (no I/O).
pub mod domain;

/// Application layer: sessions, dispatch and correlation.
pub mod application;

/// Infrastructure layer: listener, HTTP, WebSocket transport, watcher.
pub mod infrastructure;

pub use application::Tether;
