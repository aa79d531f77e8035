//! Infrastructure layer: sockets, files and timers.
//!
//! - `server`      – serves the router on a single port, abandoned-session reaper
//! - `http`        – axum router: page requests and the bridge upgrade
//! - `transport`   – WebSocket writer/reader tasks for a connected peer
//! - `watcher`     – watches a directory and reloads every page on change
//! - `config_file` – optional TOML configuration layer

pub mod config_file;
pub mod http;
pub mod server;
pub mod transport;
pub mod watcher;

pub use config_file::{ConfigError, FileConfig};
pub use http::router;
pub use server::{run_server, serve};
pub use watcher::run_watcher;
