//! Domain layer for tether-server.
//!
//! Plain data with no I/O and no async runtime: the server configuration and
//! the page template handed to plugins and page builders.

pub mod config;
pub mod page;

pub use config::ServerConfig;
pub use page::{PageTemplate, BOOTSTRAP_SCRIPT};
