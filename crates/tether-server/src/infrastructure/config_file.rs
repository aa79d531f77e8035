//! Optional TOML configuration file.
//!
//! Every key is optional; a missing key leaves the lower layer's value in
//! place.  Durations are plain integers with the unit in the key name.
//!
//! ```toml
//! bind_addr = "127.0.0.1:7380"
//! ws_path = "/bridge"
//! debug = true
//! query_timeout_secs = 10      # 0 waits forever
//! page_build_warn_after_ms = 500
//! diagnostic_retention_secs = 120
//! ping_interval_secs = 20
//! handshake_timeout_secs = 30
//! watch_path = "./site"
//! watch_debounce_ms = 100
//! log_level = "debug"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::ServerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind_addr: Option<SocketAddr>,
    pub ws_path: Option<String>,
    pub debug: Option<bool>,
    pub query_timeout_secs: Option<u64>,
    pub page_build_warn_after_ms: Option<u64>,
    pub diagnostic_retention_secs: Option<u64>,
    pub ping_interval_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub watch_path: Option<PathBuf>,
    pub watch_debounce_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl FileConfig {
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Overlays the keys present in the file onto `base`.
    pub fn apply(self, mut base: ServerConfig) -> ServerConfig {
        if let Some(v) = self.bind_addr {
            base.bind_addr = v;
        }
        if let Some(v) = self.ws_path {
            base.ws_path = v;
        }
        if let Some(v) = self.debug {
            base.debug = v;
        }
        if let Some(secs) = self.query_timeout_secs {
            base.query_timeout = timeout_from_secs(secs);
        }
        if let Some(ms) = self.page_build_warn_after_ms {
            base.page_build_warn_after = Duration::from_millis(ms);
        }
        if let Some(secs) = self.diagnostic_retention_secs {
            base.diagnostic_retention = Duration::from_secs(secs);
        }
        if let Some(secs) = self.ping_interval_secs {
            base.ping_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.handshake_timeout_secs {
            base.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = self.watch_path {
            base.watch_path = Some(v);
        }
        if let Some(ms) = self.watch_debounce_ms {
            base.watch_debounce = Duration::from_millis(ms);
        }
        if let Some(v) = self.log_level {
            base.log_level = v;
        }
        base
    }
}

/// `0` means no timeout.
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_changes_nothing() {
        let file = FileConfig::parse("").unwrap();
        assert_eq!(file.apply(ServerConfig::default()), ServerConfig::default());
    }

    #[test]
    fn test_present_keys_override_defaults() {
        // Arrange
        let text = r#"
            bind_addr = "127.0.0.1:9000"
            debug = true
            query_timeout_secs = 5
            page_build_warn_after_ms = 500
            watch_path = "site"
        "#;

        // Act
        let cfg = FileConfig::parse(text).unwrap().apply(ServerConfig::default());

        // Assert
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert!(cfg.debug);
        assert_eq!(cfg.query_timeout, Some(Duration::from_secs(5)));
        assert_eq!(cfg.page_build_warn_after, Duration::from_millis(500));
        assert_eq!(cfg.watch_path, Some(PathBuf::from("site")));
        assert_eq!(cfg.ws_path, "/bridge");
    }

    #[test]
    fn test_zero_query_timeout_disables_it() {
        let cfg = FileConfig::parse("query_timeout_secs = 0")
            .unwrap()
            .apply(ServerConfig::default());
        assert_eq!(cfg.query_timeout, None);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let result = FileConfig::parse("colour = \"blue\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = FileConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.toml"));
    }
}
