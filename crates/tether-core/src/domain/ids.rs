//! Identifier types shared by server and peer.
//!
//! All three identifiers travel on the wire.  Session ids and diagnostic
//! tokens are opaque strings (the peer never interprets them); correlation ids
//! are plain integers because the browser side stores them as JavaScript
//! numbers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id pairing an outbound `Evaluate`/`Listen` with the inbound
/// `Callback` messages that answer it.
///
/// Allocated per session from a monotonically increasing counter, so it is
/// unique among the ids currently pending for that session.
pub type CallbackId = u64;

/// Opaque identifier of one server-side session (one connected peer).
///
/// Generated once per page request and never reused.  The peer echoes it in
/// every message it sends back.
///
/// # Example
///
/// ```rust
/// use tether_core::SessionId;
///
/// let a = SessionId::generate();
/// let b = SessionId::generate();
/// assert_ne!(a, b);
/// assert_eq!(a.as_str().len(), 32);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Allocates a fresh random session id (UUID v4, simple hex form).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is the empty string.
    ///
    /// Empty ids are never generated; the codec rejects them on decode.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Random token attached to a dispatched command so that a later remote
/// failure can be traced to the call site that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticToken(String);

impl DiagnosticToken {
    /// Allocates a fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DiagnosticToken {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl fmt::Display for DiagnosticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
