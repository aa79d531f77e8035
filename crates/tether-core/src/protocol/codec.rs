//! JSON codec for tether wire messages.
//!
//! The transport already delimits frames (one WebSocket text frame per
//! message), so there is no length prefix and no version byte: encoding is a
//! single `serde_json` call and decoding adds the kind validation described
//! in [`crate::protocol::messages`].
//!
//! Four functions cover both ends of the channel:
//!
//! | direction      | server side         | peer side            |
//! |----------------|---------------------|----------------------|
//! | server → peer  | [`encode_outbound`] | [`decode_outbound`]  |
//! | peer → server  | [`decode_inbound`]  | [`encode_inbound`]   |

use thiserror::Error;

use crate::protocol::messages::{InboundFrame, InboundMessage, OutboundMessage};

/// Errors raised while encoding or decoding a frame.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match the message shape.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// None of `hello`, `error`, `callback` was set.
    #[error("inbound frame carries no message kind (expected hello, error or callback)")]
    NoKind,

    /// More than one of `hello`, `error`, `callback` was set.
    #[error("inbound frame carries several message kinds: {}", .0.join(", "))]
    SeveralKinds(Vec<&'static str>),

    /// The `session` field is empty.
    #[error("frame carries an empty session id")]
    EmptySession,

    /// Serialization failed.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a server → peer message into the text of one frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use tether_core::{encode_outbound, OutboundMessage, SessionId};
///
/// let msg = OutboundMessage::execute(SessionId::from("s1"), "alert(1)", None);
/// let text = encode_outbound(&msg).unwrap();
/// assert!(text.contains(r#""execute""#));
/// ```
pub fn encode_outbound(msg: &OutboundMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a server → peer frame.  Used by peers and tests.
///
/// # Errors
///
/// Returns [`ProtocolError::Malformed`] for invalid JSON or an unknown kind,
/// [`ProtocolError::EmptySession`] for an empty session id.
pub fn decode_outbound(text: &str) -> Result<OutboundMessage, ProtocolError> {
    let msg: OutboundMessage =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    if msg.session.is_empty() {
        return Err(ProtocolError::EmptySession);
    }
    Ok(msg)
}

/// Encodes a peer → server message.  Used by peers and tests.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
pub fn encode_inbound(msg: &InboundMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(&InboundFrame::from(msg)).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes and validates a peer → server frame.
///
/// # Errors
///
/// - [`ProtocolError::Malformed`] – not JSON, or fields of the wrong type.
/// - [`ProtocolError::NoKind`] / [`ProtocolError::SeveralKinds`] – the frame
///   does not carry exactly one of `hello`, `error`, `callback`.
/// - [`ProtocolError::EmptySession`] – the session id is empty.
///
/// # Examples
///
/// ```rust
/// use tether_core::{decode_inbound, InboundMessage};
///
/// let msg = decode_inbound(r#"{"session":"s1","hello":true}"#).unwrap();
/// assert!(matches!(msg, InboundMessage::Hello { .. }));
/// ```
pub fn decode_inbound(text: &str) -> Result<InboundMessage, ProtocolError> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    InboundMessage::try_from(frame)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::diagnostic::RemoteFailure;
    use crate::domain::ids::{DiagnosticToken, SessionId};

    #[test]
    fn test_decode_inbound_rejects_non_json() {
        let result = decode_inbound("not json");
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_inbound_rejects_missing_session() {
        let result = decode_inbound(r#"{"hello":true}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_inbound_rejects_wrong_field_type() {
        // callback id must be a non-negative integer
        let result = decode_inbound(r#"{"session":"s","callback":{"id":"seven"}}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_inbound_ignores_unknown_fields() {
        // Peers may add fields (e.g. timing data); they must not break decoding.
        let msg = decode_inbound(r#"{"session":"s","hello":true,"ts":123}"#).unwrap();
        assert_eq!(msg.kind(), "hello");
    }

    #[test]
    fn test_encode_inbound_then_decode_preserves_error() {
        // Arrange
        let msg = InboundMessage::Error {
            session: SessionId::from("s"),
            token: DiagnosticToken::from("t"),
            failure: RemoteFailure::new("ReferenceError", "foo is not defined"),
        };

        // Act
        let text = encode_inbound(&msg).unwrap();
        let decoded = decode_inbound(&text).unwrap();

        // Assert
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_decode_outbound_reads_server_frame() {
        let text = r#"{"session":"s","evaluate":{"command":"1","callback":2}}"#;
        let msg = decode_outbound(text).unwrap();
        assert_eq!(msg.callback(), Some(2));
        assert_eq!(msg.command(), "1");
    }

    #[test]
    fn test_decode_outbound_rejects_unknown_kind() {
        let result = decode_outbound(r#"{"session":"s","teleport":{"command":"x"}}"#);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_outbound_rejects_empty_session() {
        let result = decode_outbound(r#"{"session":"","execute":{"command":"x"}}"#);
        assert_eq!(result, Err(ProtocolError::EmptySession));
    }

    #[test]
    fn test_several_kinds_error_message_lists_them() {
        let err = ProtocolError::SeveralKinds(vec!["hello", "error"]);
        assert_eq!(
            err.to_string(),
            "inbound frame carries several message kinds: hello, error"
        );
    }
}
