//! Wire message shapes for the server ↔ peer channel.
//!
//! Every message is a single JSON object sent as one transport frame.  Both
//! directions carry the session id so a single physical transport could be
//! multiplexed across sessions.
//!
//! # Server → peer
//!
//! ```json
//! {"session":"9f3c…","execute":{"command":"document.title='hi'","token":"a1b2…"}}
//! {"session":"9f3c…","evaluate":{"command":"navigator.userAgent","callback":4}}
//! {"session":"9f3c…","listen":{"command":"document.onclick=e=>emit(e.x)","callback":5}}
//! ```
//!
//! The `token` field is present only when diagnostics are enabled.
//!
//! # Peer → server
//!
//! ```json
//! {"session":"9f3c…","hello":true}
//! {"session":"9f3c…","callback":{"id":4,"result":"Mozilla/5.0 …"}}
//! {"session":"9f3c…","error":{"token":"a1b2…","name":"TypeError","message":"x is null"}}
//! ```
//!
//! Inbound frames are decoded through [`InboundFrame`], a permissive struct in
//! which every kind is optional, and then validated into the [`InboundMessage`]
//! sum type.  A frame with none or several of `hello` / `error` / `callback`
//! set is rejected rather than guessed at.

use serde::{Deserialize, Serialize};

use crate::domain::diagnostic::RemoteFailure;
use crate::domain::ids::{CallbackId, DiagnosticToken, SessionId};
use crate::protocol::codec::ProtocolError;

// ── Server → peer ─────────────────────────────────────────────────────────────

/// A message sent from the server to the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Target session; echoed back by the peer in every reply.
    pub session: SessionId,
    /// What the peer should do.
    #[serde(flatten)]
    pub body: OutboundBody,
}

/// The three things a server can ask of a peer.
///
/// Serialized externally tagged, so the variant name becomes the JSON key
/// next to `"session"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundBody {
    /// Run `command`; no answer expected.
    Execute {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<DiagnosticToken>,
    },

    /// Evaluate `command` and answer once with a `Callback` bearing `callback`.
    Evaluate {
        command: String,
        callback: CallbackId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<DiagnosticToken>,
    },

    /// Run `command` with an `emit` function in scope; every call to `emit`
    /// answers with a `Callback` bearing `callback`.
    Listen {
        command: String,
        callback: CallbackId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<DiagnosticToken>,
    },
}

impl OutboundMessage {
    /// Builds an `Execute` message.
    pub fn execute(
        session: SessionId,
        command: impl Into<String>,
        token: Option<DiagnosticToken>,
    ) -> Self {
        Self {
            session,
            body: OutboundBody::Execute {
                command: command.into(),
                token,
            },
        }
    }

    /// Builds an `Evaluate` message.
    pub fn evaluate(
        session: SessionId,
        command: impl Into<String>,
        callback: CallbackId,
        token: Option<DiagnosticToken>,
    ) -> Self {
        Self {
            session,
            body: OutboundBody::Evaluate {
                command: command.into(),
                callback,
                token,
            },
        }
    }

    /// Builds a `Listen` message.
    pub fn listen(
        session: SessionId,
        command: impl Into<String>,
        callback: CallbackId,
        token: Option<DiagnosticToken>,
    ) -> Self {
        Self {
            session,
            body: OutboundBody::Listen {
                command: command.into(),
                callback,
                token,
            },
        }
    }

    /// The command text carried by this message.
    pub fn command(&self) -> &str {
        match &self.body {
            OutboundBody::Execute { command, .. }
            | OutboundBody::Evaluate { command, .. }
            | OutboundBody::Listen { command, .. } => command,
        }
    }

    /// The diagnostic token, if one was attached.
    pub fn token(&self) -> Option<&DiagnosticToken> {
        match &self.body {
            OutboundBody::Execute { token, .. }
            | OutboundBody::Evaluate { token, .. }
            | OutboundBody::Listen { token, .. } => token.as_ref(),
        }
    }

    /// The correlation id for `Evaluate` and `Listen`; `None` for `Execute`.
    pub fn callback(&self) -> Option<CallbackId> {
        match &self.body {
            OutboundBody::Execute { .. } => None,
            OutboundBody::Evaluate { callback, .. } | OutboundBody::Listen { callback, .. } => {
                Some(*callback)
            }
        }
    }

    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self.body {
            OutboundBody::Execute { .. } => "execute",
            OutboundBody::Evaluate { .. } => "evaluate",
            OutboundBody::Listen { .. } => "listen",
        }
    }
}

// ── Peer → server ─────────────────────────────────────────────────────────────

/// A validated message received from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// The transport is ready: flush everything buffered for this session.
    Hello { session: SessionId },

    /// A command carrying `token` threw on the peer.
    Error {
        session: SessionId,
        token: DiagnosticToken,
        failure: RemoteFailure,
    },

    /// Answer to an `Evaluate` (once) or a `Listen` (any number of times).
    Callback {
        session: SessionId,
        id: CallbackId,
        /// `None` when the peer sent no result; handlers see an empty string.
        result: Option<String>,
    },
}

impl InboundMessage {
    /// The session the message claims to belong to.
    pub fn session(&self) -> &SessionId {
        match self {
            InboundMessage::Hello { session }
            | InboundMessage::Error { session, .. }
            | InboundMessage::Callback { session, .. } => session,
        }
    }

    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Hello { .. } => "hello",
            InboundMessage::Error { .. } => "error",
            InboundMessage::Callback { .. } => "callback",
        }
    }
}

/// The raw JSON shape of an inbound frame, before validation.
///
/// Peers (and tests acting as peers) build this to encode; the server decodes
/// into it and converts with `InboundMessage::try_from`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundFrame {
    pub session: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hello: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<CallbackPayload>,
}

/// `error` member of an inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub token: DiagnosticToken,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
}

/// `callback` member of an inbound frame.
///
/// `result` accepts any JSON value: strings are taken as-is, `null` means
/// "no result", anything else is kept as compact JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    pub id: CallbackId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

impl TryFrom<InboundFrame> for InboundMessage {
    type Error = ProtocolError;

    fn try_from(frame: InboundFrame) -> Result<Self, ProtocolError> {
        if frame.session.is_empty() {
            return Err(ProtocolError::EmptySession);
        }

        let hello = frame.hello == Some(true);
        let mut present: Vec<&'static str> = Vec::with_capacity(3);
        if hello {
            present.push("hello");
        }
        if frame.error.is_some() {
            present.push("error");
        }
        if frame.callback.is_some() {
            present.push("callback");
        }
        if present.len() > 1 {
            return Err(ProtocolError::SeveralKinds(present));
        }

        let session = frame.session;
        match (hello, frame.error, frame.callback) {
            (true, None, None) => Ok(InboundMessage::Hello { session }),
            (false, Some(err), None) => Ok(InboundMessage::Error {
                session,
                token: err.token,
                failure: RemoteFailure::new(err.name, err.message),
            }),
            (false, None, Some(cb)) => Ok(InboundMessage::Callback {
                session,
                id: cb.id,
                result: cb.result.and_then(result_text),
            }),
            _ => Err(ProtocolError::NoKind),
        }
    }
}

impl From<&InboundMessage> for InboundFrame {
    fn from(msg: &InboundMessage) -> Self {
        match msg {
            InboundMessage::Hello { session } => InboundFrame {
                session: session.clone(),
                hello: Some(true),
                ..Default::default()
            },
            InboundMessage::Error {
                session,
                token,
                failure,
            } => InboundFrame {
                session: session.clone(),
                error: Some(ErrorPayload {
                    token: token.clone(),
                    name: failure.name.clone(),
                    message: failure.message.clone(),
                }),
                ..Default::default()
            },
            InboundMessage::Callback {
                session,
                id,
                result,
            } => InboundFrame {
                session: session.clone(),
                callback: Some(CallbackPayload {
                    id: *id,
                    result: result.clone().map(serde_json::Value::String),
                }),
                ..Default::default()
            },
        }
    }
}

fn result_text(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
