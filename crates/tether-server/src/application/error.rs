//! Error types for the application layer.

use std::time::Duration;

use thiserror::Error;

use tether_core::{CallbackId, DiagnosticToken, ProtocolError, RemoteFailure, SessionId};

use super::outbound::ChannelError;

/// A command could not be handed to a session's channel.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session {session}: {source}")]
    Channel {
        session: SessionId,
        #[source]
        source: ChannelError,
    },

    #[error("cannot encode command: {0}")]
    Encode(#[from] ProtocolError),
}

/// Why a query finished without an answer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum QueryError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The session was torn down before the peer answered.
    #[error("peer disconnected before answering")]
    Disconnected,

    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    /// The command threw in the peer.
    #[error("peer reported {0}")]
    Remote(RemoteFailure),
}

/// A message from the peer could not be applied.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InboundError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("unknown session {0}")]
    UnknownSession(SessionId),

    #[error("session {session}: no pending callback {id}")]
    UnknownCallback { session: SessionId, id: CallbackId },

    #[error("session {session}: unknown diagnostic token {token} for failure {failure}")]
    UnknownDiagnosticToken {
        session: SessionId,
        token: DiagnosticToken,
        failure: RemoteFailure,
    },

    #[error("session {session}: {source}")]
    Channel {
        session: SessionId,
        #[source]
        source: ChannelError,
    },
}
