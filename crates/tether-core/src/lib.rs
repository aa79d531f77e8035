//! # tether-core
//!
//! Shared library for the tether remote-execution protocol: the wire message
//! shapes exchanged between a server and a browser peer, the identifiers that
//! tie those messages together, and the diagnostic records used to trace a
//! remote failure back to the server-side call site that caused it.
//!
//! This crate performs no I/O and has no async runtime dependency.  Both the
//! server and any test peer depend on it.
//!
//! # Architecture overview
//!
//! A server renders a page for a browser and keeps a *session* for it.  Code
//! on the server issues commands (JavaScript text) against the session; the
//! browser runs them and may answer.  This crate defines:
//!
//! - **`protocol`** – How messages travel over the transport.  Each message is
//!   one JSON object per WebSocket text frame.  Outbound messages
//!   (server → peer) are [`OutboundMessage`]; inbound ones (peer → server) are
//!   [`InboundMessage`].  The codec rejects inbound frames that carry zero or
//!   several message kinds.
//!
//! - **`domain`** – Identifiers ([`SessionId`], [`DiagnosticToken`],
//!   [`CallbackId`]) and the [`DiagnosticRecord`] captured at dispatch time.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `tether_core::SessionId` instead of `tether_core::domain::ids::SessionId`.
pub use domain::diagnostic::{
    DiagnosticRecord, DispatchAction, OriginTrace, RemoteFailure, TraceFrame,
};
pub use domain::ids::{CallbackId, DiagnosticToken, SessionId};
pub use protocol::codec::{decode_inbound, encode_outbound, ProtocolError};
pub use protocol::messages::{InboundMessage, OutboundBody, OutboundMessage};
