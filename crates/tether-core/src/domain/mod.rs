//! Domain types for the tether protocol.
//!
//! Everything here is plain data: identifiers and the immutable record kept
//! for every dispatched command when diagnostics are enabled.  Nothing in this
//! module touches sockets, timers or threads, so it can be tested anywhere.

/// Opaque identifiers: sessions, diagnostic tokens and correlation ids.
pub mod ids;

/// Diagnostic records and captured origin traces.
pub mod diagnostic;
