//! Diagnostic records: what was dispatched, how, and from where.
//!
//! When diagnostics are enabled, every command the server sends to a peer is
//! paired with a [`DiagnosticRecord`] kept on the server and a random token
//! sent with the message.  If the peer later reports that the command threw,
//! the report carries the token back and the record tells the operator which
//! line of server code issued the failing command.
//!
//! # Why capture a trace at all?
//!
//! The failure happens in another process (the browser) and in another
//! language (JavaScript), long after the Rust call returned.  The remote stack
//! trace only shows the browser side.  The captured [`OriginTrace`] is the
//! only link back to the Rust call site.

use std::backtrace::Backtrace;
use std::fmt;
use std::panic::Location;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Symbol prefixes that are runtime or protocol plumbing rather than
/// application code.  Frames starting with any of these are dropped from the
/// pruned trace.
const INTERNAL_FRAME_PREFIXES: &[&str] = &[
    "std::",
    "core::",
    "alloc::",
    "tokio::",
    "futures_util::",
    "futures_core::",
    "tether_core::",
    "tether_server::application::",
    "<std::",
    "<core::",
    "<alloc::",
    "<tokio::",
    "<futures_util::",
    "<tether_server::application::",
    "__rust",
    "__libc_start",
    "_start",
    "start_thread",
    "__clone",
    "rust_begin_unwind",
];

/// The way a command was dispatched; rendered as a human-readable label in
/// failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchAction {
    /// Fire-and-forget `execute`.
    Executing,
    /// `listen`: the command stays attached to a callback that may fire many
    /// times.
    ExecutingWithCallback,
    /// `query`: a single result is expected.
    Evaluating,
}

impl DispatchAction {
    /// Returns the label used in reports, e.g. `"executing"`.
    pub fn label(self) -> &'static str {
        match self {
            DispatchAction::Executing => "executing",
            DispatchAction::ExecutingWithCallback => "executing with callback",
            DispatchAction::Evaluating => "evaluating",
        }
    }
}

impl fmt::Display for DispatchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Structured failure reported by the peer: the JavaScript error name and
/// its message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    /// Error class name, e.g. `"TypeError"`.
    pub name: String,
    /// Human-readable message from the remote runtime.
    pub message: String,
}

impl RemoteFailure {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.name, self.message)
        }
    }
}

/// One frame of a captured backtrace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Demangled symbol name.
    pub symbol: String,
    /// `file:line:col` when debug info was available.
    pub location: Option<String>,
}

impl TraceFrame {
    /// Returns `true` for frames that belong to the runtime or to the protocol
    /// machinery itself.
    pub fn is_internal(&self) -> bool {
        INTERNAL_FRAME_PREFIXES
            .iter()
            .any(|prefix| self.symbol.starts_with(prefix))
    }
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({location})", self.symbol),
            None => f.write_str(&self.symbol),
        }
    }
}

/// The server-side call stack at the moment a command was dispatched.
///
/// Two pieces are kept:
///
/// - `location` – the exact source position of the dispatching call, obtained
///   through `#[track_caller]`.  Always available, even in release builds.
/// - `frames` – a full backtrace.  Empty when the platform cannot unwind or
///   debug info was stripped.
#[derive(Debug, Clone)]
pub struct OriginTrace {
    location: &'static Location<'static>,
    frames: Vec<TraceFrame>,
}

impl OriginTrace {
    /// Captures the caller's location and the current backtrace.
    ///
    /// `#[track_caller]` must be present on every function between the
    /// application call site and this one for `location` to point at
    /// application code.
    #[track_caller]
    pub fn capture() -> Self {
        let location = Location::caller();
        let backtrace = Backtrace::force_capture();
        Self {
            location,
            frames: parse_backtrace(&backtrace.to_string()),
        }
    }

    /// Builds a trace from an already-known location and frame list.
    pub fn from_parts(location: &'static Location<'static>, frames: Vec<TraceFrame>) -> Self {
        Self { location, frames }
    }

    /// Source position of the dispatching call.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Every captured frame, innermost first.
    pub fn frames(&self) -> &[TraceFrame] {
        &self.frames
    }

    /// Frames that belong to application code, innermost first.
    pub fn pruned(&self) -> Vec<&TraceFrame> {
        self.frames.iter().filter(|f| !f.is_internal()).collect()
    }
}

/// Parses the text form of [`std::backtrace::Backtrace`].
///
/// The format is a numbered symbol line optionally followed by an indented
/// `at file:line:col` line:
///
/// ```text
///    3: my_app::build_page
///              at ./src/page.rs:12:5
/// ```
///
/// Disabled or unsupported backtraces render as a single sentence and yield
/// no frames.
fn parse_backtrace(text: &str) -> Vec<TraceFrame> {
    let mut frames: Vec<TraceFrame> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some(location) = line.strip_prefix("at ") {
            if let Some(last) = frames.last_mut() {
                last.location = Some(location.to_owned());
            }
            continue;
        }
        let Some((index, symbol)) = line.split_once(": ") else {
            continue;
        };
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        frames.push(TraceFrame {
            symbol: symbol.to_owned(),
            location: None,
        });
    }
    frames
}

/// Immutable record of one dispatched command.
///
/// Created synchronously at dispatch, read at most once when a matching
/// error message arrives, never mutated.
#[derive(Debug, Clone)]
pub struct DiagnosticRecord {
    source: String,
    action: DispatchAction,
    origin: OriginTrace,
    created_at: Instant,
}

impl DiagnosticRecord {
    pub fn new(source: impl Into<String>, action: DispatchAction, origin: OriginTrace) -> Self {
        Self {
            source: source.into(),
            action,
            origin,
            created_at: Instant::now(),
        }
    }

    /// The command text exactly as it was sent.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn action(&self) -> DispatchAction {
        self.action
    }

    pub fn origin(&self) -> &OriginTrace {
        &self.origin
    }

    /// When the record was created; used for retention sweeps.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Renders an operator-facing report for a remote failure of this command.
    ///
    /// ```text
    /// remote failure while evaluating `document.body.foo()`: TypeError: foo is not a function
    ///   dispatched at src/page.rs:12:5
    ///   origin:
    ///     my_app::build_page (./src/page.rs:12:5)
    /// ```
    pub fn render_report(&self, failure: &RemoteFailure) -> String {
        let mut report = format!(
            "remote failure while {} `{}`: {}\n  dispatched at {}",
            self.action, self.source, failure, self.origin.location
        );
        let pruned = self.origin.pruned();
        if !pruned.is_empty() {
            report.push_str("\n  origin:");
            for frame in pruned {
                report.push_str("\n    ");
                report.push_str(&frame.to_string());
            }
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
