//! Diagnostic tokens and remote-failure reporting.
//!
//! In debug mode every dispatched command is paired with a
//! [`DiagnosticRecord`] capturing the command text and where on the server
//! it was issued.  The record's token travels with the command; if the peer
//! later reports that the command threw, the token leads back to the record
//! and the operator gets a report pointing at the offending call site.
//!
//! Records leave the table when:
//!
//! - their error report is consumed (read once),
//! - their query is answered successfully,
//! - they are older than the retention window (swept lazily on insert),
//! - their session is torn down.
//!
//! Records belonging to a live subscription are *pinned*: the subscription
//! can fail any number of times, so reading the record does not consume it
//! and the sweep skips it until the subscription is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error};

use tether_core::{
    DiagnosticRecord, DiagnosticToken, DispatchAction, OriginTrace, RemoteFailure, SessionId,
};

use super::lock;

/// Decides whether a remote failure is logged.
///
/// Receives the origin trace of the failing command and the failure text.
/// Returning `false` suppresses the default `error!` line; the report is
/// still handed back to the caller.
pub type ErrorHook = Arc<dyn Fn(&OriginTrace, &str) -> bool + Send + Sync>;

/// The hook used when none is installed: log everything.
pub fn log_every_failure() -> ErrorHook {
    Arc::new(|_, _| true)
}

// ── Table ─────────────────────────────────────────────────────────────────────

struct Entry {
    record: DiagnosticRecord,
    pinned: bool,
}

/// Per-session map from diagnostic token to record.
pub struct DiagnosticTable {
    entries: Mutex<HashMap<DiagnosticToken, Entry>>,
    retention: Duration,
}

impl DiagnosticTable {
    pub fn new(retention: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            retention,
        }
    }

    /// Stores a record for a freshly dispatched command and returns its token.
    pub fn record(
        &self,
        source: &str,
        action: DispatchAction,
        origin: OriginTrace,
    ) -> DiagnosticToken {
        self.insert(DiagnosticRecord::new(source, action, origin), false)
    }

    /// Like [`DiagnosticTable::record`], for commands that may fail repeatedly.
    pub fn record_pinned(
        &self,
        source: &str,
        action: DispatchAction,
        origin: OriginTrace,
    ) -> DiagnosticToken {
        self.insert(DiagnosticRecord::new(source, action, origin), true)
    }

    fn insert(&self, record: DiagnosticRecord, pinned: bool) -> DiagnosticToken {
        let token = DiagnosticToken::generate();
        let mut entries = lock(&self.entries);
        let retention = self.retention;
        let before = entries.len();
        entries.retain(|_, entry| entry.pinned || entry.record.created_at().elapsed() < retention);
        let swept = before - entries.len();
        if swept > 0 {
            debug!(swept, "expired diagnostic records removed");
        }
        entries.insert(token.clone(), Entry { record, pinned });
        token
    }

    /// Looks up the record for a reported failure.  Unpinned records are
    /// consumed; pinned ones stay for the next failure.
    pub fn claim(&self, token: &DiagnosticToken) -> Option<DiagnosticRecord> {
        let mut entries = lock(&self.entries);
        if entries.get(token)?.pinned {
            return entries.get(token).map(|entry| entry.record.clone());
        }
        entries.remove(token).map(|entry| entry.record)
    }

    /// Drops a record whose command can no longer fail.
    pub fn discard(&self, token: &DiagnosticToken) -> bool {
        lock(&self.entries).remove(token).is_some()
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    /// Where the command behind `token` was issued, leaving the record in place.
    pub fn origin_of(&self, token: &DiagnosticToken) -> Option<String> {
        lock(&self.entries)
            .get(token)
            .map(|entry| entry.record.origin().location().to_string())
    }

    pub fn contains(&self, token: &DiagnosticToken) -> bool {
        lock(&self.entries).contains_key(token)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

/// A remote failure joined with the record of the command that caused it.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub session: SessionId,
    pub token: DiagnosticToken,
    pub failure: RemoteFailure,
    pub record: DiagnosticRecord,
    /// Whether the error hook let the report through to the log.
    pub logged: bool,
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session {}: {}",
            self.session,
            self.record.render_report(&self.failure)
        )
    }
}

/// Builds the report for a failure already matched to its record and passes
/// it through `hook`; logs it at `error` level unless the hook declines.
pub fn report_failure(
    session: &SessionId,
    token: DiagnosticToken,
    failure: RemoteFailure,
    record: DiagnosticRecord,
    hook: &ErrorHook,
) -> ErrorReport {
    let logged = hook(record.origin(), &failure.to_string());
    let report = ErrorReport {
        session: session.clone(),
        token,
        failure,
        record,
        logged,
    };
    if logged {
        error!(session = %report.session, "{}", report.record.render_report(&report.failure));
    }
    report
}

// ── Tests ─────────────────────────────────────────────────────────────────────
