//! Slow page-build detection.
//!
//! Building a page may issue queries against a peer that has not connected
//! yet; those queries can only be answered after the page is served, so a
//! build that awaits them never finishes.  The watchdog makes that mistake
//! visible: once a build has run longer than the threshold it logs a warning
//! naming the page builder, the request path and every query the session is
//! still waiting on, with the line that issued it.  It never aborts the build.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use tether_core::{CallbackId, SessionId};

use super::session::Session;

/// The page build being watched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSite {
    /// Type name of the application's page builder.
    pub builder: &'static str,
    pub path: String,
}

/// A query the session was still waiting on when the threshold passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledQuery {
    pub id: CallbackId,
    /// `file:line:col` of the call that issued it; `None` without diagnostics.
    pub origin: Option<String>,
}

/// Snapshot taken when a build overruns its threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowBuild {
    pub session: SessionId,
    pub builder: &'static str,
    pub path: String,
    pub elapsed: Duration,
    pub pending: Vec<StalledQuery>,
}

impl SlowBuild {
    fn snapshot(session: &Session, site: &BuildSite, elapsed: Duration) -> Self {
        let pending = session
            .callbacks()
            .pending_queries()
            .into_iter()
            .map(|(id, token)| StalledQuery {
                id,
                origin: token.and_then(|token| session.diagnostics().origin_of(&token)),
            })
            .collect();
        Self {
            session: session.id().clone(),
            builder: site.builder,
            path: site.path.clone(),
            elapsed,
            pending,
        }
    }
}

impl fmt::Display for SlowBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "page builder {} for {} still running after {} ms",
            self.builder,
            self.path,
            self.elapsed.as_millis()
        )?;
        for query in &self.pending {
            match &query.origin {
                Some(origin) => write!(f, "; waiting on query {} issued at {origin}", query.id)?,
                None => write!(f, "; waiting on query {}", query.id)?,
            }
        }
        Ok(())
    }
}

/// Runs `build` to completion, warning once if it exceeds `threshold`.
///
/// Returns the build's output and, if the warning fired, what was pending at
/// that moment.  `threshold = None` disables the watchdog (production mode).
pub async fn watch_page_build<F>(
    session: &Session,
    site: &BuildSite,
    threshold: Option<Duration>,
    build: F,
) -> (F::Output, Option<SlowBuild>)
where
    F: Future,
{
    let Some(threshold) = threshold else {
        return (build.await, None);
    };
    let started = Instant::now();
    tokio::pin!(build);
    let slow = tokio::select! {
        output = &mut build => return (output, None),
        _ = tokio::time::sleep(threshold) => {
            SlowBuild::snapshot(session, site, started.elapsed())
        }
    };
    warn!(
        session = %slow.session,
        builder = slow.builder,
        path = %slow.path,
        elapsed_ms = slow.elapsed.as_millis() as u64,
        pending = slow.pending.len(),
        "{slow}; queries awaited during a build cannot be answered before the page is served"
    );
    let output = build.await;
    info!(
        session = %slow.session,
        builder = slow.builder,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "slow page build finished"
    );
    (output, Some(slow))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
