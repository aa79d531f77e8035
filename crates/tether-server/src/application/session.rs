//! One browser peer's server-side state.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use tether_core::protocol::CallbackCounter;
use tether_core::{CallbackId, SessionId};

use super::callbacks::CallbackTable;
use super::diagnostics::DiagnosticTable;
use super::outbound::{ChannelMode, OutboundChannel};

/// Everything the server tracks for one page load.
///
/// Shared as `Arc<Session>`: the registry, every in-flight query and every
/// subscription hold a handle.  All interior state is independently locked,
/// so work on one session never waits on another.
pub struct Session {
    id: SessionId,
    channel: OutboundChannel,
    callbacks: CallbackTable,
    diagnostics: DiagnosticTable,
    counter: CallbackCounter,
    created_at: Instant,
}

impl Session {
    pub fn new(id: SessionId, diagnostic_retention: Duration) -> Self {
        Self {
            id,
            channel: OutboundChannel::new(),
            callbacks: CallbackTable::default(),
            diagnostics: DiagnosticTable::new(diagnostic_retention),
            counter: CallbackCounter::new(),
            created_at: Instant::now(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn channel(&self) -> &OutboundChannel {
        &self.channel
    }

    pub fn callbacks(&self) -> &CallbackTable {
        &self.callbacks
    }

    pub fn diagnostics(&self) -> &DiagnosticTable {
        &self.diagnostics
    }

    /// Allocates the next callback id for this session.
    pub fn next_callback_id(&self) -> CallbackId {
        self.counter.next()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// True while no peer has said hello and `max_age` has passed.
    pub fn is_abandoned(&self, max_age: Duration) -> bool {
        matches!(self.channel.mode(), ChannelMode::Buffering { .. })
            && self.created_at.elapsed() >= max_age
    }

    /// Closes the channel, fails every pending callback and forgets every
    /// diagnostic record.  Idempotent.
    pub fn teardown(&self) {
        let was_open = self.channel.close();
        let failed = self.callbacks.fail_all();
        self.diagnostics.clear();
        if was_open {
            debug!(session = %self.id, failed, "session torn down");
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("pending_callbacks", &self.callbacks.len())
            .field("diagnostic_records", &self.diagnostics.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::callbacks::PendingCallback;
    use tokio::sync::oneshot;

    fn session() -> Session {
        Session::new(SessionId::from("s1"), Duration::from_secs(60))
    }

    #[test]
    fn test_callback_ids_increase_per_session() {
        let a = session();
        let b = session();
        assert_eq!(a.next_callback_id(), 0);
        assert_eq!(a.next_callback_id(), 1);
        assert_eq!(b.next_callback_id(), 0);
    }

    #[test]
    fn test_teardown_closes_channel_and_fails_callbacks() {
        // Arrange
        let s = session();
        let (tx, mut rx) = oneshot::channel();
        s.callbacks()
            .register(0, PendingCallback::Once { reply: tx, token: None });

        // Act
        s.teardown();
        s.teardown();

        // Assert
        assert_eq!(s.channel().mode(), ChannelMode::Closed);
        assert!(s.callbacks().is_empty());
        assert!(rx.try_recv().unwrap().is_err());
    }

    #[test]
    fn test_fresh_session_is_not_abandoned() {
        let s = session();
        assert!(!s.is_abandoned(Duration::from_secs(60)));
        assert!(s.is_abandoned(Duration::ZERO));
    }
}
