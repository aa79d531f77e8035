//! Reload every connected page.

use tracing::{debug, info};

use tether_core::{encode_outbound, OutboundMessage};

use super::registry::SessionRegistry;

/// Command that makes a peer reload its page.
pub const RELOAD_COMMAND: &str = "window.location.reload()";

/// Outcome of a [`refresh_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Sessions whose channel accepted the reload (sent or buffered).
    pub delivered: usize,
    /// Sessions whose channel was already closed.
    pub skipped: usize,
}

/// Sends [`RELOAD_COMMAND`] to every session registered when the call starts.
///
/// The registry is snapshotted first so no map lock is held while sending.
/// Reloads carry no diagnostic token.
pub fn refresh_all(registry: &SessionRegistry) -> RefreshSummary {
    let mut summary = RefreshSummary::default();
    for session in registry.all() {
        let message = OutboundMessage::execute(session.id().clone(), RELOAD_COMMAND, None);
        let sent = encode_outbound(&message)
            .map_err(|e| e.to_string())
            .and_then(|frame| session.channel().send(frame).map_err(|e| e.to_string()));
        match sent {
            Ok(()) => summary.delivered += 1,
            Err(reason) => {
                debug!(session = %session.id(), %reason, "reload not delivered");
                summary.skipped += 1;
            }
        }
    }
    info!(
        delivered = summary.delivered,
        skipped = summary.skipped,
        "refresh broadcast"
    );
    summary
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::outbound::{tests::RecordingTransport, ChannelMode};
    use std::sync::Arc;
    use std::time::Duration;
    use tether_core::protocol::decode_outbound;

    #[test]
    fn test_refresh_reaches_live_and_buffering_sessions() {
        // Arrange
        let registry = SessionRegistry::new(Duration::from_secs(60));
        let live = registry.create();
        let buffering = registry.create();
        let transport = Arc::new(RecordingTransport::default());
        live.channel().drain_and_switch(transport.clone()).unwrap();

        // Act
        let summary = refresh_all(&registry);

        // Assert
        assert_eq!(summary, RefreshSummary { delivered: 2, skipped: 0 });
        let frames = transport.frames();
        assert_eq!(frames.len(), 1);
        let message = decode_outbound(&frames[0]).unwrap();
        assert_eq!(message.command(), RELOAD_COMMAND);
        assert_eq!(&message.session, live.id());
        assert!(message.token().is_none());
        assert_eq!(
            buffering.channel().mode(),
            ChannelMode::Buffering { pending: 1 }
        );
    }

    #[test]
    fn test_refresh_skips_closed_sessions() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        registry.create().channel().close();
        registry.create();
        assert_eq!(
            refresh_all(&registry),
            RefreshSummary { delivered: 1, skipped: 1 }
        );
    }

    #[test]
    fn test_refresh_with_no_sessions_is_a_no_op() {
        let registry = SessionRegistry::new(Duration::from_secs(60));
        assert_eq!(refresh_all(&registry), RefreshSummary::default());
    }
}
