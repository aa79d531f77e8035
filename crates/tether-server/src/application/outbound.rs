//! Per-session outbound channel.
//!
//! Commands can be issued for a session before its browser has connected
//! (typically while the page is still being built).  The channel therefore
//! starts in **buffering** mode, queueing encoded frames in memory.  When the
//! peer says hello the whole buffer is flushed, in order, onto the live
//! transport and the channel switches to **live** mode, where every frame goes
//! straight to the transport.
//!
//! ```text
//!   Buffering ──drain_and_switch──▶ Live
//!       │                            │
//!       └──────────close─────────────┴──▶ Closed
//! ```
//!
//! The flush and the mode switch happen under the channel's lock, so a
//! concurrent `send` either lands in the buffer before the flush or goes to
//! the transport after it.  No frame can overtake a buffered one.

use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use super::lock;

// ── Transport seam ────────────────────────────────────────────────────────────

/// The transport is gone; the frame was not delivered.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("peer transport is closed")]
pub struct TransportClosed;

/// Something that can carry one encoded frame to a connected peer.
///
/// `transmit` must not block: the WebSocket writer task owns the socket and
/// implementations hand frames to it through a queue.
pub trait PeerTransport: Send + Sync {
    fn transmit(&self, frame: String) -> Result<(), TransportClosed>;
}

impl PeerTransport for mpsc::UnboundedSender<String> {
    fn transmit(&self, frame: String) -> Result<(), TransportClosed> {
        self.send(frame).map_err(|_| TransportClosed)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// A second hello arrived for a session that is already live.
    #[error("channel is already live")]
    AlreadyLive,

    /// The session was torn down.
    #[error("channel is closed")]
    Closed,

    /// The live transport refused the frame; the channel is now closed.
    #[error(transparent)]
    Transport(#[from] TransportClosed),
}

// ── Channel ───────────────────────────────────────────────────────────────────

/// Observable mode of an [`OutboundChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Buffering { pending: usize },
    Live,
    Closed,
}

enum ChannelState {
    Buffering(Vec<String>),
    Live(Arc<dyn PeerTransport>),
    Closed,
}

pub struct OutboundChannel {
    state: Mutex<ChannelState>,
}

impl OutboundChannel {
    /// A new channel in buffering mode with an empty buffer.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Buffering(Vec::new())),
        }
    }

    /// Buffers or transmits one encoded frame, depending on the mode.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Closed`] after teardown.  [`ChannelError::Transport`]
    /// when the live transport has gone away; the channel closes itself.
    pub fn send(&self, frame: String) -> Result<(), ChannelError> {
        let mut state = lock(&self.state);
        let delivered = match &mut *state {
            ChannelState::Buffering(pending) => {
                pending.push(frame);
                return Ok(());
            }
            ChannelState::Live(transport) => transport.transmit(frame),
            ChannelState::Closed => return Err(ChannelError::Closed),
        };
        if let Err(e) = delivered {
            *state = ChannelState::Closed;
            return Err(e.into());
        }
        Ok(())
    }

    /// Flushes the buffer onto `transport`, oldest first, and makes the
    /// channel live.  Returns the number of frames flushed.
    ///
    /// # Errors
    ///
    /// [`ChannelError::AlreadyLive`] if a transport is already attached,
    /// [`ChannelError::Closed`] after teardown, and
    /// [`ChannelError::Transport`] if the transport fails mid-flush (the
    /// channel is closed and the rest of the buffer dropped).
    pub fn drain_and_switch(&self, transport: Arc<dyn PeerTransport>) -> Result<usize, ChannelError> {
        let mut state = lock(&self.state);
        let pending = match &mut *state {
            ChannelState::Buffering(pending) => std::mem::take(pending),
            ChannelState::Live(_) => return Err(ChannelError::AlreadyLive),
            ChannelState::Closed => return Err(ChannelError::Closed),
        };
        let flushed = pending.len();
        for frame in pending {
            if let Err(e) = transport.transmit(frame) {
                *state = ChannelState::Closed;
                return Err(e.into());
            }
        }
        *state = ChannelState::Live(transport);
        Ok(flushed)
    }

    /// Closes the channel, dropping any buffered frames and the transport
    /// handle.  Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let mut state = lock(&self.state);
        !matches!(
            std::mem::replace(&mut *state, ChannelState::Closed),
            ChannelState::Closed
        )
    }

    pub fn mode(&self) -> ChannelMode {
        match &*lock(&self.state) {
            ChannelState::Buffering(pending) => ChannelMode::Buffering {
                pending: pending.len(),
            },
            ChannelState::Live(_) => ChannelMode::Live,
            ChannelState::Closed => ChannelMode::Closed,
        }
    }

    pub fn is_live(&self) -> bool {
        self.mode() == ChannelMode::Live
    }
}

impl Default for OutboundChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OutboundChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundChannel")
            .field("mode", &self.mode())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
