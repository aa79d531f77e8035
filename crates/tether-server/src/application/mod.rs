//! Application layer: sessions, dispatch and correlation.
//!
//! Everything here is transport-agnostic.  The infrastructure layer feeds
//! inbound frames in through [`Tether::handle_frame`] and hands each session
//! a [`PeerTransport`] to write to; application code talks to peers through
//! [`Tether::execute`], [`Tether::query`] and [`Tether::listen`].

pub mod broadcast;
pub mod callbacks;
pub mod correlator;
pub mod diagnostics;
pub mod error;
pub mod outbound;
pub mod plugins;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod watchdog;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use broadcast::{RefreshSummary, RELOAD_COMMAND};
pub use correlator::{Correlator, PendingQuery, Subscription};
pub use diagnostics::{log_every_failure, ErrorHook, ErrorReport};
pub use error::{DispatchError, InboundError, QueryError};
pub use outbound::{ChannelError, ChannelMode, OutboundChannel, PeerTransport, TransportClosed};
pub use plugins::{Plugin, PluginError, PluginSet};
pub use registry::SessionRegistry;
pub use runtime::{BlankPage, InboundOutcome, PageBuilder, PageRequest, RenderedPage, Tether};
pub use session::Session;
pub use watchdog::{watch_page_build, BuildSite, SlowBuild, StalledQuery};

/// Locks `mutex`, recovering the data if a previous holder panicked.
///
/// Every critical section in this layer leaves its map or buffer in a valid
/// state between statements, so a poisoned lock is still safe to use.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
