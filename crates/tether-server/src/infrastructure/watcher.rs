//! Change watcher: reload every page when files change.
//!
//! A `notify` watcher on the directory forwards filesystem events into a
//! tokio channel.  Events arriving close together form one burst; once
//! `debounce` passes without another event, [`Tether::refresh_all`] is
//! called once for the whole burst.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::application::Tether;

const STOP_POLL: Duration = Duration::from_millis(200);

/// Paths touched by one event.
pub type ChangedPaths = Vec<PathBuf>;

/// Events absorbed into a single refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBurst {
    pub events: usize,
    pub paths: BTreeSet<PathBuf>,
}

impl ChangeBurst {
    fn absorb(&mut self, paths: ChangedPaths) {
        self.events += 1;
        self.paths.extend(paths);
    }
}

/// Collects the burst that starts with `first`, returning once `window`
/// passes with no further event or the sender is gone.
pub async fn settle(
    events: &mut mpsc::UnboundedReceiver<ChangedPaths>,
    first: ChangedPaths,
    window: Duration,
) -> ChangeBurst {
    let mut burst = ChangeBurst::default();
    burst.absorb(first);
    while let Ok(Some(paths)) = timeout(window, events.recv()).await {
        burst.absorb(paths);
    }
    burst
}

/// Starts a recursive watch on `root`.  The watcher stops when dropped.
///
/// # Errors
///
/// Returns an error if the platform watcher cannot be created or `root`
/// cannot be watched.
pub fn watch_directory(
    root: &Path,
) -> anyhow::Result<(RecommendedWatcher, mpsc::UnboundedReceiver<ChangedPaths>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) if event.kind.is_access() => {}
        Ok(event) => {
            let _ = tx.send(event.paths);
        }
        Err(e) => warn!("watch error: {e}"),
    })
    .context("creating file watcher")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", root.display()))?;
    Ok((watcher, rx))
}

/// Watches `root` until `running` is cleared, reloading every page after
/// each burst of changes.
///
/// # Errors
///
/// See [`watch_directory`].
pub async fn run_watcher(
    root: PathBuf,
    debounce: Duration,
    tether: Arc<Tether>,
    running: Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let (_watcher, mut events) = watch_directory(&root)?;
    info!("watching {} for changes", root.display());
    let mut stop = interval(STOP_POLL);
    loop {
        tokio::select! {
            first = events.recv() => {
                let Some(first) = first else { break };
                let burst = settle(&mut events, first, debounce).await;
                debug!(
                    events = burst.events,
                    paths = burst.paths.len(),
                    "change detected under {}",
                    root.display()
                );
                tether.refresh_all();
            }
            _ = stop.tick() => {
                if !running.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
    }
    info!("stopped watching {}", root.display());
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
