//! Development-mode watcher over the routes root.
//!
//! The watcher only reports changes. Reacting to them (the app shuts its
//! listener and exits so a supervisor restarts it) is up to the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Extensions whose changes trigger a restart.
pub const WATCHED_EXTENSIONS: [&str; 2] = ["rs", "toml"];

/// Whether a change to `path` should trigger a restart.
pub fn is_route_source(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| WATCHED_EXTENSIONS.contains(&e))
}

/// Recursively watches a routes root, reporting changed route sources.
pub struct RouteWatcher {
    root: PathBuf,
    change_tx: mpsc::UnboundedSender<PathBuf>,
}

impl RouteWatcher {
    /// Returns the watcher and the receiver changed paths arrive on.
    pub fn new(root: &Path) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        (
            Self {
                root: root.to_path_buf(),
                change_tx,
            },
            change_rx,
        )
    }

    /// Starts watching on notify's background thread.
    ///
    /// Returns `Ok(None)` when the root does not exist; there is nothing to
    /// watch. The returned watcher stops when dropped.
    pub fn start(self) -> Result<Option<RecommendedWatcher>, notify::Error> {
        if !self.root.is_dir() {
            warn!(root = %self.root.display(), "routes root missing, hot reload disabled");
            return Ok(None);
        }

        let tx = self.change_tx;
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if is_change(&event.kind) => {
                    for path in event.paths.into_iter().filter(|p| is_route_source(p)) {
                        debug!(path = %path.display(), "route source changed");
                        let _ = tx.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "route watcher error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        watcher.watch(&self.root, RecursiveMode::Recursive)?;
        info!(root = %self.root.display(), "watching routes for changes");
        Ok(Some(watcher))
    }
}

fn is_change(kind: &EventKind) -> bool {
    kind.is_create() || kind.is_modify() || kind.is_remove()
}
