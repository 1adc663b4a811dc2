use std::collections::BTreeSet;
use std::sync::mpsc::{RecvError, RecvTimeoutError, channel};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::new_debouncer;

use super::WatchOrchestrator;
use super::paths::{outermost, uncovered_dirs, watch_root};
use crate::error::WatchError;

/// Coalesces the raw events of a single save; the bindings debounce on top.
const SETTLE: Duration = Duration::from_millis(20);

/// How often tracked files are checked for directories not yet watched.
const RESYNC: Duration = Duration::from_millis(250);

/// Watches every directory the orchestrator's bindings care about and routes
/// file events to them. Blocks for as long as the watcher is alive.
///
/// Globs are watched recursively from their static prefix. Tracked files
/// outside those roots get a watch on their own directory, added and
/// removed as the tracked set changes.
pub fn watch(orchestrator: &WatchOrchestrator) -> Result<(), WatchError> {
    let (tx, rx) = channel();
    let mut debouncer = new_debouncer(SETTLE, None, tx)?;

    let mut globs = vec![];
    for glob in orchestrator.globs() {
        let root = watch_root(glob).map_err(|e| WatchError::Resolve(glob.to_string(), e))?;
        globs.push(root);
    }

    let roots = outermost(globs);
    for root in &roots {
        tracing::info!("watching {root}");
        debouncer.watch(root, RecursiveMode::Recursive)?;
    }

    let mut extra: BTreeSet<Utf8PathBuf> = BTreeSet::new();

    loop {
        let wanted = uncovered_dirs(&orchestrator.tracked(), &roots);

        for dir in extra.difference(&wanted) {
            tracing::debug!("no longer watching {dir}");
            debouncer.unwatch(dir).ok();
        }
        for dir in wanted.difference(&extra) {
            tracing::debug!("watching {dir}");
            if let Err(e) = debouncer.watch(dir, RecursiveMode::NonRecursive) {
                tracing::warn!("couldn't watch {dir}: {e}");
            }
        }
        extra = wanted;

        let events = match rx.recv_timeout(RESYNC) {
            Ok(events) => events,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Err(RecvError.into()),
        };

        match events {
            Ok(events) => {
                for event in events {
                    if matches!(event.event.kind, EventKind::Access(_)) {
                        continue;
                    }

                    for path in &event.event.paths {
                        match Utf8Path::from_path(path) {
                            Some(path) => {
                                orchestrator.dispatch(path);
                            }
                            None => tracing::warn!("ignoring non UTF-8 path {}", path.display()),
                        }
                    }
                }
            }
            Err(errors) => {
                for e in errors {
                    tracing::error!("watch error: {e:?}");
                }
            }
        }
    }
}
