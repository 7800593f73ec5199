//! Filesystem watching and write debouncing
//!
//! Session files are appended many times per second while an assistant is
//! active; re-indexing on every event would thrash the database. WRITE and
//! CREATE events instead arm a per-path deadline that is pushed back on
//! every new event; the worker sweeps expired deadlines and runs one index
//! pass per settled file. REMOVE events delete the conversation
//! synchronously, on the watcher's own thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::storage::Storage;

/// Per-path debounce deadlines, re-armed on every event.
///
/// The map is the only state shared between the watcher callback and the
/// worker; both hold the lock for microseconds.
pub(super) struct DebounceMap {
    deadlines: Mutex<HashMap<PathBuf, Instant>>,
    delay: Duration,
}

impl DebounceMap {
    pub fn new(delay: Duration) -> Self {
        Self {
            deadlines: Mutex::new(HashMap::new()),
            delay,
        }
    }

    /// Arm (or re-arm) the deadline for a path
    pub fn arm(&self, path: PathBuf) {
        let mut map = self.deadlines.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(path, Instant::now() + self.delay);
    }

    /// Drop a pending deadline (the file was removed)
    pub fn cancel(&self, path: &Path) {
        let mut map = self.deadlines.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(path);
    }

    /// Take every path whose deadline has passed
    pub fn take_expired(&self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut map = self.deadlines.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<PathBuf> = map
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &expired {
            map.remove(path);
        }
        expired
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.deadlines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

fn is_session_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "jsonl")
}

/// Start the notify watcher over the session tree.
///
/// The returned watcher must be kept alive for the callbacks to fire.
pub(super) fn start_watcher(
    root: &Path,
    debounce: Arc<DebounceMap>,
    storage: Arc<Storage>,
) -> Result<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        let event = match res {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Watch error: {}", e);
                return;
            }
        };
        handle_event(&event, &debounce, &storage);
    })
    .context("creating file watcher")?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("watching {}", root.display()))?;
    tracing::info!(root = %root.display(), "Watching conversation tree");

    Ok(watcher)
}

fn handle_event(event: &Event, debounce: &DebounceMap, storage: &Storage) {
    match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) => {
            for path in &event.paths {
                if is_session_file(path) {
                    debounce.arm(path.clone());
                }
            }
        }
        EventKind::Remove(_) => {
            for path in &event.paths {
                if !is_session_file(path) {
                    continue;
                }
                debounce.cancel(path);
                // Deletion is synchronous; there is nothing to coalesce
                if let Err(e) =
                    storage.delete_conversation_by_file_path(&path.to_string_lossy())
                {
                    tracing::warn!("Failed to delete conversation for {}: {}", path.display(), e);
                }
            }
        }
        _ => {}
    }
}
