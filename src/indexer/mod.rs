//! Conversation indexer
//!
//! Keeps the conversation tables in sync with a filesystem tree of
//! append-only JSONL session files:
//!
//! ```text
//! initial scan (walkdir) ──────────────┐
//!                                      ▼
//! notify watcher ──► DebounceMap ──► bounded channel ──► worker thread ──► Storage
//!        │               ▲  (sweeper enqueues settled paths)
//!        └─ REMOVE ──────┴──► synchronous delete
//! ```
//!
//! Three long-lived pieces cooperate: the initial scan, the watcher feeding
//! per-path debounce deadlines, and a single worker thread that drains the
//! bounded queue and performs every index write. SQLite work stays off the
//! async runtime entirely.

mod parser;
mod scan;
mod watcher;

pub use parser::parse_conversation_file;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use notify::RecommendedWatcher;

use crate::config::IndexerConfig;
use crate::storage::Storage;
use watcher::DebounceMap;

/// Bounded queue between the debounce sweeper and the worker
const WORKER_QUEUE: usize = 1024;

/// How often the sweeper checks for settled files
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Counters exposed through the health endpoint
#[derive(Debug, Default)]
pub struct IndexerStats {
    files_indexed: AtomicU64,
    errors: AtomicU64,
}

impl IndexerStats {
    pub(crate) fn record_indexed(&self) {
        self.files_indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_indexed(&self) -> u64 {
        self.files_indexed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

enum WorkerCommand {
    /// Re-index one settled file
    Index(PathBuf),
    /// Full scan pass (startup and the re-index API)
    Rescan,
    Shutdown,
}

struct IndexerInner {
    tx: Option<SyncSender<WorkerCommand>>,
    stats: Arc<IndexerStats>,
    stop: Arc<AtomicBool>,
    /// Kept alive for its callbacks; None when the root didn't exist at startup
    _watcher: Mutex<Option<RecommendedWatcher>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to the running indexer, shared with the HTTP API
#[derive(Clone)]
pub struct IndexerHandle {
    inner: Arc<IndexerInner>,
}

impl IndexerHandle {
    /// Placeholder handle when the indexer is disabled in config
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(IndexerInner {
                tx: None,
                stats: Arc::new(IndexerStats::default()),
                stop: Arc::new(AtomicBool::new(true)),
                _watcher: Mutex::new(None),
                worker: Mutex::new(None),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.tx.is_some()
    }

    /// Health-endpoint status string
    pub fn status(&self) -> &'static str {
        if self.is_enabled() {
            "ok"
        } else {
            "disabled"
        }
    }

    /// Queue a full rescan (used by the re-index API after clearing
    /// `indexed_at`). Returns false when the indexer is disabled.
    pub fn trigger_rescan(&self) -> bool {
        match &self.inner.tx {
            Some(tx) => match tx.try_send(WorkerCommand::Rescan) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    // A queue this deep already has a scan's worth of work
                    tracing::warn!("Indexer queue full, rescan dropped");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            },
            None => false,
        }
    }

    /// Stop the worker and sweeper, joining both
    pub fn shutdown(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
        if let Some(tx) = &self.inner.tx {
            // Blocking send: the worker drains the queue ahead of it
            let _ = tx.send(WorkerCommand::Shutdown);
        }
        if let Some(handle) = self.inner.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.inner.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
        if self.is_enabled() {
            tracing::info!(
                files_indexed = self.inner.stats.files_indexed(),
                errors = self.inner.stats.errors(),
                "Indexer stopped"
            );
        }
    }
}

/// Start the indexer: initial scan, watcher, debounce sweeper, worker
pub fn start(config: &IndexerConfig, storage: Arc<Storage>) -> IndexerHandle {
    if !config.enabled {
        tracing::info!("Conversation indexer disabled in config");
        return IndexerHandle::disabled();
    }

    let root = config.watch_root.clone();
    let stats = Arc::new(IndexerStats::default());
    let stop = Arc::new(AtomicBool::new(false));
    let debounce = Arc::new(DebounceMap::new(Duration::from_secs(
        config.debounce_secs.max(1),
    )));
    let (tx, rx) = sync_channel::<WorkerCommand>(WORKER_QUEUE);

    // Worker: single thread performing every index write
    let worker = {
        let storage = storage.clone();
        let root = root.clone();
        let stats = stats.clone();
        let todos_dir = config.todos_dir.clone();
        let plans_dir = config.plans_dir.clone();
        std::thread::Builder::new()
            .name("indexer-worker".into())
            .spawn(move || {
                worker_loop(rx, &root, &storage, &stats, todos_dir, plans_dir);
            })
            .expect("spawning indexer worker")
    };

    // Sweeper: moves settled debounce entries onto the worker queue
    let sweeper = {
        let debounce = debounce.clone();
        let tx = tx.clone();
        let stop = stop.clone();
        std::thread::Builder::new()
            .name("indexer-sweeper".into())
            .spawn(move || {
                sweeper_loop(&debounce, &tx, &stop);
            })
            .expect("spawning indexer sweeper")
    };

    // Watcher: arms debounce deadlines, deletes removed files synchronously
    let watcher_handle = match watcher::start_watcher(&root, debounce, storage.clone()) {
        Ok(w) => Some(w),
        Err(e) => {
            tracing::warn!(
                "File watching unavailable ({}); relying on scans only",
                e
            );
            None
        }
    };

    // Initial scan runs on its own thread so startup isn't blocked
    {
        let tx = tx.clone();
        std::thread::Builder::new()
            .name("indexer-scan".into())
            .spawn(move || {
                let _ = tx.send(WorkerCommand::Rescan);
            })
            .expect("spawning initial scan");
    }

    IndexerHandle {
        inner: Arc::new(IndexerInner {
            tx: Some(tx),
            stats,
            stop,
            _watcher: Mutex::new(watcher_handle),
            worker: Mutex::new(Some(worker)),
            sweeper: Mutex::new(Some(sweeper)),
        }),
    }
}

fn worker_loop(
    rx: Receiver<WorkerCommand>,
    root: &std::path::Path,
    storage: &Storage,
    stats: &IndexerStats,
    todos_dir: Option<PathBuf>,
    plans_dir: Option<PathBuf>,
) {
    while let Ok(command) = rx.recv() {
        match command {
            WorkerCommand::Index(path) => {
                scan::index_file(&path, root, storage, stats);
            }
            WorkerCommand::Rescan => {
                scan::scan_conversations(root, storage, stats);
                if let Some(dir) = &todos_dir {
                    scan::scan_todos(dir, storage);
                }
                if let Some(dir) = &plans_dir {
                    scan::scan_plans(dir, storage);
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!("Indexer worker stopped");
}

fn sweeper_loop(debounce: &DebounceMap, tx: &SyncSender<WorkerCommand>, stop: &AtomicBool) {
    loop {
        std::thread::sleep(SWEEP_INTERVAL);
        if stop.load(Ordering::SeqCst) {
            return;
        }
        for path in debounce.take_expired() {
            match tx.try_send(WorkerCommand::Index(path.clone())) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // Queue saturated: re-arm so the file is retried later
                    tracing::warn!("Indexer queue full, deferring {}", path.display());
                    debounce.arm(path);
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}
