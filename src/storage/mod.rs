//! SQLite storage for the request log and conversation index
//!
//! A single database file holds everything: captured requests with their
//! responses, indexed conversations with per-message rows, the full-text
//! index, and the todo/plan session tables. The store is the serialization
//! point for the whole system; the pipeline and the indexer are disjoint
//! writers and readers run in parallel under WAL.
//!
//! # Concurrency
//!
//! Every pooled connection is opened with WAL mode and a 5 s busy timeout.
//! Multi-statement updates (the indexer's per-file rebuild) run inside a
//! transaction on one connection; everything else is single statements.
//!
//! # FTS capability
//!
//! Full-text search needs the FTS5 extension. The `fts` cargo feature gates
//! compilation, and at startup the virtual table creation doubles as a
//! runtime probe: when it fails, the store records the capability as absent,
//! the indexer skips FTS maintenance, and searches return empty results
//! rather than erroring.

mod conversations;
mod requests;
mod schema;

pub use conversations::{
    ConversationMeta, ConversationSummary, FtsRow, MessageRow, PlanFileRow, SearchResult,
    TodoFileRow,
};
pub use requests::{
    DailyBucket, HourlyBucket, ModelStats, OverviewStats, PerformanceStats, ProviderStats,
    RequestRecord, RequestSummary, ResponseRecord, ResponseUpdate, SubagentStats, TimeWindow,
    ToolStats,
};

use std::path::Path;

use anyhow::{Context, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Maximum pooled connections. Readers dominate; the two writers (pipeline,
/// indexer worker) rarely hold a connection for long.
const POOL_SIZE: u32 = 8;

pub struct Storage {
    pool: Pool<SqliteConnectionManager>,
    fts_enabled: bool,
}

impl Storage {
    /// Open (or create) the database and run migrations.
    ///
    /// Fails when the file cannot be opened or the schema cannot be created;
    /// callers treat that as fatal at startup.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {}", parent.display()))?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                PRAGMA busy_timeout=5000;
                PRAGMA cache_size=-64000;  -- 64MB cache
                "#,
            )
        });

        let pool = Pool::builder()
            .max_size(POOL_SIZE)
            .build(manager)
            .with_context(|| format!("opening database {}", path.display()))?;

        let conn = pool.get().context("checking out initial connection")?;
        schema::init(&conn).context("initializing schema")?;

        let fts_enabled = if cfg!(feature = "fts") {
            match schema::init_fts(&conn) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(
                        "FTS5 unavailable, conversation search disabled: {}",
                        e
                    );
                    false
                }
            }
        } else {
            false
        };

        tracing::info!(
            path = %path.display(),
            fts = fts_enabled,
            "Storage opened"
        );

        Ok(Self { pool, fts_enabled })
    }

    /// Whether the full-text index is available in this build/database
    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    pub(crate) fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().context("checking out connection")
    }

    /// Liveness probe for the health endpoint
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .context("pinging database")?;
        Ok(())
    }
}
