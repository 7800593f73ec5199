//! Schema creation and idempotent migrations
//!
//! Startup always runs the full sequence: create the request table if
//! absent, apply column additions for databases created by older builds
//! (failures on already-present columns are swallowed), then create the
//! conversation, message, todo, and plan tables. The FTS virtual table is
//! created separately so its failure can downgrade the capability instead of
//! aborting startup.

use anyhow::Result;
use rusqlite::Connection;

pub(super) fn init(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS requests (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            method TEXT NOT NULL,
            endpoint TEXT NOT NULL,
            headers_json TEXT,
            body_json TEXT,
            model TEXT NOT NULL DEFAULT '',
            original_model TEXT NOT NULL DEFAULT '',
            provider TEXT NOT NULL DEFAULT '',
            tools_used TEXT NOT NULL DEFAULT '[]',
            tool_call_count INTEGER NOT NULL DEFAULT 0,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            response_time_ms INTEGER NOT NULL DEFAULT 0,
            status INTEGER,
            response_json TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_requests_timestamp ON requests(timestamp DESC);
        CREATE INDEX IF NOT EXISTS idx_requests_model ON requests(model);
        CREATE INDEX IF NOT EXISTS idx_requests_provider ON requests(provider);
        CREATE INDEX IF NOT EXISTS idx_requests_ts_provider ON requests(timestamp DESC, provider);
        "#,
    )?;

    // Columns added after the first release; older databases gain them here
    add_column_if_missing(conn, "requests", "routed_model", "TEXT");
    add_column_if_missing(conn, "requests", "subagent_name", "TEXT");
    add_column_if_missing(conn, "requests", "first_byte_time_ms", "INTEGER NOT NULL DEFAULT 0");
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_requests_subagent ON requests(subagent_name);",
    )?;

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            project_path TEXT NOT NULL DEFAULT '',
            project_name TEXT NOT NULL DEFAULT '',
            start_time TEXT,
            end_time TEXT,
            message_count INTEGER NOT NULL DEFAULT 0,
            file_path TEXT NOT NULL UNIQUE,
            file_mtime TEXT,
            indexed_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_project ON conversations(project_path);
        CREATE INDEX IF NOT EXISTS idx_conversations_mtime ON conversations(file_mtime DESC);
        CREATE INDEX IF NOT EXISTS idx_conversations_indexed ON conversations(indexed_at DESC);

        CREATE TABLE IF NOT EXISTS conversation_messages (
            uuid TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            parent_uuid TEXT,
            type TEXT NOT NULL DEFAULT '',
            role TEXT,
            timestamp TEXT,
            cwd TEXT,
            git_branch TEXT,
            session_id TEXT,
            agent_id TEXT,
            is_sidechain INTEGER NOT NULL DEFAULT 0,
            request_id TEXT,
            model TEXT,
            input_tokens INTEGER NOT NULL DEFAULT 0,
            output_tokens INTEGER NOT NULL DEFAULT 0,
            cache_read_tokens INTEGER NOT NULL DEFAULT 0,
            cache_creation_tokens INTEGER NOT NULL DEFAULT 0,
            content_json TEXT NOT NULL DEFAULT ''
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conversation ON conversation_messages(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_messages_parent ON conversation_messages(parent_uuid);
        CREATE INDEX IF NOT EXISTS idx_messages_session ON conversation_messages(session_id);
        CREATE INDEX IF NOT EXISTS idx_messages_agent ON conversation_messages(agent_id);
        CREATE INDEX IF NOT EXISTS idx_messages_request ON conversation_messages(request_id);

        CREATE TABLE IF NOT EXISTS todo_files (
            file_path TEXT PRIMARY KEY,
            session_id TEXT,
            content_json TEXT NOT NULL DEFAULT '[]',
            item_count INTEGER NOT NULL DEFAULT 0,
            file_mtime TEXT,
            indexed_at TEXT
        );

        CREATE TABLE IF NOT EXISTS plan_files (
            file_path TEXT PRIMARY KEY,
            title TEXT,
            content TEXT NOT NULL DEFAULT '',
            file_mtime TEXT,
            indexed_at TEXT
        );
        "#,
    )?;

    Ok(())
}

/// Create the conversation full-text index. Errors here mean the SQLite
/// build lacks FTS5; the caller downgrades the capability.
pub(super) fn init_fts(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS conversations_fts USING fts5(
            content_text,
            tool_names,
            conversation_id UNINDEXED,
            message_uuid UNINDEXED,
            message_type UNINDEXED,
            timestamp UNINDEXED,
            tokenize='porter unicode61'
        );
        "#,
    )?;
    Ok(())
}

/// Add a column when it doesn't exist yet. A failure on an already-present
/// column (racing process, pre-check miss) is swallowed.
fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) {
    let present: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2",
            rusqlite::params![table, column],
            |row| row.get(0),
        )
        .unwrap_or(false);
    if present {
        return;
    }
    let sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl);
    if let Err(e) = conn.execute(&sql, []) {
        tracing::debug!("Ignoring column addition failure for {}.{}: {}", table, column, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap();
    }

    #[test]
    fn add_column_if_missing_swallows_duplicates() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (a TEXT)").unwrap();
        add_column_if_missing(&conn, "t", "b", "TEXT");
        add_column_if_missing(&conn, "t", "b", "TEXT");
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('t') WHERE name = 'b'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[cfg(feature = "fts")]
    #[test]
    fn fts_table_creates() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init_fts(&conn).unwrap();
        conn.execute(
            "INSERT INTO conversations_fts (content_text, tool_names, conversation_id, message_uuid, message_type, timestamp)
             VALUES ('hello world', '', 'c1', 'm1', 'user', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversations_fts WHERE conversations_fts MATCH '\"hello\"'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);
    }
}
