//! Conversation index tables: metadata, messages, FTS, todo/plan files
//!
//! The indexer is the only writer here. Every write for one conversation
//! file happens inside a single transaction so readers never observe a
//! half-indexed file: upsert the metadata row, delete the old message and
//! FTS rows, insert the fresh set.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};
use serde::Serialize;

use super::requests::format_ts;
use super::Storage;
use crate::messages::Usage;

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

/// Conversation metadata derived from one JSONL file
#[derive(Debug, Clone)]
pub struct ConversationMeta {
    /// Session identifier from the first parseable message (or filename)
    pub id: String,
    pub project_path: String,
    pub project_name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub message_count: u64,
    pub file_path: String,
    pub file_mtime: Option<String>,
}

/// One parsed JSONL line
#[derive(Debug, Clone, Serialize)]
pub struct MessageRow {
    pub uuid: String,
    pub conversation_id: String,
    pub parent_uuid: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub role: Option<String>,
    pub timestamp: Option<String>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub is_sidechain: bool,
    pub request_id: Option<String>,
    pub model: Option<String>,
    #[serde(flatten)]
    pub usage: Usage,
    /// Raw line payload preserved verbatim for later re-parsing
    pub content_json: String,
}

/// Derived full-text row for one message (absent when the message has
/// neither text nor tool uses)
#[derive(Debug, Clone)]
pub struct FtsRow {
    pub conversation_id: String,
    pub message_uuid: String,
    pub message_type: String,
    pub content_text: String,
    /// Space-joined tool names from tool_use blocks
    pub tool_names: String,
    pub timestamp: Option<String>,
}

/// Listing/drill-down view of an indexed conversation
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub project_path: String,
    pub project_name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub message_count: u64,
    pub file_path: String,
    pub file_mtime: Option<String>,
    pub indexed_at: Option<String>,
}

/// One conversation-level search hit
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub conversation_id: String,
    pub project_path: String,
    pub project_name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub message_count: u64,
    pub match_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TodoFileRow {
    pub file_path: String,
    pub session_id: Option<String>,
    pub content_json: String,
    pub item_count: u64,
    pub file_mtime: Option<String>,
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanFileRow {
    pub file_path: String,
    pub title: Option<String>,
    pub content: String,
    pub file_mtime: Option<String>,
    pub indexed_at: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Indexer writes
// ─────────────────────────────────────────────────────────────────────────────

impl Storage {
    /// Atomically replace one conversation's row set: upsert metadata,
    /// delete old messages and FTS rows, insert the fresh set.
    pub fn replace_conversation(
        &self,
        meta: &ConversationMeta,
        messages: &[MessageRow],
        fts_rows: &[FtsRow],
    ) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().context("opening index transaction")?;

        tx.execute(
            r#"
            INSERT INTO conversations (
                id, project_path, project_name, start_time, end_time,
                message_count, file_path, file_mtime, indexed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                project_path = excluded.project_path,
                project_name = excluded.project_name,
                start_time = excluded.start_time,
                end_time = excluded.end_time,
                message_count = excluded.message_count,
                file_path = excluded.file_path,
                file_mtime = excluded.file_mtime,
                indexed_at = excluded.indexed_at
            "#,
            params![
                meta.id,
                meta.project_path,
                meta.project_name,
                meta.start_time,
                meta.end_time,
                meta.message_count,
                meta.file_path,
                meta.file_mtime,
                format_ts(&Utc::now()),
            ],
        )?;

        tx.execute(
            "DELETE FROM conversation_messages WHERE conversation_id = ?1",
            params![meta.id],
        )?;
        if self.fts_enabled() {
            delete_fts_rows(&tx, &meta.id)?;
        }

        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO conversation_messages (
                    uuid, conversation_id, parent_uuid, type, role, timestamp,
                    cwd, git_branch, session_id, agent_id, is_sidechain,
                    request_id, model, input_tokens, output_tokens,
                    cache_read_tokens, cache_creation_tokens, content_json
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                          ?13, ?14, ?15, ?16, ?17, ?18)
                ON CONFLICT(uuid) DO UPDATE SET
                    conversation_id = excluded.conversation_id,
                    content_json = excluded.content_json
                "#,
            )?;
            for msg in messages {
                insert.execute(params![
                    msg.uuid,
                    msg.conversation_id,
                    msg.parent_uuid,
                    msg.msg_type,
                    msg.role,
                    msg.timestamp,
                    msg.cwd,
                    msg.git_branch,
                    msg.session_id,
                    msg.agent_id,
                    msg.is_sidechain,
                    msg.request_id,
                    msg.model,
                    msg.usage.input_tokens,
                    msg.usage.output_tokens,
                    msg.usage.cache_read_input_tokens,
                    msg.usage.cache_creation_input_tokens,
                    msg.content_json,
                ])?;
            }
        }

        if self.fts_enabled() {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO conversations_fts (
                    content_text, tool_names, conversation_id,
                    message_uuid, message_type, timestamp
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )?;
            for row in fts_rows {
                insert.execute(params![
                    row.content_text,
                    row.tool_names,
                    row.conversation_id,
                    row.message_uuid,
                    row.message_type,
                    row.timestamp,
                ])?;
            }
        }

        tx.commit().context("committing index transaction")?;
        Ok(())
    }

    /// Remove a conversation (messages and FTS rows included) by file path.
    /// Used on file deletion; a missing row is not an error.
    pub fn delete_conversation_by_file_path(&self, file_path: &str) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM conversations WHERE file_path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = id {
            tx.execute(
                "DELETE FROM conversation_messages WHERE conversation_id = ?1",
                params![id],
            )?;
            if self.fts_enabled() {
                delete_fts_rows(&tx, &id)?;
            }
            tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
            tracing::debug!(conversation_id = %id, "Deleted conversation for removed file");
        }

        tx.commit()?;
        Ok(())
    }

    /// Re-index API: clear `indexed_at` so the next scan rebuilds everything
    pub fn mark_all_unindexed(&self) -> Result<u64> {
        let conn = self.conn()?;
        let changed = conn.execute("UPDATE conversations SET indexed_at = NULL", [])?;
        Ok(changed as u64)
    }

    /// `indexed_at` for a file, for the scan's freshness check.
    /// None when the row is absent or was marked for re-indexing.
    pub fn get_indexed_at(&self, file_path: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let indexed_at: Option<Option<String>> = conn
            .query_row(
                "SELECT indexed_at FROM conversations WHERE file_path = ?1",
                params![file_path],
                |row| row.get(0),
            )
            .optional()?;
        Ok(indexed_at.flatten())
    }
}

fn delete_fts_rows(tx: &Transaction<'_>, conversation_id: &str) -> rusqlite::Result<usize> {
    tx.execute(
        "DELETE FROM conversations_fts WHERE conversation_id = ?1",
        params![conversation_id],
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

const CONVERSATION_COLUMNS: &str = "id, project_path, project_name, start_time, end_time, \
     message_count, file_path, file_mtime, indexed_at";

fn conversation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationSummary> {
    Ok(ConversationSummary {
        id: row.get(0)?,
        project_path: row.get(1)?,
        project_name: row.get(2)?,
        start_time: row.get(3)?,
        end_time: row.get(4)?,
        message_count: row.get(5)?,
        file_path: row.get(6)?,
        file_mtime: row.get(7)?,
        indexed_at: row.get(8)?,
    })
}

impl Storage {
    /// Most recently active conversations first
    pub fn get_indexed_conversations(&self, limit: u64) -> Result<Vec<ConversationSummary>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM conversations ORDER BY file_mtime DESC LIMIT {}",
            CONVERSATION_COLUMNS, limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], conversation_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn get_conversation(&self, id: &str) -> Result<Option<ConversationSummary>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        );
        conn.query_row(&sql, params![id], conversation_from_row)
            .optional()
            .context("loading conversation")
    }

    pub fn get_conversation_file_path(&self, id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT file_path FROM conversations WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .context("loading conversation file path")
    }

    /// Messages of one conversation in timestamp order.
    /// Sidechain (subagent) messages are excluded unless requested.
    pub fn get_conversation_messages(
        &self,
        id: &str,
        limit: u64,
        offset: u64,
        include_subagents: bool,
    ) -> Result<Vec<MessageRow>> {
        let conn = self.conn()?;
        let sql = format!(
            r#"
            SELECT uuid, conversation_id, parent_uuid, type, role, timestamp,
                   cwd, git_branch, session_id, agent_id, is_sidechain,
                   request_id, model, input_tokens, output_tokens,
                   cache_read_tokens, cache_creation_tokens, content_json
            FROM conversation_messages
            WHERE conversation_id = ?1 {}
            ORDER BY timestamp, uuid
            LIMIT {} OFFSET {}
            "#,
            if include_subagents {
                ""
            } else {
                "AND is_sidechain = 0"
            },
            limit,
            offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(MessageRow {
                uuid: row.get(0)?,
                conversation_id: row.get(1)?,
                parent_uuid: row.get(2)?,
                msg_type: row.get(3)?,
                role: row.get(4)?,
                timestamp: row.get(5)?,
                cwd: row.get(6)?,
                git_branch: row.get(7)?,
                session_id: row.get(8)?,
                agent_id: row.get(9)?,
                is_sidechain: row.get(10)?,
                request_id: row.get(11)?,
                model: row.get(12)?,
                usage: Usage {
                    input_tokens: row.get(13)?,
                    output_tokens: row.get(14)?,
                    cache_read_input_tokens: row.get(15)?,
                    cache_creation_input_tokens: row.get(16)?,
                },
                content_json: row.get(17)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Full-text search grouped by conversation.
    ///
    /// The query is whitespace-tokenized; each token is quoted (embedded
    /// quotes doubled) and the tokens are OR-ed, so any matching token
    /// counts. Results order by (match_count DESC, end_time DESC). The total
    /// is the distinct-conversation count under the same WHERE clause.
    ///
    /// Without FTS capability this returns an empty result, not an error.
    pub fn search_conversations(
        &self,
        query: &str,
        project: Option<&str>,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<SearchResult>, u64)> {
        if !self.fts_enabled() {
            return Ok((Vec::new(), 0));
        }
        let Some(match_expr) = build_fts_query(query) else {
            return Ok((Vec::new(), 0));
        };

        let conn = self.conn()?;
        let project = project.map(str::to_string);

        let mut where_clause = String::from("conversations_fts MATCH ?1");
        let mut filter_params: Vec<&dyn rusqlite::ToSql> = vec![&match_expr];
        if let Some(project) = &project {
            where_clause.push_str(" AND c.project_path = ?2");
            filter_params.push(project);
        }

        let total: u64 = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT f.conversation_id)
                 FROM conversations_fts f
                 JOIN conversations c ON c.id = f.conversation_id
                 WHERE {}",
                where_clause
            ),
            filter_params.as_slice(),
            |row| row.get(0),
        )?;

        let sql = format!(
            r#"
            SELECT f.conversation_id, COUNT(*) AS match_count,
                   c.project_path, c.project_name, c.start_time, c.end_time,
                   c.message_count
            FROM conversations_fts f
            JOIN conversations c ON c.id = f.conversation_id
            WHERE {}
            GROUP BY f.conversation_id
            ORDER BY match_count DESC, c.end_time DESC
            LIMIT {} OFFSET {}
            "#,
            where_clause, limit, offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(filter_params.as_slice(), |row| {
            Ok(SearchResult {
                conversation_id: row.get(0)?,
                match_count: row.get(1)?,
                project_path: row.get(2)?,
                project_name: row.get(3)?,
                start_time: row.get(4)?,
                end_time: row.get(5)?,
                message_count: row.get(6)?,
            })
        })?;
        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok((results, total))
    }
}

/// Whitespace-tokenize, quote each token (doubling embedded quotes), join
/// with OR. None for an all-whitespace query.
fn build_fts_query(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Todo / plan session files
// ─────────────────────────────────────────────────────────────────────────────

impl Storage {
    pub fn upsert_todo_file(
        &self,
        file_path: &str,
        session_id: Option<&str>,
        content_json: &str,
        item_count: u64,
        file_mtime: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO todo_files (file_path, session_id, content_json, item_count, file_mtime, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(file_path) DO UPDATE SET
                session_id = excluded.session_id,
                content_json = excluded.content_json,
                item_count = excluded.item_count,
                file_mtime = excluded.file_mtime,
                indexed_at = excluded.indexed_at
            "#,
            params![
                file_path,
                session_id,
                content_json,
                item_count,
                file_mtime,
                format_ts(&Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn upsert_plan_file(
        &self,
        file_path: &str,
        title: Option<&str>,
        content: &str,
        file_mtime: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO plan_files (file_path, title, content, file_mtime, indexed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(file_path) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                file_mtime = excluded.file_mtime,
                indexed_at = excluded.indexed_at
            "#,
            params![file_path, title, content, file_mtime, format_ts(&Utc::now())],
        )?;
        Ok(())
    }

    pub fn list_todo_files(&self, limit: u64) -> Result<Vec<TodoFileRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT file_path, session_id, content_json, item_count, file_mtime, indexed_at
             FROM todo_files ORDER BY file_mtime DESC LIMIT {}",
            limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(TodoFileRow {
                file_path: row.get(0)?,
                session_id: row.get(1)?,
                content_json: row.get(2)?,
                item_count: row.get(3)?,
                file_mtime: row.get(4)?,
                indexed_at: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn list_plan_files(&self, limit: u64) -> Result<Vec<PlanFileRow>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT file_path, title, content, file_mtime, indexed_at
             FROM plan_files ORDER BY file_mtime DESC LIMIT {}",
            limit
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(PlanFileRow {
                file_path: row.get(0)?,
                title: row.get(1)?,
                content: row.get(2)?,
                file_mtime: row.get(3)?,
                indexed_at: row.get(4)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::open_temp;
    use super::*;

    fn meta(id: &str, file_path: &str, end_time: &str, count: u64) -> ConversationMeta {
        ConversationMeta {
            id: id.to_string(),
            project_path: "/home/user/proj".to_string(),
            project_name: "proj".to_string(),
            start_time: Some("2026-07-01T10:00:00.000Z".to_string()),
            end_time: Some(end_time.to_string()),
            message_count: count,
            file_path: file_path.to_string(),
            file_mtime: Some("2026-07-01T10:05:00.000Z".to_string()),
        }
    }

    fn message(uuid: &str, conversation_id: &str, sidechain: bool) -> MessageRow {
        MessageRow {
            uuid: uuid.to_string(),
            conversation_id: conversation_id.to_string(),
            parent_uuid: None,
            msg_type: "user".to_string(),
            role: Some("user".to_string()),
            timestamp: Some(format!("2026-07-01T10:00:0{}.000Z", uuid.len() % 10)),
            cwd: None,
            git_branch: None,
            session_id: Some(conversation_id.to_string()),
            agent_id: None,
            is_sidechain: sidechain,
            request_id: None,
            model: None,
            usage: Usage::default(),
            content_json: format!(r#"{{"uuid":"{}"}}"#, uuid),
        }
    }

    fn fts(conversation_id: &str, uuid: &str, text: &str) -> FtsRow {
        FtsRow {
            conversation_id: conversation_id.to_string(),
            message_uuid: uuid.to_string(),
            message_type: "user".to_string(),
            content_text: text.to_string(),
            tool_names: String::new(),
            timestamp: None,
        }
    }

    #[test]
    fn replace_conversation_roundtrip() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:10:00.000Z", 2);
        storage
            .replace_conversation(
                &m,
                &[message("a", "s1", false), message("b", "s1", false)],
                &[fts("s1", "a", "hello world")],
            )
            .unwrap();

        let conv = storage.get_conversation("s1").unwrap().unwrap();
        assert_eq!(conv.message_count, 2);
        assert!(conv.indexed_at.is_some());

        let messages = storage.get_conversation_messages("s1", 100, 0, true).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn reindex_unchanged_file_is_idempotent() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:10:00.000Z", 2);
        let msgs = [message("a", "s1", false), message("b", "s1", false)];
        let fts_rows = [fts("s1", "a", "hello")];

        storage.replace_conversation(&m, &msgs, &fts_rows).unwrap();
        let first: Vec<String> = storage
            .get_conversation_messages("s1", 100, 0, true)
            .unwrap()
            .iter()
            .map(|r| r.uuid.clone())
            .collect();

        storage.replace_conversation(&m, &msgs, &fts_rows).unwrap();
        let second: Vec<String> = storage
            .get_conversation_messages("s1", 100, 0, true)
            .unwrap()
            .iter()
            .map(|r| r.uuid.clone())
            .collect();

        assert_eq!(first, second);

        // FTS rows were rebuilt, not duplicated
        if storage.fts_enabled() {
            let (results, total) = storage.search_conversations("hello", None, 0, 10).unwrap();
            assert_eq!(total, 1);
            assert_eq!(results[0].match_count, 1);
        }
    }

    #[test]
    fn delete_by_file_path_leaves_no_orphans() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:10:00.000Z", 1);
        storage
            .replace_conversation(&m, &[message("a", "s1", false)], &[fts("s1", "a", "text")])
            .unwrap();

        storage
            .delete_conversation_by_file_path("/logs/s1.jsonl")
            .unwrap();

        assert!(storage.get_conversation("s1").unwrap().is_none());
        assert!(storage
            .get_conversation_messages("s1", 100, 0, true)
            .unwrap()
            .is_empty());
        if storage.fts_enabled() {
            let (_, total) = storage.search_conversations("text", None, 0, 10).unwrap();
            assert_eq!(total, 0);
        }

        // Deleting again is a no-op
        storage
            .delete_conversation_by_file_path("/logs/s1.jsonl")
            .unwrap();
    }

    #[test]
    fn sidechain_messages_filtered_by_default() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:10:00.000Z", 2);
        storage
            .replace_conversation(
                &m,
                &[message("main", "s1", false), message("side", "s1", true)],
                &[],
            )
            .unwrap();

        let without = storage
            .get_conversation_messages("s1", 100, 0, false)
            .unwrap();
        assert_eq!(without.len(), 1);
        assert_eq!(without[0].uuid, "main");

        let with = storage.get_conversation_messages("s1", 100, 0, true).unwrap();
        assert_eq!(with.len(), 2);
    }

    #[test]
    fn file_path_lookup() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:10:00.000Z", 0);
        storage.replace_conversation(&m, &[], &[]).unwrap();
        assert_eq!(
            storage.get_conversation_file_path("s1").unwrap().as_deref(),
            Some("/logs/s1.jsonl")
        );
        assert!(storage.get_conversation_file_path("nope").unwrap().is_none());
    }

    #[test]
    fn mark_all_unindexed_clears_indexed_at() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:10:00.000Z", 0);
        storage.replace_conversation(&m, &[], &[]).unwrap();
        assert!(storage.get_indexed_at("/logs/s1.jsonl").unwrap().is_some());

        storage.mark_all_unindexed().unwrap();
        assert!(storage.get_indexed_at("/logs/s1.jsonl").unwrap().is_none());
    }

    #[cfg(feature = "fts")]
    #[test]
    fn search_orders_by_match_count_then_recency() {
        let (_dir, storage) = open_temp();
        // A has two occurrences of "migrate", B has one
        let a = meta("a", "/logs/a.jsonl", "2026-07-01T09:00:00.000Z", 2);
        storage
            .replace_conversation(
                &a,
                &[message("a1", "a", false), message("a2", "a", false)],
                &[
                    fts("a", "a1", "let's migrate the database"),
                    fts("a", "a2", "migrate finished"),
                ],
            )
            .unwrap();
        let b = meta("b", "/logs/b.jsonl", "2026-07-02T09:00:00.000Z", 1);
        storage
            .replace_conversation(
                &b,
                &[message("b1", "b", false)],
                &[fts("b", "b1", "should we migrate?")],
            )
            .unwrap();

        let (results, total) = storage.search_conversations("migrate", None, 0, 10).unwrap();
        assert_eq!(total, 2);
        assert_eq!(results[0].conversation_id, "a");
        assert_eq!(results[0].match_count, 2);
        assert_eq!(results[1].conversation_id, "b");
    }

    #[cfg(feature = "fts")]
    #[test]
    fn search_empty_query_returns_empty_not_error() {
        let (_dir, storage) = open_temp();
        let (results, total) = storage.search_conversations("", None, 0, 10).unwrap();
        assert!(results.is_empty());
        assert_eq!(total, 0);

        let (results, total) = storage.search_conversations("   ", None, 0, 10).unwrap();
        assert!(results.is_empty());
        assert_eq!(total, 0);
    }

    #[cfg(feature = "fts")]
    #[test]
    fn search_unmatched_tokens_return_zero_rows() {
        let (_dir, storage) = open_temp();
        let m = meta("s1", "/logs/s1.jsonl", "2026-07-01T10:00:00.000Z", 1);
        storage
            .replace_conversation(&m, &[message("a", "s1", false)], &[fts("s1", "a", "hello")])
            .unwrap();
        let (results, total) = storage
            .search_conversations("zzzjabberwocky", None, 0, 10)
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(total, 0);
    }

    #[cfg(feature = "fts")]
    #[test]
    fn search_project_filter() {
        let (_dir, storage) = open_temp();
        let mut a = meta("a", "/logs/a.jsonl", "2026-07-01T09:00:00.000Z", 1);
        a.project_path = "/proj/one".to_string();
        storage
            .replace_conversation(&a, &[message("a1", "a", false)], &[fts("a", "a1", "token")])
            .unwrap();
        let mut b = meta("b", "/logs/b.jsonl", "2026-07-01T09:00:00.000Z", 1);
        b.project_path = "/proj/two".to_string();
        storage
            .replace_conversation(&b, &[message("b1", "b", false)], &[fts("b", "b1", "token")])
            .unwrap();

        let (results, total) = storage
            .search_conversations("token", Some("/proj/one"), 0, 10)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(results[0].conversation_id, "a");
    }

    #[test]
    fn fts_query_quoting() {
        assert_eq!(build_fts_query("hello world").unwrap(), "\"hello\" OR \"world\"");
        assert_eq!(build_fts_query("say \"hi\"").unwrap(), "\"say\" OR \"\"\"hi\"\"\"");
        assert!(build_fts_query("  ").is_none());
    }

    #[test]
    fn todo_and_plan_upsert_by_path() {
        let (_dir, storage) = open_temp();
        storage
            .upsert_todo_file("/todos/s1.json", Some("s1"), "[{\"content\":\"a\"}]", 1, None)
            .unwrap();
        storage
            .upsert_todo_file("/todos/s1.json", Some("s1"), "[{\"content\":\"a\"},{\"content\":\"b\"}]", 2, None)
            .unwrap();
        let todos = storage.list_todo_files(10).unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].item_count, 2);

        storage
            .upsert_plan_file("/plans/p1.md", Some("Plan"), "# Plan\nbody", None)
            .unwrap();
        let plans = storage.list_plan_files(10).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].title.as_deref(), Some("Plan"));
    }
}
