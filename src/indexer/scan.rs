//! Initial scan of the watched tree (plus todo/plan directories)
//!
//! Walks every `.jsonl` file under the root and re-indexes the ones whose
//! modification time is newer than their `indexed_at` (or that have no row
//! at all). Per-file errors are logged and the scan continues; a single bad
//! file never aborts the pass.

use std::path::Path;

use walkdir::WalkDir;

use super::parser::{format_system_time, parse_conversation_file};
use super::IndexerStats;
use crate::storage::Storage;

/// One full pass over the conversation tree. Returns how many files were
/// (re-)indexed.
pub(super) fn scan_conversations(root: &Path, storage: &Storage, stats: &IndexerStats) -> u64 {
    if !root.exists() {
        tracing::debug!(root = %root.display(), "Watch root does not exist yet, skipping scan");
        return 0;
    }

    let mut indexed = 0u64;
    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "jsonl") {
            continue;
        }

        match needs_index(path, storage) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                tracing::warn!("{}: freshness check failed: {}", path.display(), e);
                stats.record_error();
                continue;
            }
        }

        if index_file(path, root, storage, stats) {
            indexed += 1;
        }
    }

    if indexed > 0 {
        tracing::info!(files = indexed, "Conversation scan complete");
    }
    indexed
}

/// Re-index iff the file changed since it was last indexed (or was never
/// indexed, or was marked for re-indexing)
fn needs_index(path: &Path, storage: &Storage) -> anyhow::Result<bool> {
    let Some(indexed_at) = storage.get_indexed_at(&path.to_string_lossy())? else {
        return Ok(true);
    };
    let mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(format_system_time)?;
    Ok(mtime > indexed_at)
}

/// Parse and store one file. Errors are logged, not propagated.
pub(super) fn index_file(
    path: &Path,
    root: &Path,
    storage: &Storage,
    stats: &IndexerStats,
) -> bool {
    if !path.exists() {
        // Raced with a delete; the watcher handles the removal
        return false;
    }
    match parse_conversation_file(path, root) {
        Ok(parsed) => {
            let mut result =
                storage.replace_conversation(&parsed.meta, &parsed.messages, &parsed.fts_rows);
            if let Err(e) = &result {
                // One retry covers transient busy errors; a second failure
                // is a real problem
                tracing::debug!("{}: index write failed, retrying: {}", path.display(), e);
                std::thread::sleep(std::time::Duration::from_millis(100));
                result =
                    storage.replace_conversation(&parsed.meta, &parsed.messages, &parsed.fts_rows);
            }
            match result {
                Ok(()) => {
                    tracing::debug!(
                        file = %path.display(),
                        messages = parsed.messages.len(),
                        "Indexed conversation"
                    );
                    stats.record_indexed();
                    true
                }
                Err(e) => {
                    tracing::warn!("{}: index write failed: {}", path.display(), e);
                    stats.record_error();
                    false
                }
            }
        }
        Err(e) => {
            tracing::warn!("{}: parse failed: {}", path.display(), e);
            stats.record_error();
            false
        }
    }
}

/// Scan-only ingestion of todo JSON files (`<session-id>.json`, each an
/// array of todo items)
pub(super) fn scan_todos(dir: &Path, storage: &Storage) {
    if !dir.exists() {
        return;
    }
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("{}: unreadable todo file: {}", path.display(), e);
                continue;
            }
        };
        let item_count = serde_json::from_str::<Vec<serde_json::Value>>(&content)
            .map(|items| items.len() as u64)
            .unwrap_or(0);
        let session_id = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(format_system_time);
        if let Err(e) = storage.upsert_todo_file(
            &path.to_string_lossy(),
            session_id.as_deref(),
            &content,
            item_count,
            mtime.as_deref(),
        ) {
            tracing::warn!("{}: todo upsert failed: {}", path.display(), e);
        }
    }
}

/// Scan-only ingestion of plan markdown files; the title is the first
/// heading line when present
pub(super) fn scan_plans(dir: &Path, storage: &Storage) {
    if !dir.exists() {
        return;
    }
    for entry in WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "md") {
            continue;
        }
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("{}: unreadable plan file: {}", path.display(), e);
                continue;
            }
        };
        let title = content
            .lines()
            .find(|line| line.starts_with('#'))
            .map(|line| line.trim_start_matches('#').trim().to_string());
        let mtime = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .map(format_system_time);
        if let Err(e) = storage.upsert_plan_file(
            &path.to_string_lossy(),
            title.as_deref(),
            &content,
            mtime.as_deref(),
        ) {
            tracing::warn!("{}: plan upsert failed: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::open_temp;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &Path, rel: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", contents).unwrap();
        path
    }

    fn session_line(uuid: &str, session: &str, text: &str) -> String {
        format!(
            r#"{{"uuid":"{}","sessionId":"{}","type":"user","timestamp":"2026-07-01T10:00:00.000Z","message":{{"role":"user","content":"{}"}}}}"#,
            uuid, session, text
        )
    }

    #[test]
    fn scan_indexes_new_files_and_skips_fresh_ones() {
        let root = TempDir::new().unwrap();
        let (_db, storage) = open_temp();
        let stats = IndexerStats::default();

        write_file(
            root.path(),
            "-p/s1.jsonl",
            &format!("{}\n", session_line("u1", "s1", "hello")),
        );
        write_file(
            root.path(),
            "-p/s2.jsonl",
            &format!("{}\n", session_line("u2", "s2", "world")),
        );
        write_file(root.path(), "-p/notes.txt", "not a session");

        assert_eq!(scan_conversations(root.path(), &storage, &stats), 2);
        assert_eq!(storage.get_indexed_conversations(10).unwrap().len(), 2);

        // Nothing changed: second scan indexes nothing
        assert_eq!(scan_conversations(root.path(), &storage, &stats), 0);
    }

    #[test]
    fn scan_survives_a_bad_file() {
        let root = TempDir::new().unwrap();
        let (_db, storage) = open_temp();
        let stats = IndexerStats::default();

        // A directory named like a session file trips the parser open, and
        // a good file alongside it must still index
        write_file(root.path(), "-p/bad.jsonl/placeholder.txt", "x");
        write_file(
            root.path(),
            "-p/good.jsonl",
            &format!("{}\n", session_line("u1", "good", "fine")),
        );

        let indexed = scan_conversations(root.path(), &storage, &stats);
        assert_eq!(indexed, 1);
        assert!(storage.get_conversation("good").unwrap().is_some());
    }

    #[test]
    fn rescan_after_mark_all_unindexed() {
        let root = TempDir::new().unwrap();
        let (_db, storage) = open_temp();
        let stats = IndexerStats::default();

        write_file(
            root.path(),
            "-p/s1.jsonl",
            &format!("{}\n", session_line("u1", "s1", "hello")),
        );
        assert_eq!(scan_conversations(root.path(), &storage, &stats), 1);
        assert_eq!(scan_conversations(root.path(), &storage, &stats), 0);

        storage.mark_all_unindexed().unwrap();
        assert_eq!(scan_conversations(root.path(), &storage, &stats), 1);
    }

    #[test]
    fn todo_and_plan_scan() {
        let dir = TempDir::new().unwrap();
        let (_db, storage) = open_temp();

        write_file(
            dir.path(),
            "todos/s1.json",
            r#"[{"content":"fix bug","status":"pending"},{"content":"run tests","status":"completed"}]"#,
        );
        write_file(dir.path(), "todos/not-a-todo.txt", "skip me");
        scan_todos(&dir.path().join("todos"), &storage);

        let todos = storage.list_todo_files(10).unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0].item_count, 2);
        assert_eq!(todos[0].session_id.as_deref(), Some("s1"));

        write_file(dir.path(), "plans/plan1.md", "# Ship it\n\nsteps...");
        scan_plans(&dir.path().join("plans"), &storage);
        let plans = storage.list_plan_files(10).unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].title.as_deref(), Some("Ship it"));
    }
}
