//! JSONL conversation file parsing
//!
//! Each line of a session file is one JSON object. Lines without a `uuid`
//! are metadata snapshots and are skipped; lines that fail to parse are
//! skipped individually so one bad line never loses the rest of the file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::messages::Usage;
use crate::storage::{ConversationMeta, FtsRow, MessageRow};
use crate::util::decode_project_dir;

/// Everything the indexer writes for one file
#[derive(Debug)]
pub struct ParsedFile {
    pub meta: ConversationMeta,
    pub messages: Vec<MessageRow>,
    pub fts_rows: Vec<FtsRow>,
}

/// One raw JSONL line (camelCase on the wire)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLine {
    uuid: Option<String>,
    parent_uuid: Option<String>,
    #[serde(rename = "type")]
    line_type: Option<String>,
    timestamp: Option<String>,
    session_id: Option<String>,
    agent_id: Option<String>,
    cwd: Option<String>,
    git_branch: Option<String>,
    #[serde(default)]
    is_sidechain: bool,
    request_id: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    role: Option<String>,
    model: Option<String>,
    usage: Option<RawUsage>,
    content: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

impl From<RawUsage> for Usage {
    fn from(u: RawUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_input_tokens: u.cache_read_input_tokens,
            cache_creation_input_tokens: u.cache_creation_input_tokens,
        }
    }
}

/// Format a filesystem timestamp the way stored rows are formatted
pub(super) fn format_system_time(time: std::time::SystemTime) -> String {
    DateTime::<Utc>::from(time).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse one session file into its row set.
///
/// `watch_root` locates the dash-encoded project directory: the first path
/// component under the root (subagent subfolders nest deeper).
pub fn parse_conversation_file(path: &Path, watch_root: &Path) -> Result<ParsedFile> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let file_stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let encoded_project = path
        .strip_prefix(watch_root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .or_else(|| {
            path.parent()
                .and_then(|p| p.file_name())
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_default();
    let (project_path, project_name) = decode_project_dir(&encoded_project);

    let mut conversation_id: Option<String> = None;
    let mut start_time: Option<String> = None;
    let mut end_time: Option<String> = None;
    let mut messages: Vec<MessageRow> = Vec::new();
    let mut fts_rows: Vec<FtsRow> = Vec::new();
    let mut skipped = 0usize;

    for (line_no, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!("{}:{}: unreadable line: {}", path.display(), line_no + 1, e);
                skipped += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let raw: RawLine = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("{}:{}: unparseable line: {}", path.display(), line_no + 1, e);
                skipped += 1;
                continue;
            }
        };

        // Metadata snapshots carry no uuid; they are not messages
        let Some(uuid) = raw.uuid.clone() else {
            continue;
        };

        if conversation_id.is_none() {
            conversation_id = raw.session_id.clone().or_else(|| Some(file_stem.clone()));
        }
        if start_time.is_none() {
            start_time = raw.timestamp.clone();
        }
        if let Some(ts) = &raw.timestamp {
            if end_time.as_deref().map(|cur| ts.as_str() > cur).unwrap_or(true) {
                end_time = Some(ts.clone());
            }
        }

        let conv_id = conversation_id.clone().unwrap_or_else(|| file_stem.clone());

        if let Some(fts) = extract_fts(&raw, &conv_id, &uuid) {
            fts_rows.push(fts);
        }

        let message = raw.message;
        messages.push(MessageRow {
            uuid,
            conversation_id: conv_id,
            parent_uuid: raw.parent_uuid,
            msg_type: raw.line_type.unwrap_or_default(),
            role: message.as_ref().and_then(|m| m.role.clone()),
            timestamp: raw.timestamp,
            cwd: raw.cwd,
            git_branch: raw.git_branch,
            session_id: raw.session_id,
            agent_id: raw.agent_id,
            is_sidechain: raw.is_sidechain,
            request_id: raw.request_id,
            model: message.as_ref().and_then(|m| m.model.clone()),
            usage: message
                .and_then(|m| m.usage)
                .map(Usage::from)
                .unwrap_or_default(),
            content_json: line,
        });
    }

    if skipped > 0 {
        tracing::debug!("{}: skipped {} unparseable line(s)", path.display(), skipped);
    }

    let file_mtime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(format_system_time);

    let id = conversation_id.unwrap_or(file_stem);
    Ok(ParsedFile {
        meta: ConversationMeta {
            id,
            project_path,
            project_name,
            start_time,
            end_time,
            message_count: messages.len() as u64,
            file_path: path.to_string_lossy().into_owned(),
            file_mtime,
        },
        messages,
        fts_rows,
    })
}

/// Extract the FTS row for a message: text from text blocks plus a
/// space-joined list of tool names from tool_use blocks. Messages with
/// neither get no row.
fn extract_fts(raw: &RawLine, conversation_id: &str, uuid: &str) -> Option<FtsRow> {
    let content = raw.message.as_ref()?.content.as_ref()?;

    let mut texts: Vec<String> = Vec::new();
    let mut tool_names: Vec<String> = Vec::new();

    match content {
        serde_json::Value::String(text) => {
            if !text.is_empty() {
                texts.push(text.clone());
            }
        }
        serde_json::Value::Array(blocks) => {
            for block in blocks {
                match block.get("type").and_then(|t| t.as_str()) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                texts.push(text.to_string());
                            }
                        }
                    }
                    Some("tool_use") => {
                        if let Some(name) = block.get("name").and_then(|n| n.as_str()) {
                            tool_names.push(name.to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
        _ => {}
    }

    if texts.is_empty() && tool_names.is_empty() {
        return None;
    }

    Some(FtsRow {
        conversation_id: conversation_id.to_string(),
        message_uuid: uuid.to_string(),
        message_type: raw.line_type.clone().unwrap_or_default(),
        content_text: texts.join("\n"),
        tool_names: tool_names.join(" "),
        timestamp: raw.timestamp.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_session(dir: &Path, project: &str, name: &str, lines: &[&str]) -> std::path::PathBuf {
        let project_dir = dir.join(project);
        std::fs::create_dir_all(&project_dir).unwrap();
        let path = project_dir.join(name);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn parses_messages_and_metadata() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            dir.path(),
            "-home-user-proj",
            "s1.jsonl",
            &[
                r#"{"uuid":"u1","sessionId":"s1","type":"user","timestamp":"2026-07-01T10:00:00.000Z","cwd":"/home/user/proj","message":{"role":"user","content":"find the bug"}}"#,
                r#"{"uuid":"u2","parentUuid":"u1","sessionId":"s1","type":"assistant","timestamp":"2026-07-01T10:00:05.000Z","requestId":"req_1","message":{"role":"assistant","model":"claude-3-opus","usage":{"input_tokens":10,"output_tokens":4},"content":[{"type":"text","text":"looking"},{"type":"tool_use","id":"t1","name":"Grep","input":{}}]}}"#,
            ],
        );

        let parsed = parse_conversation_file(&path, dir.path()).unwrap();
        assert_eq!(parsed.meta.id, "s1");
        assert_eq!(parsed.meta.project_path, "/home/user/proj");
        assert_eq!(parsed.meta.project_name, "proj");
        assert_eq!(parsed.meta.message_count, 2);
        assert_eq!(
            parsed.meta.start_time.as_deref(),
            Some("2026-07-01T10:00:00.000Z")
        );
        assert_eq!(
            parsed.meta.end_time.as_deref(),
            Some("2026-07-01T10:00:05.000Z")
        );

        assert_eq!(parsed.messages[1].parent_uuid.as_deref(), Some("u1"));
        assert_eq!(parsed.messages[1].model.as_deref(), Some("claude-3-opus"));
        assert_eq!(parsed.messages[1].usage.input_tokens, 10);
        assert_eq!(parsed.messages[1].request_id.as_deref(), Some("req_1"));

        assert_eq!(parsed.fts_rows.len(), 2);
        assert_eq!(parsed.fts_rows[0].content_text, "find the bug");
        assert_eq!(parsed.fts_rows[1].tool_names, "Grep");
    }

    #[test]
    fn skips_uuid_less_and_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            dir.path(),
            "-p",
            "s2.jsonl",
            &[
                r#"{"type":"summary","summary":"metadata snapshot without uuid"}"#,
                r#"not json at all"#,
                r#"{"uuid":"u1","sessionId":"s2","type":"user","timestamp":"2026-07-01T10:00:00.000Z","message":{"role":"user","content":"hi"}}"#,
            ],
        );

        let parsed = parse_conversation_file(&path, dir.path()).unwrap();
        assert_eq!(parsed.meta.message_count, 1);
        assert_eq!(parsed.messages[0].uuid, "u1");
    }

    #[test]
    fn falls_back_to_filename_for_session_id() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            dir.path(),
            "-p",
            "fallback-id.jsonl",
            &[r#"{"uuid":"u1","type":"user","message":{"role":"user","content":"x"}}"#],
        );
        let parsed = parse_conversation_file(&path, dir.path()).unwrap();
        assert_eq!(parsed.meta.id, "fallback-id");
    }

    #[test]
    fn raw_line_preserved_verbatim() {
        let dir = TempDir::new().unwrap();
        let line = r#"{"uuid":"u1","sessionId":"s","type":"user","extra_field":{"nested":true},"message":{"role":"user","content":"x"}}"#;
        let path = write_session(dir.path(), "-p", "s.jsonl", &[line]);
        let parsed = parse_conversation_file(&path, dir.path()).unwrap();
        assert_eq!(parsed.messages[0].content_json, line);
    }

    #[test]
    fn no_fts_row_for_contentless_message() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            dir.path(),
            "-p",
            "s.jsonl",
            &[r#"{"uuid":"u1","sessionId":"s","type":"user","message":{"role":"user","content":[]}}"#],
        );
        let parsed = parse_conversation_file(&path, dir.path()).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert!(parsed.fts_rows.is_empty());
    }

    #[test]
    fn sidechain_flag_carried() {
        let dir = TempDir::new().unwrap();
        let path = write_session(
            dir.path(),
            "-p",
            "s.jsonl",
            &[
                r#"{"uuid":"u1","sessionId":"s","type":"assistant","isSidechain":true,"agentId":"helper","message":{"role":"assistant","content":"side"}}"#,
            ],
        );
        let parsed = parse_conversation_file(&path, dir.path()).unwrap();
        assert!(parsed.messages[0].is_sidechain);
        assert_eq!(parsed.messages[0].agent_id.as_deref(), Some("helper"));
    }
}
