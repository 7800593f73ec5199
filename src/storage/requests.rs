//! Request log: writes from the pipeline, reads for the analytics API
//!
//! A request row is inserted when the upstream call begins (header row with
//! no response) and updated exactly once when the response completes. The
//! update is a single statement that stores the response blob and extracts
//! the usage fields into indexed columns with `json_extract`, so the columns
//! cannot disagree with the stored body.
//!
//! All read queries work over indexed columns; the only JSON decoded in
//! application code is the `tools_used` array (tool stats) and percentile
//! computation happens in the application because SQLite has no native
//! percentile aggregate.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::Storage;

// ─────────────────────────────────────────────────────────────────────────────
// Time windows
// ─────────────────────────────────────────────────────────────────────────────

/// Half-open query window `[start, end)`
#[derive(Debug, Clone, Copy)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    /// Default window when the caller gives no bounds: the last 30 days
    pub const DEFAULT_DAYS: i64 = 30;

    pub fn resolve(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - Duration::days(Self::DEFAULT_DAYS));
        Self { start, end }
    }

    fn bounds(&self) -> (String, String) {
        (format_ts(&self.start), format_ts(&self.end))
    }
}

/// Canonical timestamp format for all stored rows: RFC 3339 UTC with
/// millisecond precision, lexicographically ordered
pub(crate) fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// A request at capture time (before the response exists)
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub endpoint: String,
    /// Captured request headers (auth values fingerprinted, never stored raw)
    pub headers: serde_json::Value,
    /// Canonical request body
    pub body: serde_json::Value,
    /// Effective model sent upstream
    pub model: String,
    pub original_model: String,
    /// Set only when routing rewrote the model
    pub routed_model: Option<String>,
    pub provider: String,
    pub subagent_name: Option<String>,
    /// Tool names offered in the request
    pub tools_used: Vec<String>,
}

/// The structured response blob stored on completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub headers: serde_json::Value,
    /// Canonical response body (or error envelope); for truncated streams,
    /// whatever was assembled before the disconnect
    pub body: serde_json::Value,
    pub is_streaming: bool,
    pub truncated: bool,
    pub completed_at: DateTime<Utc>,
}

/// One-shot response update for a request row
#[derive(Debug, Clone)]
pub struct ResponseUpdate {
    pub request_id: String,
    pub response: ResponseRecord,
    pub tool_call_count: u32,
    pub response_time_ms: u64,
    pub first_byte_time_ms: u64,
}

/// Indexed-columns-only view of a request row
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub id: String,
    pub timestamp: String,
    pub method: String,
    pub endpoint: String,
    pub model: String,
    pub original_model: String,
    pub routed_model: Option<String>,
    pub provider: String,
    pub subagent_name: Option<String>,
    pub tools_used: Vec<String>,
    pub tool_call_count: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub response_time_ms: u64,
    pub first_byte_time_ms: u64,
    pub status: Option<u16>,
}

impl RequestSummary {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let tools_json: String = row.get("tools_used")?;
        Ok(Self {
            id: row.get("id")?,
            timestamp: row.get("timestamp")?,
            method: row.get("method")?,
            endpoint: row.get("endpoint")?,
            model: row.get("model")?,
            original_model: row.get("original_model")?,
            routed_model: row.get("routed_model")?,
            provider: row.get("provider")?,
            subagent_name: row.get("subagent_name")?,
            tools_used: serde_json::from_str(&tools_json).unwrap_or_default(),
            tool_call_count: row.get("tool_call_count")?,
            input_tokens: row.get("input_tokens")?,
            output_tokens: row.get("output_tokens")?,
            cache_read_tokens: row.get("cache_read_tokens")?,
            cache_creation_tokens: row.get("cache_creation_tokens")?,
            response_time_ms: row.get("response_time_ms")?,
            first_byte_time_ms: row.get("first_byte_time_ms")?,
            status: row.get("status")?,
        })
    }
}

const SUMMARY_COLUMNS: &str = "id, timestamp, method, endpoint, model, original_model, \
     routed_model, provider, subagent_name, tools_used, tool_call_count, input_tokens, \
     output_tokens, cache_read_tokens, cache_creation_tokens, response_time_ms, \
     first_byte_time_ms, status";

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

impl Storage {
    /// Insert a new request row. Idempotent on `id`.
    pub fn save_request(&self, record: &RequestRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO requests (
                id, timestamp, method, endpoint, headers_json, body_json,
                model, original_model, routed_model, provider, subagent_name, tools_used
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO NOTHING
            "#,
            params![
                record.id,
                format_ts(&record.timestamp),
                record.method,
                record.endpoint,
                record.headers.to_string(),
                record.body.to_string(),
                record.model,
                record.original_model,
                record.routed_model,
                record.provider,
                record.subagent_name,
                serde_json::to_string(&record.tools_used)?,
            ],
        )
        .context("inserting request")?;
        Ok(())
    }

    /// Write the response blob and extract its usage into the indexed
    /// columns, all in one UPDATE.
    pub fn update_request_with_response(&self, update: &ResponseUpdate) -> Result<()> {
        let conn = self.conn()?;
        let response_json =
            serde_json::to_string(&update.response).context("serializing response record")?;
        let changed = conn
            .execute(
                r#"
                UPDATE requests SET
                    response_json = ?1,
                    status = ?2,
                    input_tokens = COALESCE(json_extract(?1, '$.body.usage.input_tokens'), 0),
                    output_tokens = COALESCE(json_extract(?1, '$.body.usage.output_tokens'), 0),
                    cache_read_tokens = COALESCE(json_extract(?1, '$.body.usage.cache_read_input_tokens'), 0),
                    cache_creation_tokens = COALESCE(json_extract(?1, '$.body.usage.cache_creation_input_tokens'), 0),
                    tool_call_count = ?3,
                    response_time_ms = ?4,
                    first_byte_time_ms = ?5
                WHERE id = ?6
                "#,
                params![
                    response_json,
                    update.response.status,
                    update.tool_call_count,
                    update.response_time_ms,
                    update.first_byte_time_ms,
                    update.request_id,
                ],
            )
            .context("updating request with response")?;
        if changed == 0 {
            tracing::warn!(
                request_id = %update.request_id,
                "Response update matched no request row"
            );
        }
        Ok(())
    }

    /// Delete all request rows, returning how many were removed
    pub fn clear_requests(&self) -> Result<u64> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM requests", [])
            .context("clearing requests")?;
        Ok(deleted as u64)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct OverviewStats {
    pub total_requests: u64,
    pub error_requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourlyBucket {
    pub hour: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyBucket {
    pub day: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub provider: String,
    pub requests: u64,
    pub error_requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_response_time_ms: f64,
    pub avg_first_byte_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubagentStats {
    pub subagent_name: String,
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub requests: u64,
    pub avg_response_time_ms: f64,
    pub p50_response_time_ms: u64,
    pub p95_response_time_ms: u64,
    pub p99_response_time_ms: u64,
    pub avg_first_byte_ms: f64,
    pub p50_first_byte_ms: u64,
    pub p95_first_byte_ms: u64,
    pub p99_first_byte_ms: u64,
}

impl Storage {
    /// Paginated request summaries, newest first. Returns the page plus the
    /// total row count under the same filter.
    pub fn get_requests_summary_paginated(
        &self,
        model_filter: Option<&str>,
        window: TimeWindow,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<RequestSummary>, u64)> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let model = model_filter.map(str::to_string);

        let mut where_clause = String::from("timestamp >= ?1 AND timestamp < ?2");
        let mut filter_params: Vec<&dyn ToSql> = vec![&start, &end];
        if let Some(model) = &model {
            where_clause.push_str(" AND model = ?3");
            filter_params.push(model);
        }

        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM requests WHERE {}", where_clause),
            filter_params.as_slice(),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM requests WHERE {} ORDER BY timestamp DESC LIMIT {} OFFSET {}",
            SUMMARY_COLUMNS, where_clause, limit, offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(filter_params.as_slice(), RequestSummary::from_row)?;
        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row?);
        }
        Ok((summaries, total))
    }

    pub fn get_request_by_id(&self, id: &str) -> Result<Option<RequestSummary>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM requests WHERE id = ?1", SUMMARY_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![id], RequestSummary::from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn get_stats(&self, window: TimeWindow) -> Result<OverviewStats> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let stats = conn.query_row(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status >= 400 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(SUM(cache_read_tokens), 0),
                COALESCE(SUM(cache_creation_tokens), 0),
                COALESCE(AVG(response_time_ms), 0.0)
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2
            "#,
            params![start, end],
            |row| {
                Ok(OverviewStats {
                    total_requests: row.get(0)?,
                    error_requests: row.get(1)?,
                    input_tokens: row.get(2)?,
                    output_tokens: row.get(3)?,
                    cache_read_tokens: row.get(4)?,
                    cache_creation_tokens: row.get(5)?,
                    avg_response_time_ms: row.get(6)?,
                })
            },
        )?;
        Ok(stats)
    }

    pub fn get_hourly_stats(&self, window: TimeWindow) -> Result<Vec<HourlyBucket>> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                strftime('%Y-%m-%dT%H:00:00Z', timestamp) AS hour,
                COUNT(*),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(AVG(response_time_ms), 0.0)
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2
            GROUP BY hour
            ORDER BY hour
            "#,
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(HourlyBucket {
                hour: row.get(0)?,
                requests: row.get(1)?,
                input_tokens: row.get(2)?,
                output_tokens: row.get(3)?,
                avg_response_time_ms: row.get(4)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Daily buckets over the window (the weekly endpoint's shape)
    pub fn get_daily_stats(&self, window: TimeWindow) -> Result<Vec<DailyBucket>> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                date(timestamp) AS day,
                COUNT(*),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(AVG(response_time_ms), 0.0)
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2
            GROUP BY day
            ORDER BY day
            "#,
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(DailyBucket {
                day: row.get(0)?,
                requests: row.get(1)?,
                input_tokens: row.get(2)?,
                output_tokens: row.get(3)?,
                avg_response_time_ms: row.get(4)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn get_model_stats(&self, window: TimeWindow) -> Result<Vec<ModelStats>> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                model,
                COUNT(*),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(SUM(cache_read_tokens), 0),
                COALESCE(SUM(cache_creation_tokens), 0),
                COALESCE(AVG(response_time_ms), 0.0)
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2 AND model != ''
            GROUP BY model
            ORDER BY COUNT(*) DESC
            "#,
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(ModelStats {
                model: row.get(0)?,
                requests: row.get(1)?,
                input_tokens: row.get(2)?,
                output_tokens: row.get(3)?,
                cache_read_tokens: row.get(4)?,
                cache_creation_tokens: row.get(5)?,
                avg_response_time_ms: row.get(6)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn get_provider_stats(&self, window: TimeWindow) -> Result<Vec<ProviderStats>> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                provider,
                COUNT(*),
                COALESCE(SUM(CASE WHEN status >= 400 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(AVG(response_time_ms), 0.0),
                COALESCE(AVG(first_byte_time_ms), 0.0)
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2 AND provider != ''
            GROUP BY provider
            ORDER BY COUNT(*) DESC
            "#,
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(ProviderStats {
                provider: row.get(0)?,
                requests: row.get(1)?,
                error_requests: row.get(2)?,
                input_tokens: row.get(3)?,
                output_tokens: row.get(4)?,
                avg_response_time_ms: row.get(5)?,
                avg_first_byte_ms: row.get(6)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn get_subagent_stats(&self, window: TimeWindow) -> Result<Vec<SubagentStats>> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            r#"
            SELECT
                subagent_name,
                COUNT(*),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(AVG(response_time_ms), 0.0)
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2 AND subagent_name IS NOT NULL
            GROUP BY subagent_name
            ORDER BY COUNT(*) DESC
            "#,
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(SubagentStats {
                subagent_name: row.get(0)?,
                requests: row.get(1)?,
                input_tokens: row.get(2)?,
                output_tokens: row.get(3)?,
                avg_response_time_ms: row.get(4)?,
            })
        })?;
        collect_rows(rows)
    }

    /// Tool usage counts, decoded from the per-request JSON array in
    /// application code (no SQL aggregation over the JSON column)
    pub fn get_tool_stats(&self, window: TimeWindow) -> Result<Vec<ToolStats>> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            "SELECT tools_used FROM requests WHERE timestamp >= ?1 AND timestamp < ?2",
        )?;
        let rows = stmt.query_map(params![start, end], |row| row.get::<_, String>(0))?;

        let mut counts: HashMap<String, u64> = HashMap::new();
        for row in rows {
            let raw = row?;
            let names: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            for name in names {
                *counts.entry(name).or_insert(0) += 1;
            }
        }
        let mut stats: Vec<ToolStats> = counts
            .into_iter()
            .map(|(name, count)| ToolStats { name, count })
            .collect();
        stats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        Ok(stats)
    }

    /// Latency distribution; percentiles computed here because the SQL
    /// dialect has no percentile aggregate
    pub fn get_performance_stats(&self, window: TimeWindow) -> Result<PerformanceStats> {
        let conn = self.conn()?;
        let (start, end) = window.bounds();
        let mut stmt = conn.prepare(
            r#"
            SELECT response_time_ms, first_byte_time_ms
            FROM requests
            WHERE timestamp >= ?1 AND timestamp < ?2 AND response_json IS NOT NULL
            "#,
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok((row.get::<_, u64>(0)?, row.get::<_, u64>(1)?))
        })?;

        let mut response_times = Vec::new();
        let mut first_byte_times = Vec::new();
        for row in rows {
            let (rt, fb) = row?;
            response_times.push(rt);
            first_byte_times.push(fb);
        }
        response_times.sort_unstable();
        first_byte_times.sort_unstable();

        let avg = |values: &[u64]| {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<u64>() as f64 / values.len() as f64
            }
        };

        Ok(PerformanceStats {
            requests: response_times.len() as u64,
            avg_response_time_ms: avg(&response_times),
            p50_response_time_ms: percentile(&response_times, 50.0),
            p95_response_time_ms: percentile(&response_times, 95.0),
            p99_response_time_ms: percentile(&response_times, 99.0),
            avg_first_byte_ms: avg(&first_byte_times),
            p50_first_byte_ms: percentile(&first_byte_times, 50.0),
            p95_first_byte_ms: percentile(&first_byte_times, 95.0),
            p99_first_byte_ms: percentile(&first_byte_times, 99.0),
        })
    }
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Nearest-rank percentile over a sorted slice
fn percentile(sorted: &[u64], p: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * (sorted.len() as f64 - 1.0)).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::super::test_support::open_temp;
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, ts: DateTime<Utc>, model: &str, provider: &str) -> RequestRecord {
        RequestRecord {
            id: id.to_string(),
            timestamp: ts,
            method: "POST".to_string(),
            endpoint: "/v1/messages".to_string(),
            headers: serde_json::json!({}),
            body: serde_json::json!({"model": model}),
            model: model.to_string(),
            original_model: model.to_string(),
            routed_model: None,
            provider: provider.to_string(),
            subagent_name: None,
            tools_used: vec!["Read".to_string(), "Edit".to_string()],
        }
    }

    fn response_update(id: &str, input: u64, output: u64, ms: u64) -> ResponseUpdate {
        ResponseUpdate {
            request_id: id.to_string(),
            response: ResponseRecord {
                status: 200,
                headers: serde_json::json!({}),
                body: serde_json::json!({
                    "id": format!("msg_{}", id),
                    "type": "message",
                    "role": "assistant",
                    "model": "claude-3-opus",
                    "content": [{"type": "text", "text": "ok"}],
                    "usage": {
                        "input_tokens": input,
                        "output_tokens": output,
                        "cache_read_input_tokens": 3,
                        "cache_creation_input_tokens": 4
                    }
                }),
                is_streaming: false,
                truncated: false,
                completed_at: Utc::now(),
            },
            tool_call_count: 1,
            response_time_ms: ms,
            first_byte_time_ms: ms / 2,
        }
    }

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, h, m, 0).unwrap()
    }

    fn window() -> TimeWindow {
        TimeWindow {
            start: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn save_request_is_idempotent() {
        let (_dir, storage) = open_temp();
        let r = record("r1", ts(10, 0), "claude-3-opus", "anthropic");
        storage.save_request(&r).unwrap();
        storage.save_request(&r).unwrap();
        let (rows, total) = storage
            .get_requests_summary_paginated(None, window(), 0, 10)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, None, "in-flight rows have no status yet");
    }

    #[test]
    fn response_update_extracts_usage_columns() {
        let (_dir, storage) = open_temp();
        storage
            .save_request(&record("r1", ts(10, 0), "claude-3-opus", "anthropic"))
            .unwrap();
        storage
            .update_request_with_response(&response_update("r1", 100, 25, 840))
            .unwrap();

        let summary = storage.get_request_by_id("r1").unwrap().unwrap();
        assert_eq!(summary.input_tokens, 100);
        assert_eq!(summary.output_tokens, 25);
        assert_eq!(summary.cache_read_tokens, 3);
        assert_eq!(summary.cache_creation_tokens, 4);
        assert_eq!(summary.tool_call_count, 1);
        assert_eq!(summary.response_time_ms, 840);
        assert_eq!(summary.status, Some(200));
    }

    #[test]
    fn usage_columns_agree_with_stored_response() {
        // The §invariant: token columns always match the parsed response body
        let (_dir, storage) = open_temp();
        storage
            .save_request(&record("r1", ts(10, 0), "claude-3-opus", "anthropic"))
            .unwrap();
        storage
            .update_request_with_response(&response_update("r1", 42, 7, 100))
            .unwrap();

        let conn = storage.conn().unwrap();
        let (cols, body): (u64, String) = conn
            .query_row(
                "SELECT input_tokens + output_tokens + cache_read_tokens + cache_creation_tokens,
                        response_json FROM requests WHERE id = 'r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        let parsed: ResponseRecord = serde_json::from_str(&body).unwrap();
        let usage = &parsed.body["usage"];
        let from_body = usage["input_tokens"].as_u64().unwrap()
            + usage["output_tokens"].as_u64().unwrap()
            + usage["cache_read_input_tokens"].as_u64().unwrap()
            + usage["cache_creation_input_tokens"].as_u64().unwrap();
        assert_eq!(cols, from_body);
    }

    #[test]
    fn pagination_and_model_filter() {
        let (_dir, storage) = open_temp();
        for i in 0..5 {
            let model = if i % 2 == 0 { "opus" } else { "sonnet" };
            storage
                .save_request(&record(&format!("r{}", i), ts(10, i), model, "anthropic"))
                .unwrap();
        }

        let (rows, total) = storage
            .get_requests_summary_paginated(None, window(), 0, 2)
            .unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
        // Newest first
        assert_eq!(rows[0].id, "r4");

        let (rows, total) = storage
            .get_requests_summary_paginated(Some("opus"), window(), 0, 10)
            .unwrap();
        assert_eq!(total, 3);
        assert!(rows.iter().all(|r| r.model == "opus"));
    }

    #[test]
    fn clear_requests_reports_count() {
        let (_dir, storage) = open_temp();
        for i in 0..3 {
            storage
                .save_request(&record(&format!("r{}", i), ts(9, i), "opus", "anthropic"))
                .unwrap();
        }
        assert_eq!(storage.clear_requests().unwrap(), 3);
        assert_eq!(storage.clear_requests().unwrap(), 0);
    }

    #[test]
    fn stats_aggregate_over_window() {
        let (_dir, storage) = open_temp();
        for i in 0..4 {
            let id = format!("r{}", i);
            storage
                .save_request(&record(&id, ts(10 + i, 0), "opus", "anthropic"))
                .unwrap();
            storage
                .update_request_with_response(&response_update(&id, 10, 5, 100 * (i as u64 + 1)))
                .unwrap();
        }

        let stats = storage.get_stats(window()).unwrap();
        assert_eq!(stats.total_requests, 4);
        assert_eq!(stats.input_tokens, 40);
        assert_eq!(stats.output_tokens, 20);
        assert!((stats.avg_response_time_ms - 250.0).abs() < 0.001);

        let hourly = storage.get_hourly_stats(window()).unwrap();
        assert_eq!(hourly.len(), 4);
        assert_eq!(hourly[0].hour, "2026-07-01T10:00:00Z");

        let daily = storage.get_daily_stats(window()).unwrap();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].requests, 4);

        let models = storage.get_model_stats(window()).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model, "opus");
        assert_eq!(models[0].requests, 4);

        let providers = storage.get_provider_stats(window()).unwrap();
        assert_eq!(providers[0].provider, "anthropic");
        assert_eq!(providers[0].error_requests, 0);
    }

    #[test]
    fn tool_stats_decode_in_app() {
        let (_dir, storage) = open_temp();
        for i in 0..3 {
            storage
                .save_request(&record(&format!("r{}", i), ts(10, i), "opus", "anthropic"))
                .unwrap();
        }
        let tools = storage.get_tool_stats(window()).unwrap();
        // Every record offers Read and Edit
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|t| t.count == 3));
    }

    #[test]
    fn performance_percentiles() {
        let (_dir, storage) = open_temp();
        for (i, ms) in [100u64, 200, 300, 400, 500].iter().enumerate() {
            let id = format!("r{}", i);
            storage
                .save_request(&record(&id, ts(10, i as u32), "opus", "anthropic"))
                .unwrap();
            storage
                .update_request_with_response(&response_update(&id, 1, 1, *ms))
                .unwrap();
        }
        let perf = storage.get_performance_stats(window()).unwrap();
        assert_eq!(perf.requests, 5);
        assert_eq!(perf.p50_response_time_ms, 300);
        assert_eq!(perf.p99_response_time_ms, 500);
        assert!((perf.avg_response_time_ms - 300.0).abs() < 0.001);
    }

    #[test]
    fn percentile_edges() {
        assert_eq!(percentile(&[], 50.0), 0);
        assert_eq!(percentile(&[7], 99.0), 7);
        assert_eq!(percentile(&[1, 2, 3, 4], 0.0), 1);
        assert_eq!(percentile(&[1, 2, 3, 4], 100.0), 4);
    }

    #[test]
    fn subagent_stats_skip_null_names() {
        let (_dir, storage) = open_temp();
        let mut with_agent = record("r1", ts(10, 0), "opus", "openai");
        with_agent.subagent_name = Some("code-reviewer".to_string());
        storage.save_request(&with_agent).unwrap();
        storage
            .save_request(&record("r2", ts(10, 1), "opus", "anthropic"))
            .unwrap();

        let stats = storage.get_subagent_stats(window()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].subagent_name, "code-reviewer");
    }

    #[test]
    fn window_resolve_defaults_to_last_30_days() {
        let w = TimeWindow::resolve(None, None);
        let span = w.end - w.start;
        assert_eq!(span.num_days(), TimeWindow::DEFAULT_DAYS);
    }
}
