//! Response recorder - assembles the persisted record from the teed stream
//!
//! One copy of the response body flows to the client untouched; this
//! recorder consumes the second copy. For SSE bodies it reassembles the
//! canonical events (message_start, content_block_*, message_delta) into a
//! structured response with usage, stop reason, and tool-call count. The
//! recorder never does I/O while the stream is live; the pipeline persists
//! its output after the client stream closes.

use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::messages::Usage;
use crate::storage::{ResponseRecord, ResponseUpdate};

/// One content block being accumulated from delta events
#[derive(Debug)]
struct BlockAcc {
    kind: String,
    id: Option<String>,
    name: Option<String>,
    text: String,
    /// Concatenated input_json_delta fragments for tool_use blocks
    input_json: String,
}

impl BlockAcc {
    fn from_start(block: &serde_json::Value) -> Self {
        Self {
            kind: block
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or("text")
                .to_string(),
            id: block.get("id").and_then(|v| v.as_str()).map(String::from),
            name: block.get("name").and_then(|v| v.as_str()).map(String::from),
            text: block
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            input_json: String::new(),
        }
    }

    fn to_content_block(&self) -> serde_json::Value {
        match self.kind.as_str() {
            "tool_use" => {
                let input: serde_json::Value = if self.input_json.is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&self.input_json).unwrap_or(json!({}))
                };
                json!({
                    "type": "tool_use",
                    "id": self.id.clone().unwrap_or_default(),
                    "name": self.name.clone().unwrap_or_default(),
                    "input": input,
                })
            }
            _ => json!({"type": "text", "text": self.text}),
        }
    }
}

/// Accumulates completion events from a response stream (or a complete
/// buffered body) into a [`ResponseUpdate`].
pub(crate) struct ResponseRecorder {
    request_id: String,
    status: u16,
    headers: serde_json::Value,
    is_streaming: bool,
    started: Instant,
    first_byte_ms: u64,
    /// Incomplete trailing UTF-8 sequence carried across chunk boundaries
    /// (chunks can split a multi-byte character)
    pending_bytes: Vec<u8>,
    line_buffer: String,
    message_id: Option<String>,
    model: Option<String>,
    blocks: Vec<BlockAcc>,
    stop_reason: Option<String>,
    usage: Usage,
    /// Raw body kept when the stream never produced canonical events
    /// (error bodies, unexpected payloads)
    raw_fallback: Vec<u8>,
}

impl ResponseRecorder {
    pub fn new(
        request_id: String,
        status: u16,
        content_type: &str,
        is_streaming: bool,
        started: Instant,
        first_byte_ms: u64,
    ) -> Self {
        Self {
            request_id,
            status,
            headers: json!({"content-type": content_type}),
            is_streaming,
            started,
            first_byte_ms,
            pending_bytes: Vec::new(),
            line_buffer: String::new(),
            message_id: None,
            model: None,
            blocks: Vec::new(),
            stop_reason: None,
            usage: Usage::default(),
            raw_fallback: Vec::new(),
        }
    }

    /// Observe one teed chunk of the (canonical) response body
    pub fn observe(&mut self, chunk: &[u8]) {
        if self.raw_fallback.len() < 64 * 1024 {
            self.raw_fallback.extend_from_slice(chunk);
        }

        // An incomplete multi-byte character at a chunk boundary waits in
        // pending_bytes for the next chunk; nothing is dropped
        self.pending_bytes.extend_from_slice(chunk);
        let text = match crate::util::drain_utf8_prefix(&mut self.pending_bytes) {
            Ok(text) => text,
            Err(e) => {
                // Genuinely invalid bytes: keep what can be decoded rather
                // than losing the whole chunk from the record
                tracing::debug!("Invalid UTF-8 in response stream: {}", e);
                let bytes = std::mem::take(&mut self.pending_bytes);
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };
        if text.is_empty() {
            return;
        }
        self.line_buffer.push_str(&text);

        while let Some(newline_pos) = self.line_buffer.find('\n') {
            let line = self.line_buffer[..newline_pos].trim().to_string();
            self.line_buffer.drain(..=newline_pos);
            self.observe_line(&line);
        }
    }

    fn observe_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:").map(str::trim) else {
            return;
        };
        if data.is_empty() || data == "[DONE]" {
            return;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            return;
        };

        match event.get("type").and_then(|t| t.as_str()) {
            Some("message_start") => {
                if let Some(message) = event.get("message") {
                    self.message_id = message
                        .get("id")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    self.model = message
                        .get("model")
                        .and_then(|v| v.as_str())
                        .map(String::from);
                    if let Some(usage) = message.get("usage") {
                        self.merge_usage(usage);
                    }
                }
            }
            Some("content_block_start") => {
                if let Some(block) = event.get("content_block") {
                    self.blocks.push(BlockAcc::from_start(block));
                }
            }
            Some("content_block_delta") => {
                let Some(delta) = event.get("delta") else {
                    return;
                };
                let Some(last) = self.blocks.last_mut() else {
                    return;
                };
                if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                    last.text.push_str(text);
                }
                if let Some(partial) = delta.get("partial_json").and_then(|v| v.as_str()) {
                    last.input_json.push_str(partial);
                }
            }
            Some("message_delta") => {
                if let Some(delta) = event.get("delta") {
                    if let Some(reason) = delta.get("stop_reason").and_then(|v| v.as_str()) {
                        self.stop_reason = Some(reason.to_string());
                    }
                }
                if let Some(usage) = event.get("usage") {
                    self.merge_usage(usage);
                }
            }
            _ => {}
        }
    }

    fn merge_usage(&mut self, usage: &serde_json::Value) {
        let read = |key: &str| usage.get(key).and_then(|v| v.as_u64()).unwrap_or(0);
        self.usage.merge(&Usage {
            input_tokens: read("input_tokens"),
            output_tokens: read("output_tokens"),
            cache_read_input_tokens: read("cache_read_input_tokens"),
            cache_creation_input_tokens: read("cache_creation_input_tokens"),
        });
    }

    /// Build the persisted update. `truncated` marks streams the client
    /// abandoned before completion.
    pub fn finalize(mut self, truncated: bool) -> ResponseUpdate {
        // Flush a final unterminated line (possible on truncation)
        if !self.line_buffer.is_empty() {
            let line = std::mem::take(&mut self.line_buffer);
            self.observe_line(line.trim());
        }

        let saw_events = self.message_id.is_some() || !self.blocks.is_empty();
        let body = if saw_events {
            let content: Vec<serde_json::Value> =
                self.blocks.iter().map(BlockAcc::to_content_block).collect();
            json!({
                "id": self.message_id.clone().unwrap_or_default(),
                "type": "message",
                "role": "assistant",
                "model": self.model.clone().unwrap_or_default(),
                "content": content,
                "stop_reason": self.stop_reason,
                "usage": {
                    "input_tokens": self.usage.input_tokens,
                    "output_tokens": self.usage.output_tokens,
                    "cache_read_input_tokens": self.usage.cache_read_input_tokens,
                    "cache_creation_input_tokens": self.usage.cache_creation_input_tokens,
                },
            })
        } else {
            // No canonical events observed; keep whatever the body was
            serde_json::from_slice(&self.raw_fallback)
                .unwrap_or_else(|_| json!({"raw": String::from_utf8_lossy(&self.raw_fallback)}))
        };

        let tool_call_count = self
            .blocks
            .iter()
            .filter(|b| b.kind == "tool_use")
            .count() as u32;

        tracing::debug!(
            request_id = %self.request_id,
            tokens = self.usage.total(),
            tool_calls = tool_call_count,
            truncated,
            "Response recorded"
        );

        ResponseUpdate {
            request_id: self.request_id,
            response: ResponseRecord {
                status: self.status,
                headers: self.headers,
                body,
                is_streaming: self.is_streaming,
                truncated,
                completed_at: Utc::now(),
            },
            tool_call_count,
            response_time_ms: self.started.elapsed().as_millis() as u64,
            first_byte_time_ms: self.first_byte_ms,
        }
    }

    /// Record a complete buffered body in one call
    pub fn observe_buffered(&mut self, body: &[u8]) {
        self.raw_fallback = body.to_vec();
        if let Ok(message) = serde_json::from_slice::<serde_json::Value>(body) {
            self.message_id = message
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from);
            self.model = message
                .get("model")
                .and_then(|v| v.as_str())
                .map(String::from);
            self.stop_reason = message
                .get("stop_reason")
                .and_then(|v| v.as_str())
                .map(String::from);
            if let Some(usage) = message.get("usage") {
                self.merge_usage(usage);
            }
            if let Some(blocks) = message.get("content").and_then(|c| c.as_array()) {
                for block in blocks {
                    let mut acc = BlockAcc::from_start(block);
                    if acc.kind == "tool_use" {
                        if let Some(input) = block.get("input") {
                            acc.input_json = input.to_string();
                        }
                    }
                    self.blocks.push(acc);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(streaming: bool) -> ResponseRecorder {
        ResponseRecorder::new(
            "req_1".to_string(),
            200,
            if streaming {
                "text/event-stream"
            } else {
                "application/json"
            },
            streaming,
            Instant::now(),
            12,
        )
    }

    #[test]
    fn assembles_streamed_text_response() {
        let mut rec = recorder(true);
        rec.observe(b"event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"claude-3-opus\",\"usage\":{\"input_tokens\":9}}}\n\n");
        rec.observe(b"event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n");
        rec.observe(b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"hel\"}}\n\n");
        rec.observe(b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\n\n");
        rec.observe(b"event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\n");
        rec.observe(b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\ndata: [DONE]\n\n");

        let update = rec.finalize(false);
        assert_eq!(update.response.status, 200);
        assert!(update.response.is_streaming);
        assert!(!update.response.truncated);
        assert_eq!(update.response.body["content"][0]["text"], "hello");
        assert_eq!(update.response.body["stop_reason"], "end_turn");
        assert_eq!(update.response.body["usage"]["input_tokens"], 9);
        assert_eq!(update.response.body["usage"]["output_tokens"], 5);
        assert_eq!(update.tool_call_count, 0);
    }

    #[test]
    fn counts_tool_use_blocks_and_parses_input() {
        let mut rec = recorder(true);
        rec.observe(b"data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"m\",\"usage\":{}}}\n");
        rec.observe(b"data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"t1\",\"name\":\"get_weather\",\"input\":{}}}\n");
        rec.observe(b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"city\\\":\"}}\n");
        rec.observe(b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"\\\"Oslo\\\"}\"}}\n");
        rec.observe(b"data: {\"type\":\"content_block_stop\",\"index\":0}\n");

        let update = rec.finalize(false);
        assert_eq!(update.tool_call_count, 1);
        let block = &update.response.body["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["name"], "get_weather");
        assert_eq!(block["input"]["city"], "Oslo");
    }

    #[test]
    fn chunk_boundaries_inside_lines() {
        let mut rec = recorder(true);
        let event = "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n";
        let (a, b) = event.split_at(30);
        rec.observe(a.as_bytes());
        rec.observe(b.as_bytes());
        rec.observe(b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"text\":\"ok\"}}\n");
        let update = rec.finalize(false);
        assert_eq!(update.response.body["content"][0]["text"], "ok");
    }

    #[test]
    fn chunk_boundaries_inside_multibyte_characters() {
        let mut rec = recorder(true);
        rec.observe(b"data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n");

        let event = "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"text\":\"h\u{e9}llo \u{2713}\"}}\n";
        // Cut one byte into the two-byte é
        let split_at = event.find('é').unwrap() + 1;
        let (head, tail) = event.as_bytes().split_at(split_at);
        rec.observe(head);
        rec.observe(tail);

        let update = rec.finalize(false);
        assert_eq!(update.response.body["content"][0]["text"], "héllo ✓");
    }

    #[test]
    fn multibyte_stream_fed_byte_by_byte() {
        let mut rec = recorder(true);
        let events = concat!(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n",
            "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"text\":\"日本語\"}}\n",
        );
        for byte in events.as_bytes() {
            rec.observe(std::slice::from_ref(byte));
        }
        let update = rec.finalize(false);
        assert_eq!(update.response.body["content"][0]["text"], "日本語");
    }

    #[test]
    fn truncated_stream_keeps_partial_state() {
        let mut rec = recorder(true);
        rec.observe(b"data: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\",\"model\":\"m\",\"usage\":{\"input_tokens\":3}}}\n");
        rec.observe(b"data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n");
        rec.observe(b"data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"text\":\"partial answ\"}}\n");
        // Client disconnects here
        let update = rec.finalize(true);
        assert!(update.response.truncated);
        assert_eq!(update.response.body["content"][0]["text"], "partial answ");
        assert_eq!(update.response.body["usage"]["input_tokens"], 3);
    }

    #[test]
    fn buffered_body_extracts_usage_and_tools() {
        let mut rec = recorder(false);
        rec.observe_buffered(
            br#"{
                "id": "msg_9", "type": "message", "role": "assistant",
                "model": "claude-3-opus",
                "content": [
                    {"type": "text", "text": "hi"},
                    {"type": "tool_use", "id": "t1", "name": "Read", "input": {"path": "/x"}}
                ],
                "stop_reason": "tool_use",
                "usage": {"input_tokens": 7, "output_tokens": 2}
            }"#,
        );
        let update = rec.finalize(false);
        assert_eq!(update.tool_call_count, 1);
        assert_eq!(update.response.body["usage"]["input_tokens"], 7);
        assert_eq!(update.response.body["stop_reason"], "tool_use");
        assert_eq!(update.response.body["content"][1]["input"]["path"], "/x");
    }

    #[test]
    fn error_body_falls_back_to_raw_json() {
        let mut rec = ResponseRecorder::new(
            "req_1".to_string(),
            429,
            "application/json",
            false,
            Instant::now(),
            3,
        );
        rec.observe_buffered(br#"{"type":"error","error":{"type":"rate_limit_error","message":"slow"}}"#);
        let update = rec.finalize(false);
        assert_eq!(update.response.status, 429);
        assert_eq!(update.response.body["error"]["type"], "rate_limit_error");
        assert_eq!(update.tool_call_count, 0);
    }
}
