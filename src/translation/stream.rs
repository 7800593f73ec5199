//! OpenAI → canonical SSE stream translation
//!
//! Upstream `chat.completion.chunk` events are rewritten into the Anthropic
//! event vocabulary as they arrive. The translator is an explicit state
//! machine; every upstream chunk is a transition input:
//!
//! ```text
//!        first data chunk              delta.content            tool_call id/name
//! Idle ───────────────────► InMessage ────────────► InTextBlock ───────┐
//!  │                            │  ▲                      │            ▼
//!  │                            │  └── finish_reason ─────┘       InToolBlock
//!  │                            │                                      │
//!  │                            └───────────── data: [DONE] ◄──────────┘
//!  └──────────────────────────────────────────────► Done
//! ```
//!
//! Event mapping:
//!
//! | OpenAI                          | Anthropic                            |
//! |---------------------------------|--------------------------------------|
//! | first chunk                     | `message_start` + `ping`             |
//! | `delta.content`                 | `content_block_delta` (text_delta)   |
//! | `delta.tool_calls[].id+name`    | `content_block_start` (tool_use)     |
//! | `delta.tool_calls[].arguments`  | `content_block_delta` (input_json)   |
//! | `finish_reason`                 | `message_delta` + `stop_reason`      |
//! | `data: [DONE]`                  | `message_stop` + `data: [DONE]`      |
//!
//! `message_start` and `message_stop` are each emitted exactly once per
//! stream; the state machine makes that syntactic rather than a property of
//! scattered flags.

use anyhow::{Context, Result};
use serde::Serialize;

use super::convert_finish_reason;
use super::format_sse_event;
use super::response::OpenAiStreamChunk;
use crate::messages::Usage;

/// Where the translator is within the synthesized Anthropic message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Nothing emitted yet
    Idle,
    /// message_start sent, no content block open
    InMessage,
    /// A text content block is open
    InTextBlock,
    /// A tool_use content block is open
    InToolBlock,
    /// message_stop sent; further input is ignored
    Done,
}

/// Stateful OpenAI → Anthropic SSE translator for one response stream
pub struct StreamTranslator {
    state: StreamState,
    /// Model name reported to the client (the model it asked for)
    model: String,
    /// Incomplete trailing UTF-8 sequence carried across chunk boundaries
    /// (chunks can split a multi-byte character)
    pending_bytes: Vec<u8>,
    /// Partial line carried across chunk boundaries
    line_buffer: String,
    /// Index of the currently open (or next) content block
    block_index: u32,
    /// Usage captured from the upstream (final chunk carries totals)
    usage: Usage,
    /// Stop reason captured from the finish_reason chunk, reported in the
    /// message_delta emitted at stream close (after any trailing usage chunk)
    stop_reason: Option<String>,
}

impl StreamTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            state: StreamState::Idle,
            model: model.into(),
            pending_bytes: Vec::new(),
            line_buffer: String::new(),
            block_index: 0,
            usage: Usage::default(),
            stop_reason: None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == StreamState::Done
    }

    /// Translate one upstream chunk, returning the canonical SSE bytes to
    /// forward. Partial SSE lines are buffered until their newline arrives.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>> {
        if self.state == StreamState::Done {
            return Ok(Vec::new());
        }

        self.pending_bytes.extend_from_slice(chunk);
        let text = crate::util::drain_utf8_prefix(&mut self.pending_bytes)
            .context("invalid UTF-8 in upstream chunk")?;
        self.line_buffer.push_str(&text);

        let mut output = Vec::new();
        while let Some(newline_pos) = self.line_buffer.find('\n') {
            let line = self.line_buffer[..newline_pos].trim().to_string();
            self.line_buffer.drain(..=newline_pos);

            if line.is_empty() {
                continue;
            }
            let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                // event:/comment lines carry no payload in the chat stream
                continue;
            };

            if data == "[DONE]" {
                if self.state == StreamState::Idle {
                    // Nothing was ever emitted; there is no message to close
                    self.state = StreamState::Done;
                } else {
                    output.extend(self.close_stream()?);
                }
                break;
            }
            self.translate_data(data, &mut output)?;
        }

        Ok(output)
    }

    /// Close out the stream if the upstream ended without a `[DONE]` marker
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        match self.state {
            StreamState::Idle | StreamState::Done => Ok(Vec::new()),
            _ => self.close_stream(),
        }
    }

    /// Translate one `data:` payload, appending events to `output`
    fn translate_data(&mut self, data: &str, output: &mut Vec<u8>) -> Result<()> {
        let chunk: OpenAiStreamChunk = serde_json::from_str(data)
            .with_context(|| format!("unparseable upstream chunk: {}", data))?;

        if self.state == StreamState::Idle {
            output.extend(format_sse_event(
                "message_start",
                &MessageStartEvent {
                    event_type: "message_start",
                    message: MessageStartPayload {
                        id: format!("msg_{}", chunk.id.replace("chatcmpl-", "")),
                        msg_type: "message",
                        role: "assistant",
                        content: vec![],
                        model: self.model.clone(),
                        stop_reason: None,
                        stop_sequence: None,
                        usage: UsagePayload {
                            input_tokens: 0,
                            output_tokens: 0,
                        },
                    },
                },
            )?);
            output.extend(format_sse_event("ping", &PingEvent { event_type: "ping" })?);
            self.state = StreamState::InMessage;
        }

        if let Some(usage) = chunk.usage {
            self.usage.merge(&Usage::from(usage));
        }

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    self.enter_text_block(output)?;
                    output.extend(format_sse_event(
                        "content_block_delta",
                        &ContentBlockDeltaEvent {
                            event_type: "content_block_delta",
                            index: self.block_index,
                            delta: ContentDelta::TextDelta {
                                text: content.clone(),
                            },
                        },
                    )?);
                }
            }

            if let Some(tool_calls) = &choice.delta.tool_calls {
                for tc in tool_calls {
                    let starts_new_call = tc.id.is_some()
                        || tc
                            .function
                            .as_ref()
                            .map(|f| f.name.is_some())
                            .unwrap_or(false);
                    if starts_new_call {
                        self.enter_tool_block(
                            tc.id.clone().unwrap_or_default(),
                            tc.function
                                .as_ref()
                                .and_then(|f| f.name.clone())
                                .unwrap_or_default(),
                            output,
                        )?;
                    }

                    if let Some(args) = tc.function.as_ref().and_then(|f| f.arguments.as_ref()) {
                        if !args.is_empty() && self.state == StreamState::InToolBlock {
                            output.extend(format_sse_event(
                                "content_block_delta",
                                &ContentBlockDeltaEvent {
                                    event_type: "content_block_delta",
                                    index: self.block_index,
                                    delta: ContentDelta::InputJsonDelta {
                                        partial_json: args.clone(),
                                    },
                                },
                            )?);
                        }
                    }
                }
            }

            if let Some(finish_reason) = &choice.finish_reason {
                // Close the block now; message_delta waits for stream close so
                // a trailing usage-only chunk still lands in it
                self.close_open_block(output)?;
                self.stop_reason = Some(convert_finish_reason(finish_reason));
            }
        }

        Ok(())
    }

    /// Open a text block unless one is already open
    fn enter_text_block(&mut self, output: &mut Vec<u8>) -> Result<()> {
        match self.state {
            StreamState::InTextBlock => return Ok(()),
            StreamState::InToolBlock => {
                self.close_open_block(output)?;
            }
            _ => {}
        }
        output.extend(format_sse_event(
            "content_block_start",
            &ContentBlockStartEvent {
                event_type: "content_block_start",
                index: self.block_index,
                content_block: ContentBlockPayload::Text {
                    text: String::new(),
                },
            },
        )?);
        self.state = StreamState::InTextBlock;
        Ok(())
    }

    /// Open a tool_use block, closing whatever block was open
    fn enter_tool_block(&mut self, id: String, name: String, output: &mut Vec<u8>) -> Result<()> {
        self.close_open_block(output)?;
        output.extend(format_sse_event(
            "content_block_start",
            &ContentBlockStartEvent {
                event_type: "content_block_start",
                index: self.block_index,
                content_block: ContentBlockPayload::ToolUse {
                    id,
                    name,
                    input: serde_json::json!({}),
                },
            },
        )?);
        self.state = StreamState::InToolBlock;
        Ok(())
    }

    /// Emit content_block_stop for the open block, if any
    fn close_open_block(&mut self, output: &mut Vec<u8>) -> Result<()> {
        if matches!(
            self.state,
            StreamState::InTextBlock | StreamState::InToolBlock
        ) {
            output.extend(format_sse_event(
                "content_block_stop",
                &ContentBlockStopEvent {
                    event_type: "content_block_stop",
                    index: self.block_index,
                },
            )?);
            self.block_index += 1;
            self.state = StreamState::InMessage;
        }
        Ok(())
    }

    /// Transition to Done: close blocks, emit the (single) message_delta and
    /// message_stop, then the terminal `[DONE]` marker
    fn close_stream(&mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.close_open_block(&mut output)?;
        output.extend(format_sse_event(
            "message_delta",
            &MessageDeltaEvent {
                event_type: "message_delta",
                delta: MessageDelta {
                    stop_reason: self
                        .stop_reason
                        .take()
                        .unwrap_or_else(|| "end_turn".to_string()),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: self.usage.output_tokens,
                    input_tokens: if self.usage.input_tokens > 0 {
                        Some(self.usage.input_tokens)
                    } else {
                        None
                    },
                },
            },
        )?);
        output.extend(format_sse_event(
            "message_stop",
            &MessageStopEvent {
                event_type: "message_stop",
            },
        )?);
        output.extend_from_slice(b"data: [DONE]\n\n");
        self.state = StreamState::Done;
        Ok(output)
    }
}

// ============================================================================
// Anthropic streaming event types (Output - Serialize)
// ============================================================================

#[derive(Serialize)]
struct PingEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
}

#[derive(Serialize)]
struct MessageStartEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
    message: MessageStartPayload,
}

#[derive(Serialize)]
struct MessageStartPayload {
    id: String,
    #[serde(rename = "type")]
    msg_type: &'static str,
    role: &'static str,
    content: Vec<serde_json::Value>,
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequence: Option<String>,
    usage: UsagePayload,
}

#[derive(Serialize)]
struct UsagePayload {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Serialize)]
struct ContentBlockStartEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
    index: u32,
    content_block: ContentBlockPayload,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentBlockPayload {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

#[derive(Serialize)]
struct ContentBlockDeltaEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
    index: u32,
    delta: ContentDelta,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Serialize)]
struct ContentBlockStopEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
    index: u32,
}

#[derive(Serialize)]
struct MessageDeltaEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
    delta: MessageDelta,
    usage: DeltaUsage,
}

#[derive(Serialize)]
struct MessageDelta {
    stop_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequence: Option<String>,
}

#[derive(Serialize)]
struct DeltaUsage {
    output_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    input_tokens: Option<u64>,
}

#[derive(Serialize)]
struct MessageStopEvent {
    #[serde(rename = "type")]
    event_type: &'static str,
}
