//! OpenAI → canonical response translation (buffered)
//!
//! The full chat-completions response is mapped to a canonical Messages
//! response at once: `prompt_tokens` → `input_tokens`, `completion_tokens` →
//! `output_tokens`, `finish_reason` → `stop_reason`, tool calls → tool_use
//! blocks. Streaming translation lives in [`super::stream`].

use serde::Deserialize;

use super::convert_finish_reason;
use crate::messages::{ContentBlock, MessagesResponse, Usage};

// ============================================================================
// OpenAI Response Types (Input - Deserialize)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenAiChatCompletion {
    pub id: String,
    /// Some providers omit this field
    #[serde(default)]
    #[allow(dead_code)]
    pub object: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub created: Option<u64>,
    /// Upstream model id; the client sees the model it asked for instead
    #[allow(dead_code)]
    pub model: String,
    pub choices: Vec<OpenAiChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    #[serde(default)]
    #[allow(dead_code)]
    pub index: u32,
    pub message: OpenAiResponseMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    #[allow(dead_code)]
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseToolCall {
    pub id: String,
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    pub call_type: Option<String>,
    pub function: OpenAiResponseFunction,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiResponseFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct OpenAiUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    #[allow(dead_code)]
    pub total_tokens: u64,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_input_tokens: 0,
            cache_creation_input_tokens: 0,
        }
    }
}

// ============================================================================
// Streaming chunk types (consumed by stream.rs)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenAiStreamChunk {
    pub id: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub object: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    pub created: Option<u64>,
    #[serde(default)]
    #[allow(dead_code)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiStreamChoice {
    #[serde(default)]
    #[allow(dead_code)]
    pub index: u32,
    pub delta: OpenAiDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpenAiDelta {
    #[serde(default)]
    #[allow(dead_code)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<OpenAiToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiToolCallDelta {
    #[serde(default)]
    #[allow(dead_code)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    #[allow(dead_code)]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
pub struct OpenAiFunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

// ============================================================================
// Translation
// ============================================================================

/// Translate a complete chat-completions response to canonical form.
///
/// `model` is reported back to the client instead of the upstream's model
/// name, so the client sees the model it asked for.
pub fn to_canonical(response: &OpenAiChatCompletion, model: &str) -> MessagesResponse {
    let choice = response.choices.first();

    let mut content: Vec<ContentBlock> = Vec::new();

    if let Some(choice) = choice {
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(ContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(tool_calls) = &choice.message.tool_calls {
            for tc in tool_calls {
                let input: serde_json::Value =
                    serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({}));
                content.push(ContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input,
                });
            }
        }
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(convert_finish_reason);

    MessagesResponse {
        id: format!("msg_{}", response.id.replace("chatcmpl-", "")),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: model.to_string(),
        stop_reason,
        stop_sequence: None,
        usage: response.usage.map(Usage::from).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_text_response() {
        let openai: OpenAiChatCompletion = serde_json::from_str(
            r#"{
                "id": "chatcmpl-123",
                "object": "chat.completion",
                "created": 1234567890,
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "Hello!"},
                    "finish_reason": "stop"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            }"#,
        )
        .unwrap();

        let canonical = to_canonical(&openai, "claude-3-opus");
        assert_eq!(canonical.id, "msg_123");
        assert_eq!(canonical.response_type, "message");
        assert_eq!(canonical.model, "claude-3-opus");
        assert_eq!(canonical.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(canonical.usage.input_tokens, 10);
        assert_eq!(canonical.usage.output_tokens, 5);
        assert!(
            matches!(&canonical.content[0], ContentBlock::Text { text } if text == "Hello!")
        );
    }

    #[test]
    fn buffered_tool_call_response() {
        let openai: OpenAiChatCompletion = serde_json::from_str(
            r#"{
                "id": "chatcmpl-9",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "content": null,
                        "tool_calls": [{
                            "id": "call_abc",
                            "type": "function",
                            "function": {"name": "get_weather", "arguments": "{\"city\":\"London\"}"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": {"prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30}
            }"#,
        )
        .unwrap();

        let canonical = to_canonical(&openai, "claude-3-opus");
        assert_eq!(canonical.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(canonical.tool_call_count(), 1);
        match &canonical.content[0] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "call_abc");
                assert_eq!(name, "get_weather");
                assert_eq!(input["city"], "London");
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }

    #[test]
    fn malformed_tool_arguments_become_empty_object() {
        let openai: OpenAiChatCompletion = serde_json::from_str(
            r#"{
                "id": "chatcmpl-9",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {
                        "role": "assistant",
                        "tool_calls": [{
                            "id": "call_x",
                            "function": {"name": "f", "arguments": "{not json"}
                        }]
                    },
                    "finish_reason": "tool_calls"
                }]
            }"#,
        )
        .unwrap();

        let canonical = to_canonical(&openai, "claude-3-opus");
        match &canonical.content[0] {
            ContentBlock::ToolUse { input, .. } => {
                assert_eq!(input, &serde_json::json!({}));
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }

    #[test]
    fn missing_usage_defaults_to_zero() {
        let openai: OpenAiChatCompletion = serde_json::from_str(
            r#"{
                "id": "chatcmpl-1",
                "model": "gpt-4o",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": "x"},
                    "finish_reason": "stop"
                }]
            }"#,
        )
        .unwrap();
        let canonical = to_canonical(&openai, "claude-3-opus");
        assert_eq!(canonical.usage.total(), 0);
    }
}
