//! Canonical → OpenAI chat-completions request translation
//!
//! Key mapping differences:
//!
//! | Anthropic                       | OpenAI                           |
//! |---------------------------------|----------------------------------|
//! | Top-level `system` field        | `messages[].role: "system"`      |
//! | `content` blocks                | string content / `tool_calls`    |
//! | `tool_result` block             | separate `role: "tool"` message  |
//! | `tools[].input_schema`          | `tools[].function.parameters`    |
//! | `stop_sequences` (array)        | `stop` (array)                   |

use serde::{Deserialize, Serialize};

use crate::messages::{
    ContentBlock, Message, MessageContent, MessagesRequest, ToolChoice, ToolDefinition,
};

// ============================================================================
// OpenAI Request Types (Output - Serialize)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiChatRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<OpenAiTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<OpenAiToolChoice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<OpenAiContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OpenAiContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: OpenAiFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpenAiToolChoice {
    Mode(String), // "auto", "none", "required"
    Specific {
        #[serde(rename = "type")]
        choice_type: String,
        function: ToolChoiceFunction,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolChoiceFunction {
    pub name: String,
}

// ============================================================================
// Translation
// ============================================================================

/// Translate a canonical Messages request into chat-completions form.
///
/// `model` is the routed model name (the canonical request may still carry
/// the client's original model at this point).
pub fn to_openai(request: &MessagesRequest, model: &str) -> OpenAiChatRequest {
    let mut messages: Vec<OpenAiMessage> = Vec::new();

    // System prompt becomes a leading system message
    if let Some(system) = &request.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(OpenAiMessage {
                role: "system".to_string(),
                content: Some(OpenAiContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for msg in &request.messages {
        messages.extend(convert_message(msg));
    }

    OpenAiChatRequest {
        model: model.to_string(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone(),
        stream: request.stream,
        tools: request
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(convert_tool).collect()),
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
    }
}

/// Convert one canonical message to OpenAI form.
///
/// A single Anthropic message may produce multiple OpenAI messages:
/// tool_result blocks become separate `role: "tool"` messages.
fn convert_message(msg: &Message) -> Vec<OpenAiMessage> {
    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            return vec![OpenAiMessage {
                role: msg.role.clone(),
                content: Some(OpenAiContent::Text(text.clone())),
                tool_calls: None,
                tool_call_id: None,
            }];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut messages: Vec<OpenAiMessage> = Vec::new();
    let mut text_parts: Vec<String> = Vec::new();
    let mut image_parts: Vec<OpenAiContentPart> = Vec::new();
    let mut tool_calls: Vec<OpenAiToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => text_parts.push(text.clone()),
            ContentBlock::Image { source } => {
                // Anthropic base64 image becomes a data URL
                let data_url = format!("data:{};base64,{}", source.media_type, source.data);
                image_parts.push(OpenAiContentPart::ImageUrl {
                    image_url: ImageUrl { url: data_url },
                });
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(OpenAiToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAiFunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let result_text = content.as_ref().map(|c| c.as_text()).unwrap_or_default();
                messages.push(OpenAiMessage {
                    role: "tool".to_string(),
                    content: Some(OpenAiContent::Text(result_text)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            // Thinking blocks have no chat-completions equivalent
            ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. } => {}
        }
    }

    // The main message with text/images and/or tool calls goes first, before
    // any tool messages produced above
    if !text_parts.is_empty() || !image_parts.is_empty() || !tool_calls.is_empty() {
        let content = if !image_parts.is_empty() {
            let mut parts: Vec<OpenAiContentPart> = text_parts
                .into_iter()
                .map(|text| OpenAiContentPart::Text { text })
                .collect();
            parts.extend(image_parts);
            Some(OpenAiContent::Parts(parts))
        } else if !text_parts.is_empty() {
            Some(OpenAiContent::Text(text_parts.join("")))
        } else {
            None
        };

        messages.insert(
            0,
            OpenAiMessage {
                role: msg.role.clone(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            },
        );
    }

    if messages.is_empty() {
        messages.push(OpenAiMessage {
            role: msg.role.clone(),
            content: Some(OpenAiContent::Text(String::new())),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    messages
}

fn convert_tool(tool: &ToolDefinition) -> OpenAiTool {
    OpenAiTool {
        tool_type: "function".to_string(),
        function: OpenAiFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: Some(tool.input_schema.clone()),
        },
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> OpenAiToolChoice {
    match choice {
        ToolChoice::Auto => OpenAiToolChoice::Mode("auto".to_string()),
        ToolChoice::Any => OpenAiToolChoice::Mode("required".to_string()),
        ToolChoice::Tool { name } => OpenAiToolChoice::Specific {
            choice_type: "function".to_string(),
            function: ToolChoiceFunction { name: name.clone() },
        },
    }
}
