//! Anthropic ↔ OpenAI format translation
//!
//! Providers that speak the chat-completions schema get their traffic
//! translated in both directions:
//!
//! ```text
//! Canonical request (Anthropic Messages)
//!     ↓ request::to_openai
//! OpenAI chat-completions request
//!     ↓ [upstream]
//! OpenAI response
//!     ↓ response::to_canonical          (buffered)
//!     ↓ stream::StreamTranslator        (SSE, chunk by chunk)
//! Canonical response / canonical SSE events
//! ```
//!
//! The streaming direction is a small state machine rather than a pile of
//! booleans; see [`stream`].

pub mod request;
pub mod response;
pub mod stream;

pub use request::to_openai;
pub use response::to_canonical;
pub use stream::StreamTranslator;

use serde::Serialize;

/// Convert an OpenAI finish_reason to an Anthropic stop_reason
pub fn convert_finish_reason(finish_reason: &str) -> String {
    match finish_reason {
        "stop" => "end_turn".to_string(),
        "length" => "max_tokens".to_string(),
        "tool_calls" => "tool_use".to_string(),
        "content_filter" => "end_turn".to_string(),
        _ => "end_turn".to_string(),
    }
}

/// Format an Anthropic SSE event: `event: <type>\ndata: <json>\n\n`
pub(crate) fn format_sse_event<T: Serialize>(
    event_type: &str,
    data: &T,
) -> anyhow::Result<Vec<u8>> {
    let json = serde_json::to_string(data)?;
    Ok(format!("event: {}\ndata: {}\n\n", event_type, json).into_bytes())
}
