use std::fmt::Write as _;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request wire types
// ---------------------------------------------------------------------------

/// Anthropic Messages API request.
///
/// Numeric parameters are kept as raw JSON values: clients send numbers
/// or numeric strings interchangeably and the translator coerces them.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<serde_json::Value>,
    #[serde(default)]
    pub messages: Vec<MessageEnvelope>,
    #[serde(default)]
    pub max_tokens: Option<serde_json::Value>,
    #[serde(default)]
    pub temperature: Option<serde_json::Value>,
    #[serde(default)]
    pub top_p: Option<serde_json::Value>,
    #[serde(default)]
    pub top_k: Option<serde_json::Value>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub stop_sequences: Option<serde_json::Value>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub tool_choice: Option<serde_json::Value>,
}

/// One conversation turn; `content` is a string or a block array.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEnvelope {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

/// Anthropic tool definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// Legacy text completion request (`/v1/complete`).
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default, rename = "max_tokens_to_sample")]
    pub max_tokens: i64,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
}

/// A content block, on both the request and the response side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type", default)]
    pub source_type: String,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub data: String,
}

// ---------------------------------------------------------------------------
// Response wire types
// ---------------------------------------------------------------------------

/// Anthropic message response for the non-streaming path.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: &'static str,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub const STOP_END_TURN: &str = "end_turn";
pub const STOP_TOOL_USE: &str = "tool_use";

/// Model listing entry as the Anthropic surface reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(rename = "type")]
    pub type_: String,
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub data: Vec<ModelInfo>,
    pub has_more: bool,
}

// ---------------------------------------------------------------------------
// Streaming event frames
//
// Frames on the streaming hot path are assembled piecewise instead of
// going through serde: delta payloads are fragments dropped into a
// fixed JSON skeleton. Each finished `Bytes` is one complete
// `event: …\ndata: …\n\n` unit that is flushed on its own.
// ---------------------------------------------------------------------------

/// Builder for one SSE frame: the `event:`/`data:` envelope plus a
/// JSON payload written as skeleton pieces and escaped fragments.
struct FrameBuilder {
    out: String,
}

impl FrameBuilder {
    fn new(event: &str) -> Self {
        let mut out = String::with_capacity(160);
        out.push_str("event: ");
        out.push_str(event);
        out.push_str("\ndata: ");
        Self { out }
    }

    /// Append literal JSON skeleton text.
    fn raw(mut self, json: &str) -> Self {
        self.out.push_str(json);
        self
    }

    fn number(mut self, n: u64) -> Self {
        let _ = write!(self.out, "{n}");
        self
    }

    fn index(self, index: usize) -> Self {
        self.number(index as u64)
    }

    /// Append `value` as a JSON string literal. Runs of plain
    /// characters are copied in one slice; only quotes, backslashes,
    /// and control characters take the escape path.
    fn quoted(mut self, value: &str) -> Self {
        self.out.push('"');
        let mut copied_up_to = 0;
        for (pos, ch) in value.char_indices() {
            let escaped = match ch {
                '"' => Some("\\\""),
                '\\' => Some("\\\\"),
                '\n' => Some("\\n"),
                '\r' => Some("\\r"),
                '\t' => Some("\\t"),
                '\u{08}' => Some("\\b"),
                '\u{0c}' => Some("\\f"),
                c if c <= '\u{1f}' => None,
                _ => continue,
            };
            self.out.push_str(&value[copied_up_to..pos]);
            match escaped {
                Some(sequence) => self.out.push_str(sequence),
                None => {
                    let _ = write!(self.out, "\\u{:04x}", ch as u32);
                }
            }
            copied_up_to = pos + ch.len_utf8();
        }
        self.out.push_str(&value[copied_up_to..]);
        self.out.push('"');
        self
    }

    fn finish(mut self) -> Bytes {
        self.out.push_str("\n\n");
        Bytes::from(self.out)
    }
}

#[must_use]
pub fn message_start_frame(input_tokens: u64, output_tokens: u64) -> Bytes {
    FrameBuilder::new("message_start")
        .raw(
            "{\"type\":\"message_start\",\"message\":{\"id\":\"msg_proxy\",\"type\":\"message\",\
             \"role\":\"assistant\",\"content\":[],\"model\":\"proxy\",\"stop_reason\":null,\
             \"stop_sequence\":null,\"usage\":{\"input_tokens\":",
        )
        .number(input_tokens)
        .raw(",\"output_tokens\":")
        .number(output_tokens)
        .raw("}}}")
        .finish()
}

#[must_use]
pub fn text_block_start_frame(index: usize) -> Bytes {
    FrameBuilder::new("content_block_start")
        .raw("{\"type\":\"content_block_start\",\"index\":")
        .index(index)
        .raw(",\"content_block\":{\"type\":\"text\",\"text\":\"\"}}")
        .finish()
}

#[must_use]
pub fn thinking_block_start_frame(index: usize) -> Bytes {
    FrameBuilder::new("content_block_start")
        .raw("{\"type\":\"content_block_start\",\"index\":")
        .index(index)
        .raw(",\"content_block\":{\"type\":\"thinking\",\"thinking\":\"\"}}")
        .finish()
}

#[must_use]
pub fn tool_use_block_start_frame(index: usize, id: &str, name: &str) -> Bytes {
    FrameBuilder::new("content_block_start")
        .raw("{\"type\":\"content_block_start\",\"index\":")
        .index(index)
        .raw(",\"content_block\":{\"type\":\"tool_use\",\"id\":")
        .quoted(id)
        .raw(",\"name\":")
        .quoted(name)
        .raw("}}")
        .finish()
}

#[must_use]
pub fn text_delta_frame(index: usize, text: &str) -> Bytes {
    FrameBuilder::new("content_block_delta")
        .raw("{\"type\":\"content_block_delta\",\"index\":")
        .index(index)
        .raw(",\"delta\":{\"type\":\"text_delta\",\"text\":")
        .quoted(text)
        .raw("}}")
        .finish()
}

#[must_use]
pub fn thinking_delta_frame(index: usize, thinking: &str) -> Bytes {
    FrameBuilder::new("content_block_delta")
        .raw("{\"type\":\"content_block_delta\",\"index\":")
        .index(index)
        .raw(",\"delta\":{\"type\":\"thinking_delta\",\"thinking\":")
        .quoted(thinking)
        .raw("}}")
        .finish()
}

#[must_use]
pub fn input_json_delta_frame(index: usize, partial_json: &str) -> Bytes {
    FrameBuilder::new("content_block_delta")
        .raw("{\"type\":\"content_block_delta\",\"index\":")
        .index(index)
        .raw(",\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":")
        .quoted(partial_json)
        .raw("}}")
        .finish()
}

#[must_use]
pub fn block_stop_frame(index: usize) -> Bytes {
    FrameBuilder::new("content_block_stop")
        .raw("{\"type\":\"content_block_stop\",\"index\":")
        .index(index)
        .raw("}")
        .finish()
}

#[must_use]
pub fn message_delta_frame(stop_reason: &str, output_tokens: u64) -> Bytes {
    FrameBuilder::new("message_delta")
        .raw("{\"type\":\"message_delta\",\"delta\":{\"stop_reason\":")
        .quoted(stop_reason)
        .raw(",\"stop_sequence\":null},\"usage\":{\"output_tokens\":")
        .number(output_tokens)
        .raw("}}")
        .finish()
}

#[must_use]
pub fn message_stop_frame() -> Bytes {
    Bytes::from_static(b"event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n")
}
