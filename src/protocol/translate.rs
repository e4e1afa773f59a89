use crate::protocol::anthropic::{
    CompleteRequest, ContentBlock, MessagesRequest, ToolDefinition,
};
use crate::protocol::openai::{
    ChatMessage, ChatRequest, ContentPart, FunctionSpec, ImageUrl, MessageContent, ToolCall,
    ToolCallFunction, ToolSpec,
};

/// Translate an Anthropic messages request into the OpenAI chat request
/// sent upstream.
#[must_use]
pub fn build_chat_request(request: &MessagesRequest, target_model: &str) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = request.system.as_ref() {
        let text = flatten_system(system);
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for envelope in &request.messages {
        let parts = normalize_content(&envelope.content);
        let role = if envelope.role.is_empty() {
            "user"
        } else {
            envelope.role.as_str()
        };

        match role {
            "user" => translate_user_message(parts, &mut messages),
            "assistant" => translate_assistant_message(parts, &mut messages),
            "system" => {
                let text = concat_text_parts(&parts);
                if !text.is_empty() {
                    messages.push(ChatMessage::text("system", text));
                }
            }
            other => {
                messages.push(ChatMessage::text(other, concat_text_parts(&parts)));
            }
        }
    }

    let max_tokens = coerce_i64(request.max_tokens.as_ref());
    let temperature = coerce_f64(request.temperature.as_ref());

    ChatRequest {
        model: target_model.to_string(),
        messages,
        stream: request.stream,
        max_tokens: (max_tokens > 0).then_some(max_tokens),
        temperature: (temperature > 0.0).then_some(temperature),
        stop_sequences: request
            .stop_sequences
            .clone()
            .filter(|v| !v.is_null()),
        tools: build_tools(&request.tools),
        tool_choice: request
            .tool_choice
            .as_ref()
            .and_then(normalize_tool_choice),
    }
}

/// Translate a legacy `/v1/complete` request into a single-user-message
/// chat request.
#[must_use]
pub fn build_complete_chat_request(request: &CompleteRequest, target_model: &str) -> ChatRequest {
    ChatRequest {
        model: target_model.to_string(),
        messages: vec![ChatMessage::text("user", request.prompt.clone())],
        stream: request.stream,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature.filter(|t| *t > 0.0),
        stop_sequences: None,
        tools: None,
        tool_choice: None,
    }
}

// ---------------------------------------------------------------------------
// Content normalization
// ---------------------------------------------------------------------------

/// Normalize a message `content` value into content blocks.
///
/// Strings wrap into a single text block; arrays decode per element with
/// unrecognized block shapes skipped; anything else degrades to one
/// empty text block.
fn normalize_content(content: &serde_json::Value) -> Vec<ContentBlock> {
    match content {
        serde_json::Value::String(s) => vec![ContentBlock::Text { text: s.clone() }],
        serde_json::Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value(item.clone()).ok())
            .collect(),
        _ => vec![ContentBlock::Text {
            text: String::new(),
        }],
    }
}

fn concat_text_parts(parts: &[ContentBlock]) -> String {
    let mut out = String::new();
    for part in parts {
        if let ContentBlock::Text { text } = part {
            out.push_str(text);
        }
    }
    out
}

/// Flatten the `system` field (string or content-part array) into one
/// string.
fn flatten_system(system: &serde_json::Value) -> String {
    match system {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(_) => concat_text_parts(&normalize_content(system)),
        _ => String::new(),
    }
}

fn translate_user_message(parts: Vec<ContentBlock>, messages: &mut Vec<ChatMessage>) {
    let had_parts = !parts.is_empty();
    let mut oa_parts: Vec<ContentPart> = Vec::new();

    for part in parts {
        match part {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    oa_parts.push(ContentPart::Text { text });
                }
            }
            ContentBlock::Image { source } => {
                if source.source_type == "base64" {
                    oa_parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: format!(
                                "data:{};base64,{}",
                                source.media_type, source.data
                            ),
                        },
                    });
                }
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: MessageContent::Text(tool_result_text(&content)),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id),
                });
            }
            // tool_use and thinking blocks have no user-role meaning.
            ContentBlock::ToolUse { .. } | ContentBlock::Thinking { .. } => {}
        }
    }

    if !oa_parts.is_empty() {
        let content = match oa_parts.as_slice() {
            [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
            _ => MessageContent::Parts(oa_parts),
        };
        messages.push(ChatMessage {
            role: "user".to_string(),
            content,
            tool_calls: None,
            tool_call_id: None,
        });
    } else if !had_parts {
        messages.push(ChatMessage::text("user", ""));
    }
}

fn translate_assistant_message(parts: Vec<ContentBlock>, messages: &mut Vec<ChatMessage>) {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        match part {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    type_: "function".to_string(),
                    function: ToolCallFunction {
                        name,
                        arguments: serde_json::to_string(&input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            _ => {}
        }
    }

    messages.push(ChatMessage {
        role: "assistant".to_string(),
        content: MessageContent::Text(text),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    });
}

/// Extract the textual payload of a `tool_result` content value: the
/// inner string when it is one, the raw JSON serialization otherwise.
fn tool_result_text(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

fn build_tools(tools: &[ToolDefinition]) -> Option<Vec<ToolSpec>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|tool| ToolSpec {
                type_: "function".to_string(),
                function: FunctionSpec {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.input_schema.clone(),
                },
            })
            .collect(),
    )
}

/// Normalize an Anthropic `tool_choice` into the OpenAI form.
///
/// Mode names map through with `any → required`; the targeted forms
/// `{type:"tool", name}` and `{type:"function", function:{name}}` both
/// become `{type:"function", function:{name}}`. Unknown shapes are
/// preserved untouched.
fn normalize_tool_choice(choice: &serde_json::Value) -> Option<serde_json::Value> {
    match choice {
        serde_json::Value::Null => None,
        serde_json::Value::String(mode) => Some(serde_json::Value::String(
            normalize_mode(mode).to_string(),
        )),
        serde_json::Value::Object(obj) => {
            let type_ = obj.get("type").and_then(|v| v.as_str()).unwrap_or("");
            match type_ {
                "auto" | "none" | "required" | "any" => Some(serde_json::Value::String(
                    normalize_mode(type_).to_string(),
                )),
                "tool" => {
                    let name = obj.get("name").and_then(|v| v.as_str()).unwrap_or("");
                    Some(function_choice(name))
                }
                "function" => {
                    let name = obj
                        .get("function")
                        .and_then(|f| f.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("");
                    Some(function_choice(name))
                }
                _ => Some(choice.clone()),
            }
        }
        other => Some(other.clone()),
    }
}

fn normalize_mode(mode: &str) -> &str {
    if mode == "any" {
        "required"
    } else {
        mode
    }
}

fn function_choice(name: &str) -> serde_json::Value {
    serde_json::json!({"type": "function", "function": {"name": name}})
}

// ---------------------------------------------------------------------------
// Numeric coercion
// ---------------------------------------------------------------------------

/// Coerce a number-or-numeric-string value to `i64`; non-parseable
/// values count as absent (0).
fn coerce_i64(value: Option<&serde_json::Value>) -> i64 {
    match value {
        Some(serde_json::Value::Number(n)) => {
            n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0)
        }
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn coerce_f64(value: Option<&serde_json::Value>) -> f64 {
    match value {
        Some(serde_json::Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_from(value: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_simple_text_message() {
        let request = request_from(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.model, "m");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, "user");
        assert!(matches!(&chat.messages[0].content, MessageContent::Text(t) if t == "hi"));
        assert_eq!(chat.max_tokens, Some(100));
        assert!(!chat.stream);
    }

    #[test]
    fn test_system_string_becomes_first_message() {
        let request = request_from(json!({
            "system": "be brief",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.messages[0].role, "system");
        assert!(matches!(&chat.messages[0].content, MessageContent::Text(t) if t == "be brief"));
    }

    #[test]
    fn test_system_parts_are_flattened() {
        let request = request_from(json!({
            "system": [
                {"type": "text", "text": "one "},
                {"type": "text", "text": "two"}
            ],
            "messages": []
        }));
        let chat = build_chat_request(&request, "m");
        assert!(matches!(&chat.messages[0].content, MessageContent::Text(t) if t == "one two"));
    }

    #[test]
    fn test_empty_system_is_dropped() {
        let request = request_from(json!({"system": "", "messages": []}));
        let chat = build_chat_request(&request, "m");
        assert!(chat.messages.is_empty());
    }

    #[test]
    fn test_user_image_becomes_data_url() {
        let request = request_from(json!({
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "look"},
                {"type": "image", "source": {"type": "base64", "media_type": "image/png", "data": "AAAA"}}
            ]}]
        }));
        let chat = build_chat_request(&request, "m");
        let MessageContent::Parts(parts) = &chat.messages[0].content else {
            panic!("expected multi-part content");
        };
        assert_eq!(parts.len(), 2);
        let ContentPart::ImageUrl { image_url } = &parts[1] else {
            panic!("expected image part");
        };
        assert_eq!(image_url.url, "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_single_text_part_collapses_to_string() {
        let request = request_from(json!({
            "messages": [{"role": "user", "content": [{"type": "text", "text": "solo"}]}]
        }));
        let chat = build_chat_request(&request, "m");
        assert!(matches!(&chat.messages[0].content, MessageContent::Text(t) if t == "solo"));
    }

    #[test]
    fn test_tool_result_becomes_tool_message() {
        let request = request_from(json!({
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "call_9", "content": "72F"}
            ]}]
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, "tool");
        assert_eq!(chat.messages[0].tool_call_id.as_deref(), Some("call_9"));
        assert!(matches!(&chat.messages[0].content, MessageContent::Text(t) if t == "72F"));
    }

    #[test]
    fn test_tool_result_non_string_content_serialized_raw() {
        let request = request_from(json!({
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "call_9", "content": [{"type": "text", "text": "x"}]}
            ]}]
        }));
        let chat = build_chat_request(&request, "m");
        let MessageContent::Text(text) = &chat.messages[0].content else {
            panic!("expected text content");
        };
        let parsed: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed[0]["text"], "x");
    }

    #[test]
    fn test_empty_message_yields_empty_user_content() {
        let request = request_from(json!({
            "messages": [{"role": "user", "content": []}]
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.messages.len(), 1);
        assert!(matches!(&chat.messages[0].content, MessageContent::Text(t) if t.is_empty()));
    }

    #[test]
    fn test_assistant_tool_use_becomes_tool_calls() {
        let request = request_from(json!({
            "messages": [{"role": "assistant", "content": [
                {"type": "text", "text": "calling"},
                {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"city": "SF"}}
            ]}]
        }));
        let chat = build_chat_request(&request, "m");
        let message = &chat.messages[0];
        assert_eq!(message.role, "assistant");
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].type_, "function");
        assert_eq!(calls[0].function.name, "get_weather");
        let args: serde_json::Value =
            serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "SF");
    }

    #[test]
    fn test_unknown_role_preserved_verbatim() {
        let request = request_from(json!({
            "messages": [{"role": "critic", "content": "meh"}]
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.messages[0].role, "critic");
    }

    #[test]
    fn test_tools_converted_to_function_specs() {
        let request = request_from(json!({
            "messages": [],
            "tools": [{"name": "f", "description": "d", "input_schema": {"type": "object"}}]
        }));
        let chat = build_chat_request(&request, "m");
        let tools = chat.tools.unwrap();
        assert_eq!(tools[0].type_, "function");
        assert_eq!(tools[0].function.name, "f");
        assert_eq!(tools[0].function.parameters["type"], "object");
    }

    #[test]
    fn test_tool_choice_any_becomes_required() {
        let request = request_from(json!({
            "messages": [],
            "tool_choice": {"type": "any"}
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.tool_choice, Some(json!("required")));
    }

    #[test]
    fn test_tool_choice_tool_maps_to_function_form() {
        let request = request_from(json!({
            "messages": [],
            "tool_choice": {"type": "tool", "name": "f"}
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(
            chat.tool_choice,
            Some(json!({"type": "function", "function": {"name": "f"}}))
        );
    }

    #[test]
    fn test_tool_choice_modes_pass_through() {
        for mode in ["auto", "none", "required"] {
            let request = request_from(json!({
                "messages": [],
                "tool_choice": mode
            }));
            let chat = build_chat_request(&request, "m");
            assert_eq!(chat.tool_choice, Some(json!(mode)));
        }
    }

    #[test]
    fn test_tool_choice_unknown_shape_preserved() {
        let shape = json!({"type": "exotic", "weight": 3});
        let request = request_from(json!({
            "messages": [],
            "tool_choice": shape.clone()
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.tool_choice, Some(shape));
    }

    #[test]
    fn test_numeric_string_coercion() {
        let request = request_from(json!({
            "messages": [],
            "max_tokens": "2048",
            "temperature": "0.7"
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.max_tokens, Some(2048));
        assert_eq!(chat.temperature, Some(0.7));
    }

    #[test]
    fn test_non_parseable_numbers_treated_absent() {
        let request = request_from(json!({
            "messages": [],
            "max_tokens": "lots",
            "temperature": {"nested": true}
        }));
        let chat = build_chat_request(&request, "m");
        assert!(chat.max_tokens.is_none());
        assert!(chat.temperature.is_none());
    }

    #[test]
    fn test_zero_values_not_attached() {
        let request = request_from(json!({
            "messages": [],
            "max_tokens": 0,
            "temperature": 0.0
        }));
        let chat = build_chat_request(&request, "m");
        assert!(chat.max_tokens.is_none());
        assert!(chat.temperature.is_none());
    }

    #[test]
    fn test_stop_sequences_attached_when_present() {
        let request = request_from(json!({
            "messages": [],
            "stop_sequences": ["END"]
        }));
        let chat = build_chat_request(&request, "m");
        assert_eq!(chat.stop_sequences, Some(json!(["END"])));

        let request = request_from(json!({"messages": [], "stop_sequences": null}));
        let chat = build_chat_request(&request, "m");
        assert!(chat.stop_sequences.is_none());
    }

    #[test]
    fn test_complete_request_maps_to_single_user_message() {
        let request: CompleteRequest = serde_json::from_value(json!({
            "prompt": "Human: hi\n\nAssistant:",
            "max_tokens_to_sample": 256,
            "temperature": 0.5,
            "stream": true
        }))
        .unwrap();
        let chat = build_complete_chat_request(&request, "default-model");
        assert_eq!(chat.model, "default-model");
        assert!(chat.stream);
        assert_eq!(chat.max_tokens, Some(256));
        assert_eq!(chat.temperature, Some(0.5));
        assert_eq!(chat.messages.len(), 1);
        assert!(
            matches!(&chat.messages[0].content, MessageContent::Text(t) if t.starts_with("Human:"))
        );
    }
}
