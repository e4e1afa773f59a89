use crate::error::ProxyError;
use crate::protocol::anthropic::{
    ContentBlock, MessageResponse, Usage, STOP_END_TURN, STOP_TOOL_USE,
};
use crate::protocol::openai::{ChatResponse, ResponseFunction};
use crate::protocol::think::split_think_blocks;

/// Assemble an Anthropic message from a non-streaming upstream chat
/// response.
///
/// Block order: reasoning first, then the text content split on inline
/// `<think>…</think>` spans, then one `tool_use` block per tool call.
/// A response with nothing to show still carries one empty text block.
///
/// # Errors
///
/// Returns [`ProxyError::UpstreamDecode`] when the response carries no
/// choices.
pub fn assemble_message(response: &ChatResponse) -> Result<MessageResponse, ProxyError> {
    let choice = response
        .choices
        .first()
        .ok_or_else(|| ProxyError::UpstreamDecode("empty choices".to_string()))?;

    let mut blocks = Vec::new();

    if let Some(reasoning) = choice.message.reasoning_content.as_deref() {
        if !reasoning.is_empty() {
            blocks.push(ContentBlock::Thinking {
                thinking: reasoning.to_string(),
            });
        }
    }

    if let Some(content) = choice.message.content.as_deref() {
        blocks.extend(split_think_blocks(content));
    }

    for tool_call in &choice.message.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: tool_call.id.clone(),
            name: tool_call.function.name.clone(),
            input: tool_call_input(&tool_call.function),
        });
    }

    if blocks.is_empty() {
        blocks.push(ContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = if choice.finish_reason.as_deref() == Some("tool_calls") {
        STOP_TOOL_USE
    } else {
        STOP_END_TURN
    };

    Ok(MessageResponse {
        id: format!("msg_{}", response.id),
        type_: "message",
        role: "assistant",
        model: response.model.clone(),
        content: blocks,
        stop_reason,
        stop_sequence: None,
        usage: Usage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        },
    })
}

/// Resolve the tool-call input: stringified `arguments` when present,
/// raw `parameters` JSON otherwise, `{}` when both are empty.
fn tool_call_input(function: &ResponseFunction) -> serde_json::Value {
    if let Some(arguments) = function.arguments.as_deref() {
        if !arguments.is_empty() {
            return serde_json::from_str(arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
        }
    }
    function
        .parameters
        .clone()
        .unwrap_or_else(|| serde_json::json!({}))
}
