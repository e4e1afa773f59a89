use bytes::Bytes;

use crate::protocol::anthropic::{
    block_stop_frame, input_json_delta_frame, message_delta_frame, message_start_frame,
    message_stop_frame, text_block_start_frame, text_delta_frame, thinking_block_start_frame,
    thinking_delta_frame, tool_use_block_start_frame, STOP_END_TURN, STOP_TOOL_USE,
};
use crate::protocol::openai::{StreamChunk, StreamToolCall};
use crate::protocol::think::{find_first_tag, safe_prefix_len, TagHit, THINK_CLOSE, THINK_OPEN};
use crate::stream::{data_line_payload, is_done_payload};

/// Kind of the currently open content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Thinking,
    Text,
    ToolUse,
}

/// Streaming translator from upstream chat chunks to the Anthropic
/// event sequence.
///
/// A reducer over `data:` lines: each call appends zero or more complete
/// SSE frames to the caller's buffer and mutates only its own state, so
/// the whole state machine is testable without a transport. One
/// instance serves exactly one response stream.
///
/// Event guarantees: at most one block open at a time, every
/// `content_block_start` paired with one `content_block_stop`, block
/// indices dense and increasing, `message_start` before any block
/// event, `message_delta` + `message_stop` as the final two frames.
pub struct StreamTranslator {
    started_message: bool,
    open_kind: Option<BlockKind>,
    current_index: usize,
    any_block_opened: bool,
    /// Pending content bytes still being scanned for `<think>` tags.
    content_buffer: String,
    current_tool_index: Option<u32>,
    has_tool_use: bool,
    input_tokens: u64,
    output_tokens: u64,
    finished: bool,
}

impl StreamTranslator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_message: false,
            open_kind: None,
            current_index: 0,
            any_block_opened: false,
            content_buffer: String::new(),
            current_tool_index: None,
            has_tool_use: false,
            input_tokens: 0,
            output_tokens: 0,
            finished: false,
        }
    }

    /// Whether the terminator has been processed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Process one upstream SSE line.
    ///
    /// Non-`data:` lines and unparseable payloads are skipped. Returns
    /// `true` once the `[DONE]` terminator has been handled and the
    /// trailer frames are in `out`.
    pub fn push_line(&mut self, line: &str, out: &mut Vec<Bytes>) -> bool {
        if self.finished {
            return true;
        }
        let Some(payload) = data_line_payload(line) else {
            return false;
        };
        if is_done_payload(payload) {
            self.finish(out);
            return true;
        }
        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => self.push_chunk(chunk, out),
            Err(err) => {
                tracing::debug!(error = %err, "skipping malformed upstream chunk");
            }
        }
        false
    }

    /// Process one parsed chunk: absorb usage, then run the reasoning,
    /// content, and tool-call passes in that fixed order.
    pub fn push_chunk(&mut self, chunk: StreamChunk, out: &mut Vec<Bytes>) {
        if let Some(usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };

        if !self.started_message {
            out.push(message_start_frame(self.input_tokens, self.output_tokens));
            self.started_message = true;
        }

        let delta = choice.delta;

        // 1. Reasoning: either vendor field, first non-empty wins.
        let reasoning = match delta.reasoning_content {
            Some(r) if !r.is_empty() => Some(r),
            _ => delta.reasoning.filter(|r| !r.is_empty()),
        };
        if let Some(reasoning) = reasoning {
            if self.open_kind != Some(BlockKind::Thinking) {
                self.close_block(out);
                self.open_thinking(out);
            }
            out.push(thinking_delta_frame(self.current_index, &reasoning));
        }

        // 2. Free text, scanned for inline think tags.
        if let Some(content) = delta.content {
            if !content.is_empty() {
                if self.open_kind == Some(BlockKind::ToolUse) {
                    self.close_block(out);
                }
                self.content_buffer.push_str(&content);
                self.drain_content_buffer(out);
            }
        }

        // 3. Tool-call fragments.
        for tool_call in delta.tool_calls {
            self.process_tool_call(tool_call, out);
        }
    }

    /// Handle the stream terminator: flush held-back text, close the
    /// open block, and emit the `message_delta` / `message_stop` trailer.
    pub fn finish(&mut self, out: &mut Vec<Bytes>) {
        if self.finished {
            return;
        }
        self.finished = true;

        let residual = std::mem::take(&mut self.content_buffer);
        self.emit(&residual, out);
        self.close_block(out);

        let stop_reason = if self.has_tool_use {
            STOP_TOOL_USE
        } else {
            STOP_END_TURN
        };
        out.push(message_delta_frame(stop_reason, self.output_tokens));
        out.push(message_stop_frame());
    }

    // -- internal transitions ----------------------------------------------

    fn next_index(&mut self) -> usize {
        if self.any_block_opened {
            self.current_index += 1;
        } else {
            self.any_block_opened = true;
            self.current_index = 0;
        }
        self.current_index
    }

    fn open_thinking(&mut self, out: &mut Vec<Bytes>) {
        let index = self.next_index();
        self.open_kind = Some(BlockKind::Thinking);
        out.push(thinking_block_start_frame(index));
    }

    fn open_text(&mut self, out: &mut Vec<Bytes>) {
        let index = self.next_index();
        self.open_kind = Some(BlockKind::Text);
        out.push(text_block_start_frame(index));
    }

    fn open_tool(&mut self, id: &str, name: &str, out: &mut Vec<Bytes>) {
        let index = self.next_index();
        self.open_kind = Some(BlockKind::ToolUse);
        out.push(tool_use_block_start_frame(index, id, name));
    }

    fn close_block(&mut self, out: &mut Vec<Bytes>) {
        if self.open_kind.take().is_some() {
            out.push(block_stop_frame(self.current_index));
        }
    }

    /// Emit a text fragment into the open block, opening a text block on
    /// demand when none is open. Empty fragments are never emitted.
    fn emit(&mut self, text: &str, out: &mut Vec<Bytes>) {
        if text.is_empty() {
            return;
        }
        if self.open_kind.is_none() {
            self.open_text(out);
        }
        match self.open_kind {
            Some(BlockKind::Thinking) => {
                out.push(thinking_delta_frame(self.current_index, text));
            }
            Some(BlockKind::Text) => {
                out.push(text_delta_frame(self.current_index, text));
            }
            // Free text never targets a tool block; the content pass
            // closes it before buffering.
            Some(BlockKind::ToolUse) | None => {}
        }
    }

    /// Scan the buffer for think tags, emitting all bytes that are safe
    /// to release and retaining any suffix that could still become a tag.
    fn drain_content_buffer(&mut self, out: &mut Vec<Bytes>) {
        loop {
            match find_first_tag(&self.content_buffer) {
                None => {
                    let cutoff = safe_prefix_len(&self.content_buffer);
                    if cutoff > 0 {
                        let safe: String = self.content_buffer.drain(..cutoff).collect();
                        self.emit(&safe, out);
                    }
                    return;
                }
                Some(TagHit::Open(pos)) => {
                    if pos > 0 {
                        let pre: String = self.content_buffer.drain(..pos).collect();
                        self.emit(&pre, out);
                    }
                    self.content_buffer.drain(..THINK_OPEN.len());
                    if self.open_kind == Some(BlockKind::Text) {
                        self.close_block(out);
                    }
                    if self.open_kind != Some(BlockKind::Thinking) {
                        self.open_thinking(out);
                    }
                }
                Some(TagHit::Close(pos)) => {
                    if pos > 0 {
                        let pre: String = self.content_buffer.drain(..pos).collect();
                        self.emit(&pre, out);
                    }
                    self.content_buffer.drain(..THINK_CLOSE.len());
                    if self.open_kind == Some(BlockKind::Thinking) {
                        self.close_block(out);
                    }
                    // No text block is pre-opened here: the next
                    // non-empty emission opens one on demand.
                }
            }
        }
    }

    fn process_tool_call(&mut self, tool_call: StreamToolCall, out: &mut Vec<Bytes>) {
        if matches!(
            self.open_kind,
            Some(BlockKind::Text) | Some(BlockKind::Thinking)
        ) {
            self.close_block(out);
        }

        let function = tool_call.function.unwrap_or_default();
        let id = tool_call.id.filter(|id| !id.is_empty());

        if self.current_tool_index != Some(tool_call.index) || id.is_some() {
            if self.open_kind == Some(BlockKind::ToolUse)
                && self.current_tool_index != Some(tool_call.index)
            {
                self.close_block(out);
            }

            if let Some(id) = id {
                // A repeated id for the tool whose block is already open
                // is a protocol error upstream; tolerate it without
                // reopening the block.
                let already_open = self.open_kind == Some(BlockKind::ToolUse)
                    && self.current_tool_index == Some(tool_call.index);
                if !already_open {
                    self.current_tool_index = Some(tool_call.index);
                    self.has_tool_use = true;
                    let name = function.name.as_deref().unwrap_or("");
                    self.open_tool(&id, name, out);
                }
            }
        }

        if let Some(arguments) = function.arguments.filter(|a| !a.is_empty()) {
            // Arguments normally target the open tool block; if the
            // stream delivered them out of order, fall back to the
            // current block index rather than dropping bytes.
            if self.any_block_opened {
                out.push(input_json_delta_frame(self.current_index, &arguments));
            }
        }
    }
}

impl Default for StreamTranslator {
    fn default() -> Self {
        Self::new()
    }
}
