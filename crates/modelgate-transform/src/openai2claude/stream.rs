use std::collections::BTreeMap;

use modelgate_protocol::claude::stream::{
    ContentBlockDelta, MessageDeltaBody, StreamEvent, StreamMessage, StreamUsage,
};
use modelgate_protocol::claude::types::{
    ContentBlock as ClaudeContentBlock, MessageType, ResponseRole, StopReason,
};
use modelgate_protocol::openai::stream::{ChatCompletionChunk, ToolCallChunk};
use modelgate_protocol::openai::types::CompletionUsage;

use crate::openai2claude::response::map_finish_reason;

/// A tool call being assembled from streamed fragments. Nothing is emitted
/// until the call is complete; the client then sees exactly one tool-use
/// block.
#[derive(Debug, Clone, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Stateful converter from Chat Completions stream chunks to Messages stream
/// events. Events must be applied in upstream order; tool-call argument
/// fragments accumulate in the state between chunks.
#[derive(Debug)]
pub struct OpenAiToClaudeStream {
    id: String,
    model: String,
    message_started: bool,
    finish_emitted: bool,
    pending_stop: Option<StopReason>,
    next_block_index: u32,
    text_block: Option<u32>,
    tool_calls: BTreeMap<i64, PendingToolCall>,
    last_usage: Option<StreamUsage>,
}

impl OpenAiToClaudeStream {
    pub fn new() -> Self {
        Self {
            id: "unknown".to_string(),
            model: "unknown".to_string(),
            message_started: false,
            finish_emitted: false,
            pending_stop: None,
            next_block_index: 0,
            text_block: None,
            tool_calls: BTreeMap::new(),
            last_usage: None,
        }
    }

    pub fn apply_chunk(&mut self, chunk: ChatCompletionChunk) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.message_started {
            self.id = chunk.id.clone();
            self.model = chunk.model.clone();
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.id.clone(),
                    r#type: MessageType::Message,
                    role: ResponseRole::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: StreamUsage::default(),
                },
            });
        }

        let choice = chunk.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|choice| choice.finish_reason);

        if let Some(choice) = choice {
            if let Some(text) = choice.delta.content
                && !text.is_empty()
            {
                events.extend(self.emit_text(text));
            }
            for call in choice.delta.tool_calls.unwrap_or_default() {
                self.absorb_tool_fragment(call);
            }
        }

        if finish_reason.is_some() && !self.finish_emitted {
            events.extend(self.close_open_blocks());
            self.pending_stop = Some(map_finish_reason(finish_reason));
        }

        if let Some(usage) = chunk.usage {
            let usage = map_usage(&usage);
            self.last_usage = Some(usage.clone());
            if let Some(stop) = self.pending_stop.take() {
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: Some(stop),
                        stop_sequence: None,
                    },
                    usage,
                });
                events.push(StreamEvent::MessageStop);
                self.finish_emitted = true;
            } else {
                events.push(StreamEvent::MessageDelta {
                    delta: MessageDeltaBody {
                        stop_reason: None,
                        stop_sequence: None,
                    },
                    usage,
                });
            }
        }

        events
    }

    /// Close the stream. Emits whatever terminal events the chunks so far did
    /// not produce, so an abruptly ended upstream still yields a well-formed
    /// Messages stream.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finish_emitted {
            return Vec::new();
        }
        let mut events = Vec::new();
        if !self.message_started {
            self.message_started = true;
            events.push(StreamEvent::MessageStart {
                message: StreamMessage {
                    id: self.id.clone(),
                    r#type: MessageType::Message,
                    role: ResponseRole::Assistant,
                    model: self.model.clone(),
                    content: Vec::new(),
                    stop_reason: None,
                    stop_sequence: None,
                    usage: StreamUsage::default(),
                },
            });
        }
        events.extend(self.close_open_blocks());
        let stop = self.pending_stop.take().unwrap_or(StopReason::EndTurn);
        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop),
                stop_sequence: None,
            },
            usage: self.last_usage.clone().unwrap_or_default(),
        });
        events.push(StreamEvent::MessageStop);
        self.finish_emitted = true;
        events
    }

    fn emit_text(&mut self, text: String) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        let index = match self.text_block {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.text_block = Some(index);
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ClaudeContentBlock::Text {
                        text: String::new(),
                    },
                });
                index
            }
        };
        events.push(StreamEvent::ContentBlockDelta {
            index,
            delta: ContentBlockDelta::TextDelta { text },
        });
        events
    }

    fn absorb_tool_fragment(&mut self, call: ToolCallChunk) {
        let pending = self.tool_calls.entry(call.index).or_default();
        if let Some(id) = call.id {
            pending.id = Some(id);
        }
        if let Some(function) = call.function {
            if let Some(name) = function.name {
                pending.name = Some(name);
            }
            if let Some(arguments) = function.arguments {
                pending.arguments.push_str(&arguments);
            }
        }
    }

    fn close_open_blocks(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(index) = self.text_block.take() {
            events.push(StreamEvent::ContentBlockStop { index });
        }
        for (call_index, pending) in std::mem::take(&mut self.tool_calls) {
            let index = self.next_block_index;
            self.next_block_index += 1;
            events.push(StreamEvent::ContentBlockStart {
                index,
                content_block: ClaudeContentBlock::ToolUse {
                    id: pending
                        .id
                        .unwrap_or_else(|| format!("toolcall-{call_index}")),
                    name: pending.name.unwrap_or_else(|| "tool".to_string()),
                    input: serde_json::from_str(&pending.arguments).unwrap_or_default(),
                },
            });
            events.push(StreamEvent::ContentBlockStop { index });
        }
        events
    }
}

impl Default for OpenAiToClaudeStream {
    fn default() -> Self {
        Self::new()
    }
}

fn map_usage(usage: &CompletionUsage) -> StreamUsage {
    StreamUsage {
        input_tokens: Some(usage.prompt_tokens),
        output_tokens: Some(usage.completion_tokens),
        cache_creation_input_tokens: Some(0),
        cache_read_input_tokens: Some(usage.prompt_tokens_details.cached_tokens),
    }
}
