use std::collections::BTreeMap;

use modelgate_protocol::claude::stream::{ContentBlockDelta, StreamEvent, StreamUsage};
use modelgate_protocol::claude::types::ContentBlock as ClaudeContentBlock;
use modelgate_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkObject, FunctionCallDelta, ToolCallChunk,
};
use modelgate_protocol::openai::types::{
    CompletionUsage, FinishReason, PromptTokensDetails, ResponseRole, ToolCallType,
};

use crate::claude2openai::response::map_stop_reason;

#[derive(Debug)]
enum BlockState {
    Text,
    /// Tool-use block with its argument JSON accumulating across deltas.
    Tool {
        id: String,
        name: String,
        arguments: String,
        call_index: i64,
        emitted: bool,
    },
}

/// Stateful converter from Messages stream events to Chat Completions stream
/// chunks. Partial tool-call JSON accumulates until the block stops; the
/// client then sees exactly one complete tool-call chunk.
#[derive(Debug)]
pub struct ClaudeToOpenAiStream {
    id: String,
    model: String,
    created: i64,
    finish_sent: bool,
    prompt_tokens: u32,
    cached_tokens: u32,
    completion_tokens: u32,
    blocks: BTreeMap<u32, BlockState>,
    next_call_index: i64,
}

impl ClaudeToOpenAiStream {
    /// `created` is the epoch-seconds stamp carried on every chunk; the
    /// caller supplies it so this state machine stays clock-free.
    pub fn new(created: i64) -> Self {
        Self {
            id: "unknown".to_string(),
            model: "unknown".to_string(),
            created,
            finish_sent: false,
            prompt_tokens: 0,
            cached_tokens: 0,
            completion_tokens: 0,
            blocks: BTreeMap::new(),
            next_call_index: 0,
        }
    }

    pub fn apply_event(&mut self, event: StreamEvent) -> Vec<ChatCompletionChunk> {
        match event {
            StreamEvent::MessageStart { message } => {
                self.id = message.id;
                self.model = message.model;
                self.absorb_usage(&message.usage);
                vec![self.chunk(
                    ChunkDelta {
                        role: Some(ResponseRole::Assistant),
                        content: None,
                        tool_calls: None,
                    },
                    None,
                    None,
                )]
            }
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => self.start_block(index, content_block),
            StreamEvent::ContentBlockDelta { index, delta } => self.apply_delta(index, delta),
            StreamEvent::ContentBlockStop { index } => self.stop_block(index),
            StreamEvent::MessageDelta { delta, usage } => {
                self.absorb_usage(&usage);
                let mut chunks = self.flush_tool_blocks();
                let finish = delta.stop_reason.map(|reason| map_stop_reason(Some(reason)));
                if let Some(finish) = finish {
                    chunks.push(self.chunk(ChunkDelta::default(), Some(finish), Some(self.usage())));
                    self.finish_sent = true;
                }
                chunks
            }
            StreamEvent::MessageStop | StreamEvent::Ping | StreamEvent::Error { .. } => Vec::new(),
        }
    }

    /// Close the stream, emitting the terminal chunk if the upstream never
    /// delivered a stop reason.
    pub fn finish(&mut self) -> Vec<ChatCompletionChunk> {
        if self.finish_sent {
            return Vec::new();
        }
        let mut chunks = self.flush_tool_blocks();
        chunks.push(self.chunk(
            ChunkDelta::default(),
            Some(FinishReason::Stop),
            Some(self.usage()),
        ));
        self.finish_sent = true;
        chunks
    }

    fn start_block(
        &mut self,
        index: u32,
        content_block: ClaudeContentBlock,
    ) -> Vec<ChatCompletionChunk> {
        match content_block {
            ClaudeContentBlock::Text { text } | ClaudeContentBlock::Thinking { thinking: text, .. } => {
                self.blocks.insert(index, BlockState::Text);
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![self.content_chunk(text)]
                }
            }
            ClaudeContentBlock::ToolUse { id, name, input } => {
                let call_index = self.next_call_index;
                self.next_call_index += 1;
                // A non-empty input at block start means the upstream sent the
                // complete call up front; keep it as the accumulated JSON.
                let arguments = if input.is_empty() {
                    String::new()
                } else {
                    serde_json::to_string(&input).unwrap_or_default()
                };
                self.blocks.insert(
                    index,
                    BlockState::Tool {
                        id,
                        name,
                        arguments,
                        call_index,
                        emitted: false,
                    },
                );
                Vec::new()
            }
        }
    }

    fn apply_delta(&mut self, index: u32, delta: ContentBlockDelta) -> Vec<ChatCompletionChunk> {
        match delta {
            ContentBlockDelta::TextDelta { text } | ContentBlockDelta::ThinkingDelta { thinking: text } => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![self.content_chunk(text)]
                }
            }
            ContentBlockDelta::InputJsonDelta { partial_json } => {
                if let Some(BlockState::Tool { arguments, .. }) = self.blocks.get_mut(&index) {
                    arguments.push_str(&partial_json);
                }
                Vec::new()
            }
            ContentBlockDelta::SignatureDelta { .. } => Vec::new(),
        }
    }

    fn stop_block(&mut self, index: u32) -> Vec<ChatCompletionChunk> {
        let Some(state) = self.blocks.get_mut(&index) else {
            return Vec::new();
        };
        match state {
            BlockState::Text => Vec::new(),
            BlockState::Tool {
                id,
                name,
                arguments,
                call_index,
                emitted,
            } => {
                if *emitted {
                    return Vec::new();
                }
                *emitted = true;
                let call = complete_tool_call(id, name, arguments, *call_index);
                vec![self.chunk(
                    ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![call]),
                    },
                    None,
                    None,
                )]
            }
        }
    }

    fn flush_tool_blocks(&mut self) -> Vec<ChatCompletionChunk> {
        let mut calls = Vec::new();
        for state in self.blocks.values_mut() {
            if let BlockState::Tool {
                id,
                name,
                arguments,
                call_index,
                emitted,
            } = state
                && !*emitted
            {
                *emitted = true;
                calls.push(complete_tool_call(id, name, arguments, *call_index));
            }
        }
        calls
            .into_iter()
            .map(|call| {
                self.chunk(
                    ChunkDelta {
                        role: None,
                        content: None,
                        tool_calls: Some(vec![call]),
                    },
                    None,
                    None,
                )
            })
            .collect()
    }

    fn absorb_usage(&mut self, usage: &StreamUsage) {
        if let Some(input) = usage.input_tokens {
            self.prompt_tokens = input;
        }
        if let Some(cached) = usage.cache_read_input_tokens {
            self.cached_tokens = cached;
        }
        if let Some(output) = usage.output_tokens {
            self.completion_tokens = output;
        }
    }

    fn usage(&self) -> CompletionUsage {
        CompletionUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.prompt_tokens + self.completion_tokens,
            prompt_tokens_details: PromptTokensDetails {
                cached_tokens: self.cached_tokens,
            },
        }
    }

    fn content_chunk(&self, text: String) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                role: None,
                content: Some(text),
                tool_calls: None,
            },
            None,
            None,
        )
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
        usage: Option<CompletionUsage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: ChunkObject::ChatCompletionChunk,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage,
        }
    }
}

fn complete_tool_call(id: &str, name: &str, arguments: &str, call_index: i64) -> ToolCallChunk {
    let arguments = if arguments.is_empty() {
        "{}".to_string()
    } else {
        arguments.to_string()
    };
    ToolCallChunk {
        index: call_index,
        id: Some(id.to_string()),
        r#type: Some(ToolCallType::Function),
        function: Some(FunctionCallDelta {
            name: Some(name.to_string()),
            arguments: Some(arguments),
        }),
    }
}
