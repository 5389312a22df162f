use serde_json::json;

use modelgate_protocol::claude::stream::{ContentBlockDelta, StreamEvent};
use modelgate_protocol::claude::types::{
    ContentBlock, ContentBlockParam, CreateMessageRequest, ImageSource, Message, MessageContent,
    MessageParam, MessageRole, MessageType, ResponseRole, StopReason, SystemParam, Tool,
    ToolChoice, ToolResultContent, Usage,
};
use modelgate_protocol::openai::stream::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, ChunkObject, FunctionCallDelta, ToolCallChunk,
};
use modelgate_protocol::openai::types::{
    ChatCompletionChoice, ChatCompletionObject, ChatCompletionResponse, CompletionUsage,
    FinishReason, FunctionCall, PromptTokensDetails, ResponseMessage,
    ResponseRole as OpenAiRole, ToolCall, ToolCallType,
};

use crate::claude2openai;
use crate::openai2claude;
use crate::claude2openai::stream::ClaudeToOpenAiStream;
use crate::openai2claude::stream::OpenAiToClaudeStream;

fn sample_claude_request() -> CreateMessageRequest {
    CreateMessageRequest {
        model: "fast".to_string(),
        max_tokens: 512,
        messages: vec![
            MessageParam {
                role: MessageRole::User,
                content: MessageContent::Blocks(vec![
                    ContentBlockParam::Text {
                        text: "describe this".to_string(),
                    },
                    ContentBlockParam::Image {
                        source: ImageSource::Url {
                            url: "https://example.test/cat.png".to_string(),
                        },
                    },
                ]),
            },
            MessageParam {
                role: MessageRole::Assistant,
                content: MessageContent::Blocks(vec![ContentBlockParam::ToolUse {
                    id: "toolu_1".to_string(),
                    name: "get_weather".to_string(),
                    input: [("city".to_string(), json!("Paris"))].into_iter().collect(),
                }]),
            },
            MessageParam {
                role: MessageRole::User,
                content: MessageContent::Blocks(vec![ContentBlockParam::ToolResult {
                    tool_use_id: "toolu_1".to_string(),
                    content: Some(ToolResultContent::Text("18C, sunny".to_string())),
                    is_error: None,
                }]),
            },
        ],
        system: Some(SystemParam::Text("be brief".to_string())),
        tools: Some(vec![Tool {
            name: "get_weather".to_string(),
            description: Some("look up weather".to_string()),
            input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        }]),
        tool_choice: Some(ToolChoice::Auto),
        temperature: Some(0.2),
        top_p: None,
        stop_sequences: Some(vec!["END".to_string()]),
        stream: None,
        metadata: None,
    }
}

#[test]
fn request_round_trip_preserves_structure() {
    let original = sample_claude_request();
    let openai = claude2openai::request::transform_request(original.clone());
    let back = openai2claude::request::transform_request(openai).unwrap();

    assert_eq!(back.max_tokens, original.max_tokens);
    assert_eq!(
        back.system,
        Some(SystemParam::Text("be brief".to_string()))
    );
    assert_eq!(back.stop_sequences, original.stop_sequences);
    assert_eq!(back.temperature, original.temperature);

    // Role sequence survives: user, assistant, user(tool result).
    let roles: Vec<MessageRole> = back.messages.iter().map(|message| message.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]
    );

    // The tool call keeps its id, name, and arguments.
    let MessageContent::Blocks(blocks) = &back.messages[1].content else {
        panic!("assistant content not blocks");
    };
    let ContentBlockParam::ToolUse { id, name, input } = &blocks[0] else {
        panic!("missing tool_use block");
    };
    assert_eq!(id, "toolu_1");
    assert_eq!(name, "get_weather");
    assert_eq!(input.get("city"), Some(&json!("Paris")));

    // The tool result keeps its linkage and payload.
    let MessageContent::Blocks(blocks) = &back.messages[2].content else {
        panic!("tool result content not blocks");
    };
    let ContentBlockParam::ToolResult {
        tool_use_id,
        content,
        ..
    } = &blocks[0]
    else {
        panic!("missing tool_result block");
    };
    assert_eq!(tool_use_id, "toolu_1");
    assert_eq!(
        content,
        &Some(ToolResultContent::Text("18C, sunny".to_string()))
    );

    // The image reference survives as a block.
    let MessageContent::Blocks(blocks) = &back.messages[0].content else {
        panic!("user content not blocks");
    };
    assert!(blocks.iter().any(|block| matches!(
        block,
        ContentBlockParam::Image {
            source: ImageSource::Url { url }
        } if url == "https://example.test/cat.png"
    )));

    // The tool schema passes through untouched.
    let tools = back.tools.unwrap();
    assert_eq!(tools[0].name, "get_weather");
    assert_eq!(
        tools[0].input_schema["properties"]["city"]["type"],
        json!("string")
    );
}

#[test]
fn base64_images_round_trip_through_data_urls() {
    let request = CreateMessageRequest {
        messages: vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![ContentBlockParam::Image {
                source: ImageSource::Base64 {
                    media_type: "image/png".to_string(),
                    data: "aGVsbG8=".to_string(),
                },
            }]),
        }],
        ..sample_claude_request()
    };
    let openai = claude2openai::request::transform_request(request);
    let back = openai2claude::request::transform_request(openai).unwrap();
    let MessageContent::Blocks(blocks) = &back.messages[0].content else {
        panic!("not blocks");
    };
    assert!(blocks.iter().any(|block| matches!(
        block,
        ContentBlockParam::Image {
            source: ImageSource::Base64 { media_type, data }
        } if media_type == "image/png" && data == "aGVsbG8="
    )));
}

#[test]
fn missing_max_tokens_is_a_conversion_error() {
    let request = modelgate_protocol::openai::types::ChatCompletionRequest {
        model: "m".to_string(),
        messages: Vec::new(),
        max_tokens: None,
        max_completion_tokens: None,
        temperature: None,
        top_p: None,
        stop: None,
        stream: None,
        stream_options: None,
        tools: None,
        tool_choice: None,
        parallel_tool_calls: None,
        user: None,
    };
    let err = openai2claude::request::transform_request(request).unwrap_err();
    assert_eq!(err.field(), "max_tokens");
}

fn openai_tool_response() -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: "chatcmpl-1".to_string(),
        object: ChatCompletionObject::ChatCompletion,
        created: 1700000000,
        model: "gpt-test".to_string(),
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ResponseMessage {
                role: OpenAiRole::Assistant,
                content: Some("checking".to_string()),
                tool_calls: Some(vec![ToolCall {
                    id: "call_1".to_string(),
                    r#type: ToolCallType::Function,
                    function: FunctionCall {
                        name: "get_weather".to_string(),
                        arguments: "{\"city\":\"Paris\"}".to_string(),
                    },
                }]),
            },
            finish_reason: Some(FinishReason::ToolCalls),
        }],
        usage: Some(CompletionUsage {
            prompt_tokens: 120,
            completion_tokens: 30,
            total_tokens: 150,
            prompt_tokens_details: PromptTokensDetails { cached_tokens: 80 },
        }),
    }
}

#[test]
fn response_round_trip_preserves_tools_stop_and_usage() {
    let upstream = openai_tool_response();
    let message = openai2claude::response::transform_response(upstream).unwrap();

    assert_eq!(message.stop_reason, Some(StopReason::ToolUse));
    assert_eq!(message.usage.input_tokens, 120);
    assert_eq!(message.usage.output_tokens, 30);
    assert_eq!(message.usage.cache_read_input_tokens, 80);
    // Absent in the source protocol, still present as zero.
    assert_eq!(message.usage.cache_creation_input_tokens, 0);

    let tool = message
        .content
        .iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
            _ => None,
        })
        .expect("tool_use block missing");
    assert_eq!(tool.0, "call_1");
    assert_eq!(tool.1, "get_weather");
    assert_eq!(tool.2.get("city"), Some(&json!("Paris")));

    // And back: the Chat Completions view keeps everything.
    let back = claude2openai::response::transform_response(message);
    let choice = &back.choices[0];
    assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
    let calls = choice.message.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.name, "get_weather");
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&calls[0].function.arguments).unwrap(),
        json!({"city": "Paris"})
    );
    let usage = back.usage.unwrap();
    assert_eq!(usage.prompt_tokens, 120);
    assert_eq!(usage.completion_tokens, 30);
    assert_eq!(usage.prompt_tokens_details.cached_tokens, 80);
}

#[test]
fn stop_reason_categories_map_both_ways() {
    let cases = [
        (StopReason::EndTurn, FinishReason::Stop),
        (StopReason::MaxTokens, FinishReason::Length),
        (StopReason::ToolUse, FinishReason::ToolCalls),
        (StopReason::Refusal, FinishReason::ContentFilter),
    ];
    for (stop, finish) in cases {
        let message = Message {
            id: "msg".to_string(),
            r#type: MessageType::Message,
            role: ResponseRole::Assistant,
            model: "m".to_string(),
            content: vec![ContentBlock::Text {
                text: "x".to_string(),
            }],
            stop_reason: Some(stop),
            stop_sequence: None,
            usage: Usage::default(),
        };
        let response = claude2openai::response::transform_response(message);
        assert_eq!(response.choices[0].finish_reason, Some(finish));
    }
}

fn openai_chunk(id: &str, delta: ChunkDelta, finish: Option<FinishReason>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: ChunkObject::ChatCompletionChunk,
        created: 0,
        model: "gpt-test".to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish,
        }],
        usage: None,
    }
}

fn tool_fragment(index: i64, id: Option<&str>, name: Option<&str>, args: &str) -> ChunkDelta {
    ChunkDelta {
        role: None,
        content: None,
        tool_calls: Some(vec![ToolCallChunk {
            index,
            id: id.map(str::to_string),
            r#type: id.map(|_| ToolCallType::Function),
            function: Some(FunctionCallDelta {
                name: name.map(str::to_string),
                arguments: Some(args.to_string()),
            }),
        }]),
    }
}

/// Fold Messages stream events back into (texts, tool calls, stop reason)
/// for comparison against the non-streamed conversion.
fn fold_claude_events(
    events: &[StreamEvent],
) -> (Vec<String>, Vec<(String, String, serde_json::Value)>, Option<StopReason>) {
    let mut texts: Vec<String> = Vec::new();
    let mut tools = Vec::new();
    let mut stop = None;
    let mut open_text: Option<String> = None;

    for event in events {
        match event {
            StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
                ContentBlock::Text { text } => open_text = Some(text.clone()),
                ContentBlock::ToolUse { id, name, input } => tools.push((
                    id.clone(),
                    name.clone(),
                    serde_json::to_value(input).unwrap(),
                )),
                ContentBlock::Thinking { .. } => {}
            },
            StreamEvent::ContentBlockDelta { delta, .. } => {
                if let ContentBlockDelta::TextDelta { text } = delta
                    && let Some(buffer) = open_text.as_mut()
                {
                    buffer.push_str(text);
                }
            }
            StreamEvent::ContentBlockStop { .. } => {
                if let Some(text) = open_text.take() {
                    texts.push(text);
                }
            }
            StreamEvent::MessageDelta { delta, .. } => {
                if delta.stop_reason.is_some() {
                    stop = delta.stop_reason;
                }
            }
            _ => {}
        }
    }
    if let Some(text) = open_text.take() {
        texts.push(text);
    }
    (texts, tools, stop)
}

#[test]
fn split_tool_call_yields_exactly_one_complete_event() {
    let mut state = OpenAiToClaudeStream::new();
    let mut events = Vec::new();

    // Chunk 1: text. Chunks 2 and 3: the tool call's JSON split mid-string.
    events.extend(state.apply_chunk(openai_chunk(
        "c1",
        ChunkDelta {
            role: None,
            content: Some("let me check".to_string()),
            tool_calls: None,
        },
        None,
    )));
    events.extend(state.apply_chunk(openai_chunk(
        "c1",
        tool_fragment(0, Some("call_9"), Some("get_weather"), "{\"ci"),
        None,
    )));
    events.extend(state.apply_chunk(openai_chunk(
        "c1",
        tool_fragment(0, None, None, "ty\":\"Paris\"}"),
        Some(FinishReason::ToolCalls),
    )));
    events.extend(state.finish());

    // No partial tool-call fragments reach the client.
    assert!(!events.iter().any(|event| matches!(
        event,
        StreamEvent::ContentBlockDelta {
            delta: ContentBlockDelta::InputJsonDelta { .. },
            ..
        }
    )));

    let tool_starts: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::ContentBlockStart {
                content_block: ContentBlock::ToolUse { id, name, input },
                ..
            } => Some((id.clone(), name.clone(), input.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(tool_starts.len(), 1, "expected exactly one tool-use event");
    let (id, name, input) = &tool_starts[0];
    assert_eq!(id, "call_9");
    assert_eq!(name, "get_weather");
    assert_eq!(input.get("city"), Some(&json!("Paris")));

    let (_, _, stop) = fold_claude_events(&events);
    assert_eq!(stop, Some(StopReason::ToolUse));
    assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
}

#[test]
fn streamed_and_full_conversion_agree() {
    // The same upstream content, once as a full response and once split into
    // arbitrary chunk boundaries.
    let full = openai_tool_response();
    let expected = openai2claude::response::transform_response(full).unwrap();

    let mut state = OpenAiToClaudeStream::new();
    let mut events = Vec::new();
    events.extend(state.apply_chunk(openai_chunk(
        "chatcmpl-1",
        ChunkDelta {
            role: Some(OpenAiRole::Assistant),
            content: Some("check".to_string()),
            tool_calls: None,
        },
        None,
    )));
    events.extend(state.apply_chunk(openai_chunk(
        "chatcmpl-1",
        ChunkDelta {
            role: None,
            content: Some("ing".to_string()),
            tool_calls: None,
        },
        None,
    )));
    events.extend(state.apply_chunk(openai_chunk(
        "chatcmpl-1",
        tool_fragment(0, Some("call_1"), Some("get_weather"), "{\"city\""),
        None,
    )));
    events.extend(state.apply_chunk(openai_chunk(
        "chatcmpl-1",
        tool_fragment(0, None, None, ":\"Paris\"}"),
        Some(FinishReason::ToolCalls),
    )));
    events.extend(state.finish());

    let (texts, tools, stop) = fold_claude_events(&events);
    assert_eq!(texts.join(""), "checking");
    assert_eq!(stop, expected.stop_reason);

    let expected_tool = expected
        .content
        .iter()
        .find_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => {
                Some((id.clone(), name.clone(), serde_json::to_value(input).unwrap()))
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(tools, vec![expected_tool]);
}

#[test]
fn abrupt_upstream_end_still_terminates_the_stream() {
    let mut state = OpenAiToClaudeStream::new();
    let mut events = state.apply_chunk(openai_chunk(
        "c1",
        ChunkDelta {
            role: None,
            content: Some("partial".to_string()),
            tool_calls: None,
        },
        None,
    ));
    // Upstream dies here; no finish_reason ever arrives.
    events.extend(state.finish());

    let closed: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::ContentBlockStop { .. }))
        .collect();
    assert_eq!(closed.len(), 1);
    assert!(events.iter().any(|event| matches!(
        event,
        StreamEvent::MessageDelta { delta, .. } if delta.stop_reason == Some(StopReason::EndTurn)
    )));
    assert!(matches!(events.last(), Some(StreamEvent::MessageStop)));
    // Finishing twice emits nothing further.
    assert!(state.finish().is_empty());
}

#[test]
fn claude_stream_to_openai_reconstructs_tool_call() {
    use modelgate_protocol::claude::stream::{MessageDeltaBody, StreamMessage, StreamUsage};

    let mut state = ClaudeToOpenAiStream::new(1700000000);
    let mut chunks = Vec::new();

    chunks.extend(state.apply_event(StreamEvent::MessageStart {
        message: StreamMessage {
            id: "msg_1".to_string(),
            r#type: MessageType::Message,
            role: ResponseRole::Assistant,
            model: "claude-test".to_string(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: StreamUsage {
                input_tokens: Some(40),
                output_tokens: None,
                cache_creation_input_tokens: None,
                cache_read_input_tokens: Some(16),
            },
        },
    }));
    chunks.extend(state.apply_event(StreamEvent::ContentBlockStart {
        index: 0,
        content_block: ContentBlock::ToolUse {
            id: "toolu_7".to_string(),
            name: "lookup".to_string(),
            input: Default::default(),
        },
    }));
    chunks.extend(state.apply_event(StreamEvent::ContentBlockDelta {
        index: 0,
        delta: ContentBlockDelta::InputJsonDelta {
            partial_json: "{\"que".to_string(),
        },
    }));
    chunks.extend(state.apply_event(StreamEvent::ContentBlockDelta {
        index: 0,
        delta: ContentBlockDelta::InputJsonDelta {
            partial_json: "ry\":\"rust\"}".to_string(),
        },
    }));
    // Nothing tool-related is visible yet.
    assert!(chunks
        .iter()
        .all(|chunk| chunk.choices[0].delta.tool_calls.is_none()));

    chunks.extend(state.apply_event(StreamEvent::ContentBlockStop { index: 0 }));
    chunks.extend(state.apply_event(StreamEvent::MessageDelta {
        delta: MessageDeltaBody {
            stop_reason: Some(StopReason::ToolUse),
            stop_sequence: None,
        },
        usage: StreamUsage {
            input_tokens: None,
            output_tokens: Some(12),
            cache_creation_input_tokens: None,
            cache_read_input_tokens: None,
        },
    }));
    chunks.extend(state.apply_event(StreamEvent::MessageStop));

    let tool_chunks: Vec<_> = chunks
        .iter()
        .filter_map(|chunk| chunk.choices[0].delta.tool_calls.as_ref())
        .collect();
    assert_eq!(tool_chunks.len(), 1, "expected one complete tool-call chunk");
    let call = &tool_chunks[0][0];
    assert_eq!(call.id.as_deref(), Some("toolu_7"));
    assert_eq!(
        call.function.as_ref().unwrap().name.as_deref(),
        Some("lookup")
    );
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(
            call.function.as_ref().unwrap().arguments.as_ref().unwrap()
        )
        .unwrap(),
        json!({"query": "rust"})
    );

    let final_chunk = chunks
        .iter()
        .find(|chunk| chunk.choices[0].finish_reason.is_some())
        .unwrap();
    assert_eq!(
        final_chunk.choices[0].finish_reason,
        Some(FinishReason::ToolCalls)
    );
    let usage = final_chunk.usage.as_ref().unwrap();
    assert_eq!(usage.prompt_tokens, 40);
    assert_eq!(usage.completion_tokens, 12);
    assert_eq!(usage.total_tokens, 52);
    assert_eq!(usage.prompt_tokens_details.cached_tokens, 16);

    // The upstream already finished; finish() adds nothing more.
    assert!(state.finish().is_empty());
}

#[test]
fn claude_stream_text_flows_incrementally() {
    use modelgate_protocol::claude::stream::{StreamMessage, StreamUsage};

    let mut state = ClaudeToOpenAiStream::new(0);
    let mut chunks = Vec::new();
    chunks.extend(state.apply_event(StreamEvent::MessageStart {
        message: StreamMessage {
            id: "msg_2".to_string(),
            r#type: MessageType::Message,
            role: ResponseRole::Assistant,
            model: "claude-test".to_string(),
            content: Vec::new(),
            stop_reason: None,
            stop_sequence: None,
            usage: StreamUsage::default(),
        },
    }));
    chunks.extend(state.apply_event(StreamEvent::ContentBlockStart {
        index: 0,
        content_block: ContentBlock::Text {
            text: String::new(),
        },
    }));
    for piece in ["hel", "lo"] {
        chunks.extend(state.apply_event(StreamEvent::ContentBlockDelta {
            index: 0,
            delta: ContentBlockDelta::TextDelta {
                text: piece.to_string(),
            },
        }));
    }
    // Text is not buffered: each delta becomes a chunk immediately.
    let text: String = chunks
        .iter()
        .filter_map(|chunk| chunk.choices[0].delta.content.clone())
        .collect();
    assert_eq!(text, "hello");

    // Abrupt end: finish() closes with a stop chunk and [the relay adds DONE].
    let tail = state.finish();
    assert_eq!(
        tail.last().unwrap().choices[0].finish_reason,
        Some(FinishReason::Stop)
    );
}
