use modelgate_protocol::claude::types::{
    ContentBlock as ClaudeContentBlock, Message as ClaudeMessage, StopReason, Usage as ClaudeUsage,
};
use modelgate_protocol::openai::types::{
    ChatCompletionChoice, ChatCompletionObject, ChatCompletionResponse, CompletionUsage,
    FinishReason, FunctionCall, PromptTokensDetails, ResponseMessage, ResponseRole, ToolCall,
    ToolCallType,
};

/// Convert a Messages response into a Chat Completions response.
pub fn transform_response(response: ClaudeMessage) -> ChatCompletionResponse {
    let (content, tool_calls) = map_content(&response.content);

    let message = ResponseMessage {
        role: ResponseRole::Assistant,
        content,
        tool_calls,
    };

    ChatCompletionResponse {
        id: response.id,
        object: ChatCompletionObject::ChatCompletion,
        created: 0,
        model: response.model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message,
            finish_reason: Some(map_stop_reason(response.stop_reason)),
        }],
        usage: Some(map_usage(&response.usage)),
    }
}

fn map_content(blocks: &[ClaudeContentBlock]) -> (Option<String>, Option<Vec<ToolCall>>) {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ClaudeContentBlock::Text { text } => texts.push(text.clone()),
            ClaudeContentBlock::Thinking { thinking, .. } => texts.push(thinking.clone()),
            ClaudeContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                r#type: ToolCallType::Function,
                function: FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
        }
    }

    let content = if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    };
    let tool_calls = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };
    (content, tool_calls)
}

pub(crate) fn map_stop_reason(reason: Option<StopReason>) -> FinishReason {
    match reason {
        Some(StopReason::MaxTokens) => FinishReason::Length,
        Some(StopReason::ToolUse) => FinishReason::ToolCalls,
        Some(StopReason::Refusal) => FinishReason::ContentFilter,
        Some(StopReason::EndTurn) | Some(StopReason::StopSequence) | None => FinishReason::Stop,
    }
}

pub(crate) fn map_usage(usage: &ClaudeUsage) -> CompletionUsage {
    CompletionUsage {
        prompt_tokens: usage.input_tokens,
        completion_tokens: usage.output_tokens,
        total_tokens: usage.input_tokens + usage.output_tokens,
        prompt_tokens_details: PromptTokensDetails {
            cached_tokens: usage.cache_read_input_tokens,
        },
    }
}
