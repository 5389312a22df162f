use modelgate_protocol::claude::types::{
    ContentBlock as ClaudeContentBlock, Message as ClaudeMessage, MessageType, ResponseRole,
    StopReason, Usage as ClaudeUsage,
};
use modelgate_protocol::openai::types::{
    ChatCompletionResponse as OpenAiResponse, CompletionUsage, FinishReason, ToolCall,
};

use crate::TransformError;

/// Convert a Chat Completions response into a Messages response. Fails when
/// the upstream payload carries no choices.
pub fn transform_response(response: OpenAiResponse) -> Result<ClaudeMessage, TransformError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or(TransformError::MissingField("choices"))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content
        && !text.is_empty()
    {
        content.push(ClaudeContentBlock::Text { text });
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        content.push(map_tool_call(call));
    }

    Ok(ClaudeMessage {
        id: response.id,
        r#type: MessageType::Message,
        role: ResponseRole::Assistant,
        model: response.model,
        content,
        stop_reason: Some(map_finish_reason(choice.finish_reason)),
        stop_sequence: None,
        usage: map_usage(response.usage.as_ref()),
    })
}

fn map_tool_call(call: ToolCall) -> ClaudeContentBlock {
    ClaudeContentBlock::ToolUse {
        id: call.id,
        name: call.function.name,
        input: serde_json::from_str(&call.function.arguments).unwrap_or_default(),
    }
}

pub(crate) fn map_finish_reason(reason: Option<FinishReason>) -> StopReason {
    match reason {
        Some(FinishReason::Length) => StopReason::MaxTokens,
        Some(FinishReason::ToolCalls) => StopReason::ToolUse,
        Some(FinishReason::ContentFilter) => StopReason::Refusal,
        Some(FinishReason::Stop) | None => StopReason::EndTurn,
    }
}

/// Cache-creation counts have no Chat Completions equivalent; they default to
/// zero so every usage field is always present downstream.
pub(crate) fn map_usage(usage: Option<&CompletionUsage>) -> ClaudeUsage {
    match usage {
        Some(usage) => ClaudeUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: usage.prompt_tokens_details.cached_tokens,
        },
        None => ClaudeUsage::default(),
    }
}
