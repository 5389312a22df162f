use modelgate_protocol::claude::types::{
    ContentBlockParam as ClaudeContentBlock, CreateMessageRequest as ClaudeRequest,
    ImageSource as ClaudeImageSource, MessageContent as ClaudeMessageContent,
    MessageParam as ClaudeMessage, MessageRole as ClaudeRole, Metadata, SystemParam as ClaudeSystem,
    Tool as ClaudeTool, ToolChoice as ClaudeToolChoice, ToolResultContent,
};
use modelgate_protocol::openai::types::{
    ChatCompletionRequest as OpenAiRequest, RequestMessage, StopConfiguration, ToolCall,
    ToolChoiceMode, ToolChoiceOption, ToolDefinition, UserContent, UserContentPart,
};
use serde_json::json;

use crate::TransformError;

/// Convert a Chat Completions request into a Messages request. Fails when the
/// request carries no token limit; the Messages protocol requires one.
pub fn transform_request(request: OpenAiRequest) -> Result<ClaudeRequest, TransformError> {
    let max_tokens = request
        .max_tokens
        .or(request.max_completion_tokens)
        .ok_or(TransformError::MissingField("max_tokens"))?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<ClaudeMessage> = Vec::new();

    for message in request.messages {
        match message {
            RequestMessage::System { content, .. } => {
                let text = user_content_text(&content);
                if !text.is_empty() {
                    system_parts.push(text);
                }
            }
            RequestMessage::User { content, .. } => messages.push(ClaudeMessage {
                role: ClaudeRole::User,
                content: map_user_content(content),
            }),
            RequestMessage::Assistant {
                content,
                tool_calls,
            } => messages.push(map_assistant(content, tool_calls)),
            RequestMessage::Tool {
                content,
                tool_call_id,
            } => messages.push(ClaudeMessage {
                role: ClaudeRole::User,
                content: ClaudeMessageContent::Blocks(vec![ClaudeContentBlock::ToolResult {
                    tool_use_id: tool_call_id,
                    content: Some(ToolResultContent::Text(content)),
                    is_error: None,
                }]),
            }),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(ClaudeSystem::Text(system_parts.join("\n\n")))
    };

    Ok(ClaudeRequest {
        model: request.model,
        max_tokens,
        messages,
        system,
        tools: map_tools(request.tools),
        tool_choice: map_tool_choice(request.tool_choice),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: map_stop(request.stop),
        stream: request.stream,
        metadata: request.user.map(|user_id| Metadata {
            user_id: Some(user_id),
        }),
    })
}

fn user_content_text(content: &UserContent) -> String {
    match content {
        UserContent::Text(text) => text.clone(),
        UserContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                UserContentPart::Text { text } => Some(text.clone()),
                UserContentPart::ImageUrl { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn map_user_content(content: UserContent) -> ClaudeMessageContent {
    match content {
        UserContent::Text(text) => ClaudeMessageContent::Text(text),
        UserContent::Parts(parts) => ClaudeMessageContent::Blocks(
            parts
                .into_iter()
                .map(|part| match part {
                    UserContentPart::Text { text } => ClaudeContentBlock::Text { text },
                    UserContentPart::ImageUrl { image_url } => ClaudeContentBlock::Image {
                        source: map_image_source(image_url.url),
                    },
                })
                .collect(),
        ),
    }
}

/// Data URLs round-trip back into base64 sources; everything else stays a
/// plain URL reference.
fn map_image_source(url: String) -> ClaudeImageSource {
    if let Some(rest) = url.strip_prefix("data:")
        && let Some((media_type, data)) = rest.split_once(";base64,")
    {
        return ClaudeImageSource::Base64 {
            media_type: media_type.to_string(),
            data: data.to_string(),
        };
    }
    ClaudeImageSource::Url { url }
}

fn map_assistant(content: Option<String>, tool_calls: Option<Vec<ToolCall>>) -> ClaudeMessage {
    let mut blocks: Vec<ClaudeContentBlock> = Vec::new();
    if let Some(text) = content
        && !text.is_empty()
    {
        blocks.push(ClaudeContentBlock::Text { text });
    }
    for call in tool_calls.unwrap_or_default() {
        blocks.push(ClaudeContentBlock::ToolUse {
            id: call.id,
            name: call.function.name,
            input: serde_json::from_str(&call.function.arguments).unwrap_or_default(),
        });
    }
    ClaudeMessage {
        role: ClaudeRole::Assistant,
        content: ClaudeMessageContent::Blocks(blocks),
    }
}

fn map_tools(tools: Option<Vec<ToolDefinition>>) -> Option<Vec<ClaudeTool>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|tool| ClaudeTool {
                name: tool.function.name,
                description: tool.function.description,
                input_schema: tool
                    .function
                    .parameters
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect(),
    )
}

fn map_tool_choice(choice: Option<ToolChoiceOption>) -> Option<ClaudeToolChoice> {
    match choice? {
        ToolChoiceOption::Mode(ToolChoiceMode::Auto) => Some(ClaudeToolChoice::Auto),
        ToolChoiceOption::Mode(ToolChoiceMode::Required) => Some(ClaudeToolChoice::Any),
        ToolChoiceOption::Mode(ToolChoiceMode::None) => Some(ClaudeToolChoice::None),
        ToolChoiceOption::Named(named) => Some(ClaudeToolChoice::Tool {
            name: named.function.name,
        }),
    }
}

fn map_stop(stop: Option<StopConfiguration>) -> Option<Vec<String>> {
    match stop? {
        StopConfiguration::Single(sequence) => Some(vec![sequence]),
        StopConfiguration::Many(sequences) if !sequences.is_empty() => Some(sequences),
        StopConfiguration::Many(_) => None,
    }
}
