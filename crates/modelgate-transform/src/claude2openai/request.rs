use modelgate_protocol::claude::types::{
    ContentBlockParam as ClaudeContentBlock, CreateMessageRequest as ClaudeRequest,
    ImageSource as ClaudeImageSource, MessageContent as ClaudeMessageContent,
    MessageParam as ClaudeMessage, MessageRole as ClaudeRole, SystemParam as ClaudeSystem,
    Tool as ClaudeTool, ToolChoice as ClaudeToolChoice, ToolResultContent,
    ToolResultContentBlock,
};
use modelgate_protocol::openai::types::{
    ChatCompletionRequest as OpenAiRequest, FunctionCall, FunctionObject, ImageUrl,
    NamedToolChoice, NamedToolChoiceFunction, RequestMessage, StopConfiguration, ToolCall,
    ToolCallType, ToolChoiceMode, ToolChoiceOption, ToolDefinition, ToolDefinitionType,
    UserContent, UserContentPart,
};

/// Convert a Messages request into a Chat Completions request. The model is
/// carried over verbatim; callers rewrite it after alias resolution.
pub fn transform_request(request: ClaudeRequest) -> OpenAiRequest {
    let mut messages = Vec::new();
    if let Some(system) = map_system(request.system) {
        messages.push(system);
    }
    for message in &request.messages {
        messages.extend(map_message(message));
    }

    OpenAiRequest {
        model: request.model,
        messages,
        max_tokens: None,
        max_completion_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: map_stop_sequences(request.stop_sequences),
        stream: request.stream,
        stream_options: None,
        tools: map_tools(request.tools),
        tool_choice: map_tool_choice(request.tool_choice),
        parallel_tool_calls: None,
        user: request.metadata.and_then(|metadata| metadata.user_id),
    }
}

fn map_system(system: Option<ClaudeSystem>) -> Option<RequestMessage> {
    let text = match system? {
        ClaudeSystem::Text(text) => text,
        ClaudeSystem::Blocks(blocks) => blocks
            .into_iter()
            .map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n"),
    };
    if text.is_empty() {
        return None;
    }
    Some(RequestMessage::System {
        content: UserContent::Text(text),
        name: None,
    })
}

fn map_message(message: &ClaudeMessage) -> Vec<RequestMessage> {
    match message.role {
        ClaudeRole::User => map_user_message(&message.content),
        ClaudeRole::Assistant => map_assistant_message(&message.content),
    }
}

fn map_user_message(content: &ClaudeMessageContent) -> Vec<RequestMessage> {
    let mut output = Vec::new();
    let mut parts: Vec<UserContentPart> = Vec::new();

    match content {
        ClaudeMessageContent::Text(text) => push_text(&mut parts, text.clone()),
        ClaudeMessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ClaudeContentBlock::Text { text } => push_text(&mut parts, text.clone()),
                    ClaudeContentBlock::Image { source } => {
                        parts.push(map_image_part(source));
                    }
                    ClaudeContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } => {
                        // Tool results become standalone tool-role messages;
                        // flush accumulated user parts first to keep order.
                        flush_user_parts(&mut output, &mut parts);
                        output.push(RequestMessage::Tool {
                            content: tool_result_text(content.as_ref()),
                            tool_call_id: tool_use_id.clone(),
                        });
                    }
                    // tool_use and thinking are assistant-side blocks.
                    _ => {}
                }
            }
        }
    }

    flush_user_parts(&mut output, &mut parts);
    output
}

fn map_assistant_message(content: &ClaudeMessageContent) -> Vec<RequestMessage> {
    let mut texts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    match content {
        ClaudeMessageContent::Text(text) => texts.push(text.clone()),
        ClaudeMessageContent::Blocks(blocks) => {
            for block in blocks {
                match block {
                    ClaudeContentBlock::Text { text } => texts.push(text.clone()),
                    ClaudeContentBlock::Thinking { thinking, .. } => texts.push(thinking.clone()),
                    ClaudeContentBlock::ToolUse { id, name, input } => {
                        tool_calls.push(ToolCall {
                            id: id.clone(),
                            r#type: ToolCallType::Function,
                            function: FunctionCall {
                                name: name.clone(),
                                arguments: serde_json::to_string(input)
                                    .unwrap_or_else(|_| "{}".to_string()),
                            },
                        });
                    }
                    _ => {}
                }
            }
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

    vec![RequestMessage::Assistant {
        content,
        tool_calls,
    }]
}

fn push_text(parts: &mut Vec<UserContentPart>, text: String) {
    if !text.is_empty() {
        parts.push(UserContentPart::Text { text });
    }
}

fn flush_user_parts(output: &mut Vec<RequestMessage>, parts: &mut Vec<UserContentPart>) {
    if parts.is_empty() {
        return;
    }
    let content = if parts.len() == 1 {
        match &parts[0] {
            UserContentPart::Text { text } => UserContent::Text(text.clone()),
            _ => UserContent::Parts(parts.clone()),
        }
    } else {
        UserContent::Parts(parts.clone())
    };
    output.push(RequestMessage::User {
        content,
        name: None,
    });
    parts.clear();
}

fn map_image_part(source: &ClaudeImageSource) -> UserContentPart {
    let url = match source {
        ClaudeImageSource::Url { url } => url.clone(),
        ClaudeImageSource::Base64 { media_type, data } => {
            format!("data:{media_type};base64,{data}")
        }
    };
    UserContentPart::ImageUrl {
        image_url: ImageUrl { url, detail: None },
    }
}

fn tool_result_text(content: Option<&ToolResultContent>) -> String {
    match content {
        Some(ToolResultContent::Text(text)) => text.clone(),
        Some(ToolResultContent::Blocks(blocks)) => blocks
            .iter()
            .map(|block| match block {
                ToolResultContentBlock::Text { text } => text.clone(),
                ToolResultContentBlock::Image { .. } => "[tool_result image]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => String::new(),
    }
}

fn map_tools(tools: Option<Vec<ClaudeTool>>) -> Option<Vec<ToolDefinition>> {
    let tools = tools?;
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .into_iter()
            .map(|tool| ToolDefinition {
                r#type: ToolDefinitionType::Function,
                function: FunctionObject {
                    name: tool.name,
                    description: tool.description,
                    parameters: Some(tool.input_schema),
                },
            })
            .collect(),
    )
}

fn map_tool_choice(choice: Option<ClaudeToolChoice>) -> Option<ToolChoiceOption> {
    match choice? {
        ClaudeToolChoice::Auto => Some(ToolChoiceOption::Mode(ToolChoiceMode::Auto)),
        ClaudeToolChoice::Any => Some(ToolChoiceOption::Mode(ToolChoiceMode::Required)),
        ClaudeToolChoice::None => Some(ToolChoiceOption::Mode(ToolChoiceMode::None)),
        ClaudeToolChoice::Tool { name } => Some(ToolChoiceOption::Named(NamedToolChoice {
            r#type: ToolDefinitionType::Function,
            function: NamedToolChoiceFunction { name },
        })),
    }
}

fn map_stop_sequences(stop_sequences: Option<Vec<String>>) -> Option<StopConfiguration> {
    let mut sequences = stop_sequences?;
    match sequences.len() {
        0 => None,
        1 => Some(StopConfiguration::Single(sequences.remove(0))),
        _ => Some(StopConfiguration::Many(sequences)),
    }
}
