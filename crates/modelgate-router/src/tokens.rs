use modelgate_protocol::claude::types::{
    ContentBlockParam, MessageContent, MessageParam, SystemParam, ToolResultContent,
    ToolResultContentBlock,
};

/// Character-based token estimate (~4 characters per token, minimum 1) over
/// the text content of a request. No upstream call is made.
pub fn estimate_input_tokens(system: Option<&SystemParam>, messages: &[MessageParam]) -> u32 {
    let mut chars = 0usize;

    match system {
        Some(SystemParam::Text(text)) => chars += text.len(),
        Some(SystemParam::Blocks(blocks)) => {
            chars += blocks.iter().map(|block| block.text.len()).sum::<usize>();
        }
        None => {}
    }

    for message in messages {
        match &message.content {
            MessageContent::Text(text) => chars += text.len(),
            MessageContent::Blocks(blocks) => {
                for block in blocks {
                    chars += block_chars(block);
                }
            }
        }
    }

    ((chars / 4).max(1)) as u32
}

fn block_chars(block: &ContentBlockParam) -> usize {
    match block {
        ContentBlockParam::Text { text } => text.len(),
        ContentBlockParam::Thinking { thinking, .. } => thinking.len(),
        ContentBlockParam::ToolResult {
            content: Some(ToolResultContent::Text(text)),
            ..
        } => text.len(),
        ContentBlockParam::ToolResult {
            content: Some(ToolResultContent::Blocks(blocks)),
            ..
        } => blocks
            .iter()
            .map(|block| match block {
                ToolResultContentBlock::Text { text } => text.len(),
                ToolResultContentBlock::Image { .. } => 0,
            })
            .sum(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgate_protocol::claude::types::MessageRole;

    #[test]
    fn empty_request_estimates_one_token() {
        assert_eq!(estimate_input_tokens(None, &[]), 1);
    }

    #[test]
    fn four_chars_per_token() {
        let messages = vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Text("a".repeat(40)),
        }];
        assert_eq!(estimate_input_tokens(None, &messages), 10);
    }

    #[test]
    fn counts_system_and_blocks() {
        let system = SystemParam::Text("b".repeat(20));
        let messages = vec![MessageParam {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![
                ContentBlockParam::Text {
                    text: "c".repeat(20),
                },
                ContentBlockParam::ToolResult {
                    tool_use_id: "t1".to_string(),
                    content: Some(ToolResultContent::Text("d".repeat(20))),
                    is_error: None,
                },
            ]),
        }];
        assert_eq!(estimate_input_tokens(Some(&system), &messages), 15);
    }
}
