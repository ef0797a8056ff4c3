use crate::protocol::anthropic::{self, AnthropicRequest, ContentBlock, MessageContent};
use crate::protocol::openai::{self, OpenAIRequest};
use crate::protocol::schema::sanitize_schema;
use serde_json::Value;

/// 将 Anthropic messages 请求转换为 OpenAI chat/completions 请求
///
/// model 总是替换为路由解析出的上游模型。
pub fn anthropic_to_openai(req: &AnthropicRequest, target_model: &str) -> OpenAIRequest {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        messages.push(openai::Message::text(openai::Role::System, system.text()));
    }

    for msg in &req.messages {
        convert_message(msg, &mut messages);
    }

    OpenAIRequest {
        model: target_model.to_string(),
        messages,
        tools: req
            .tools
            .as_ref()
            .map(|tools| tools.iter().map(convert_tool).collect()),
        tool_choice: req.tool_choice.as_ref().map(convert_tool_choice),
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        top_p: req.top_p,
        stop: req.stop_sequences.clone(),
        stream: req.stream,
    }
}

fn convert_role(role: anthropic::Role) -> openai::Role {
    match role {
        anthropic::Role::User => openai::Role::User,
        anthropic::Role::Assistant => openai::Role::Assistant,
        anthropic::Role::System => openai::Role::System,
    }
}

/// 一条源消息可能展开为多条目标消息：
/// text 与 tool_use 合并为一条，每个 tool_result 单独成为一条 tool 消息
fn convert_message(msg: &anthropic::Message, out: &mut Vec<openai::Message>) {
    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            out.push(openai::Message::text(convert_role(msg.role), text.clone()));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut pending = PendingMessage::default();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => pending.texts.push(text.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                pending.tool_calls.push(openai::ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: openai::FunctionCall {
                        name: name.clone(),
                        arguments: encode_arguments(input),
                    },
                });
            }
            ContentBlock::ToolResult { tool_use_id, content } => {
                pending.flush(msg.role, out);
                out.push(openai::Message {
                    role: openai::Role::Tool,
                    content: Some(tool_result_text(content.as_ref())),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            ContentBlock::Unsupported => {}
        }
    }

    pending.flush(msg.role, out);
}

#[derive(Default)]
struct PendingMessage {
    texts: Vec<String>,
    tool_calls: Vec<openai::ToolCall>,
}

impl PendingMessage {
    fn flush(&mut self, role: anthropic::Role, out: &mut Vec<openai::Message>) {
        if self.texts.is_empty() && self.tool_calls.is_empty() {
            return;
        }

        let content = if self.texts.is_empty() {
            None
        } else {
            Some(self.texts.concat())
        };

        let (role, tool_calls) = if self.tool_calls.is_empty() {
            (convert_role(role), None)
        } else {
            // tool_calls 只能出现在 assistant 消息上
            (openai::Role::Assistant, Some(std::mem::take(&mut self.tool_calls)))
        };

        out.push(openai::Message {
            role,
            content,
            tool_calls,
            tool_call_id: None,
        });
        self.texts.clear();
    }
}

fn encode_arguments(input: &Value) -> String {
    match input {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

/// tool_result 的 content 统一转成文本
fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match (item.get("type").and_then(Value::as_str), item.get("text")) {
                (Some("text"), Some(Value::String(text))) => text.clone(),
                _ => item.to_string(),
            })
            .collect::<Vec<_>>()
            .concat(),
        Some(other) => other.to_string(),
    }
}

fn convert_tool(tool: &anthropic::Tool) -> openai::Tool {
    openai::Tool {
        tool_type: "function".to_string(),
        function: openai::FunctionDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: sanitize_schema(&tool.input_schema),
        },
    }
}

fn convert_tool_choice(choice: &anthropic::ToolChoice) -> openai::ToolChoice {
    match choice {
        anthropic::ToolChoice::Auto | anthropic::ToolChoice::Any => {
            openai::ToolChoice::Mode("auto".to_string())
        }
        anthropic::ToolChoice::Disabled => openai::ToolChoice::Mode("none".to_string()),
        anthropic::ToolChoice::Tool { name } => {
            openai::ToolChoice::Function(openai::NamedToolChoice {
                choice_type: "function".to_string(),
                function: openai::FunctionName { name: name.clone() },
            })
        }
    }
}
