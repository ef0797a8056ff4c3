use crate::error::{Error, Result};
use crate::models::{map_finish_reason, Usage, DEFAULT_STOP_REASON};
use crate::protocol::anthropic::{AnthropicResponse, ResponseBlock};
use crate::protocol::openai::OpenAIResponse;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

/// 将 OpenAI 非流式响应转换为 Anthropic 响应
///
/// 只使用第一个 choice；响应中的 model 使用调用方原始请求的 model。
pub fn openai_to_anthropic(
    openai_resp: &OpenAIResponse,
    original_model: &str,
) -> Result<AnthropicResponse> {
    let first_choice = openai_resp
        .choices
        .first()
        .ok_or_else(|| Error::Translation("No choices in OpenAI response".into()))?;

    if openai_resp.choices.len() > 1 {
        debug!(
            "OpenAI response has {} choices, using the first",
            openai_resp.choices.len()
        );
    }

    let message = &first_choice.message;
    let mut content = Vec::new();

    if let Some(text) = message.content.as_deref().filter(|t| !t.is_empty()) {
        content.push(ResponseBlock::Text {
            text: text.to_string(),
        });
    }

    for call in message.tool_calls.iter().flatten() {
        let input = decode_arguments(&call.function.name, &call.function.arguments)?;
        content.push(ResponseBlock::ToolUse {
            id: call.id.clone(),
            name: call.function.name.clone(),
            input,
        });
    }

    let stop_reason = first_choice
        .finish_reason
        .as_deref()
        .map(map_finish_reason)
        .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string());

    let usage = openai_resp.usage.unwrap_or_default();

    Ok(AnthropicResponse {
        id: if openai_resp.id.is_empty() {
            format!("msg_{}", Uuid::new_v4().simple())
        } else {
            openai_resp.id.clone()
        },
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
    })
}

/// arguments 为空串视为无参数；解析失败是翻译错误
fn decode_arguments(name: &str, arguments: &str) -> Result<Value> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments).map_err(|e| {
        Error::Translation(format!(
            "Invalid arguments for tool call {}: {}",
            name, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: Value) -> OpenAIResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn text_response_keeps_original_model() {
        let resp = parse(json!({
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hello! How can I help you today?"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 18, "total_tokens": 30}
        }));
        let out = openai_to_anthropic(&resp, "claude-3-haiku-20240307").unwrap();

        assert_eq!(out.id, "chatcmpl-123");
        assert_eq!(out.response_type, "message");
        assert_eq!(out.role, "assistant");
        assert_eq!(out.model, "claude-3-haiku-20240307");
        assert_eq!(
            out.content,
            vec![ResponseBlock::Text { text: "Hello! How can I help you today?".into() }]
        );
        assert_eq!(out.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(out.usage, Usage { input_tokens: 12, output_tokens: 18 });
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let resp = parse(json!({
            "id": "chatcmpl-123",
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": "Let me check the weather for you.",
                    "tool_calls": [
                        {"id": "call_123", "type": "function", "function": {"name": "get_weather", "arguments": "{\"location\":\"SF\"}"}},
                        {"id": "call_456", "type": "function", "function": {"name": "get_time", "arguments": "{\"timezone\":\"PST\"}"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 50, "completion_tokens": 15}
        }));
        let out = openai_to_anthropic(&resp, "claude-3-sonnet").unwrap();

        assert_eq!(out.content.len(), 3);
        assert!(matches!(&out.content[0], ResponseBlock::Text { text } if text == "Let me check the weather for you."));
        assert_eq!(
            out.content[1],
            ResponseBlock::ToolUse {
                id: "call_123".into(),
                name: "get_weather".into(),
                input: json!({"location": "SF"}),
            }
        );
        assert!(matches!(&out.content[2], ResponseBlock::ToolUse { name, .. } if name == "get_time"));
        assert_eq!(out.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn null_content_emits_no_text_block() {
        let resp = parse(json!({
            "id": "x",
            "choices": [{
                "message": {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "ping", "arguments": ""}}
                ]},
                "finish_reason": "tool_calls"
            }]
        }));
        let out = openai_to_anthropic(&resp, "claude").unwrap();
        assert_eq!(out.content.len(), 1);
        assert!(matches!(&out.content[0], ResponseBlock::ToolUse { input, .. } if *input == json!({})));
        assert_eq!(out.usage, Usage::default());
    }

    #[test]
    fn malformed_arguments_are_a_translation_error() {
        let resp = parse(json!({
            "id": "x",
            "choices": [{
                "message": {"tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{\"location\":"}}
                ]},
                "finish_reason": "tool_calls"
            }]
        }));
        assert!(matches!(openai_to_anthropic(&resp, "claude"), Err(Error::Translation(_))));
    }

    #[test]
    fn finish_reason_mapping_and_defaults() {
        let build = |finish: Value| {
            parse(json!({"id": "x", "choices": [{"message": {"content": "hi"}, "finish_reason": finish}]}))
        };
        let stop = |resp: &OpenAIResponse| openai_to_anthropic(resp, "m").unwrap().stop_reason;

        assert_eq!(stop(&build(json!("length"))).as_deref(), Some("max_tokens"));
        assert_eq!(stop(&build(json!("content_filter"))).as_deref(), Some("content_filter"));
        assert_eq!(stop(&build(Value::Null)).as_deref(), Some("end_turn"));
    }

    #[test]
    fn first_choice_wins_and_empty_choices_fail() {
        let resp = parse(json!({
            "id": "x",
            "choices": [
                {"message": {"content": "first"}, "finish_reason": "stop"},
                {"message": {"content": "second"}, "finish_reason": "stop"}
            ]
        }));
        let out = openai_to_anthropic(&resp, "m").unwrap();
        assert_eq!(out.content, vec![ResponseBlock::Text { text: "first".into() }]);

        let empty = parse(json!({"id": "x", "choices": []}));
        assert!(matches!(openai_to_anthropic(&empty, "m"), Err(Error::Translation(_))));
    }

    #[test]
    fn tool_call_round_trip_preserves_input() {
        use crate::protocol::anthropic::AnthropicRequest;
        use crate::protocol::request::anthropic_to_openai;

        let req: AnthropicRequest = serde_json::from_value(json!({
            "model": "claude",
            "max_tokens": 10,
            "messages": [{"role": "assistant", "content": [
                {"type": "tool_use", "id": "call_1", "name": "get_weather", "input": {"location": "SF"}}
            ]}]
        }))
        .unwrap();
        let forwarded = anthropic_to_openai(&req, "gpt-4o");
        let call = forwarded.messages[0].tool_calls.as_ref().unwrap()[0].clone();
        assert_eq!(call.function.arguments, r#"{"location":"SF"}"#);

        let resp = parse(json!({
            "id": "x",
            "choices": [{"message": {"tool_calls": [call]}, "finish_reason": "tool_calls"}]
        }));
        let out = openai_to_anthropic(&resp, "claude").unwrap();
        assert!(matches!(&out.content[0], ResponseBlock::ToolUse { input, .. } if *input == json!({"location": "SF"})));
    }
}
