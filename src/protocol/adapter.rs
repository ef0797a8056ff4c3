use crate::error::Result;
use crate::protocol::anthropic::AnthropicRequest;
use crate::protocol::openai::OpenAIResponse;
use crate::protocol::request::anthropic_to_openai;
use crate::protocol::response::openai_to_anthropic;
use crate::protocol::stream::{transcode_stream, StreamTranscoder};
use crate::protocol::{ByteStream, ProtocolAdapter};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

/// Anthropic messages -> OpenAI chat/completions 适配器
#[derive(Default)]
pub struct ChatCompletionsAdapter;

impl ChatCompletionsAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProtocolAdapter for ChatCompletionsAdapter {
    async fn transform_request(
        &self,
        request: &AnthropicRequest,
        target_model: &str,
    ) -> Result<Bytes> {
        let openai_req = anthropic_to_openai(request, target_model);
        debug!(
            "Transformed request - model: {}, messages: {}, tools: {}",
            openai_req.model,
            openai_req.messages.len(),
            openai_req.tools.as_ref().map_or(0, Vec::len)
        );
        Ok(Bytes::from(serde_json::to_vec(&openai_req)?))
    }

    async fn transform_response(
        &self,
        response_body: Bytes,
        original_model: &str,
    ) -> Result<Bytes> {
        let openai_resp: OpenAIResponse = serde_json::from_slice(&response_body)?;
        let anthropic_resp = openai_to_anthropic(&openai_resp, original_model)?;
        Ok(Bytes::from(serde_json::to_vec(&anthropic_resp)?))
    }

    async fn transform_stream(
        &self,
        stream: ByteStream,
        original_model: &str,
    ) -> Result<ByteStream> {
        let transcoder = StreamTranscoder::new(original_model);
        debug!("OpenAI -> Anthropic streaming conversion, message id {}", transcoder.message_id());
        Ok(Box::pin(transcode_stream(stream, transcoder)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn request_body_is_openai_json() {
        let req: AnthropicRequest = serde_json::from_value(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "Write a short haiku about code."}]
        }))
        .unwrap();

        let body = ChatCompletionsAdapter::new()
            .transform_request(&req, "gpt-4o-mini")
            .await
            .unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            value,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "Write a short haiku about code."}],
                "max_tokens": 50
            })
        );
    }

    #[tokio::test]
    async fn unparseable_response_body_is_an_error() {
        let result = ChatCompletionsAdapter::new()
            .transform_response(Bytes::from_static(b"<html>"), "claude")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stream_is_transcoded() {
        let upstream: ByteStream = Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(
            b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n",
        ))]));

        let out = ChatCompletionsAdapter::new()
            .transform_stream(upstream, "claude-3-sonnet")
            .await
            .unwrap();
        let chunks: Vec<Bytes> = out.map(|c| c.unwrap()).collect().await;
        let text = String::from_utf8(chunks.concat()).unwrap();

        assert!(text.starts_with("event: message_start\n"));
        assert!(text.contains("\"model\":\"claude-3-sonnet\""));
        assert!(text.contains("\"text\":\"hi\""));
        assert!(text.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
    }
}
