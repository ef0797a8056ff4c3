pub mod adapter;
pub mod anthropic;
pub mod detector;
pub mod openai;
pub mod request;
pub mod response;
pub mod schema;
pub mod stream;

use crate::error::Result;
use crate::protocol::anthropic::AnthropicRequest;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// 源格式（Anthropic messages）与目标格式（OpenAI chat/completions）之间的转换
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    /// 生成发往上游的请求体，model 替换为 `target_model`
    async fn transform_request(
        &self,
        request: &AnthropicRequest,
        target_model: &str,
    ) -> Result<Bytes>;

    /// 转换完整的上游响应体，model 保留为 `original_model`
    async fn transform_response(&self, response_body: Bytes, original_model: &str)
        -> Result<Bytes>;

    /// 转换上游的 SSE 字节流
    async fn transform_stream(
        &self,
        stream: ByteStream,
        original_model: &str,
    ) -> Result<ByteStream>;
}
