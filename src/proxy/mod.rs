use crate::config::ProxyConfig;
use crate::error::{Error, Result};
use crate::models::{mask_key, RoutingTarget};
use crate::protocol::ByteStream;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Client,
};
use std::time::Duration;
use tracing::{error, info};

/// 上游响应：状态码、Content-Type 和尚未读取的响应体
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 读取完整响应体
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

/// 出站传输能力：发送请求，拿到状态码和字节流
///
/// 网关只依赖这个trait，测试中可以替换为假实现。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        target: &RoutingTarget,
        body: Bytes,
        stream: bool,
    ) -> Result<UpstreamResponse>;
}

pub struct ProxyForwarder {
    client: Client,
    // Dedicated client for streaming (no global timeout)
    streaming_client: Client,
}

impl ProxyForwarder {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let keepalive = if config.keep_alive {
            Some(Duration::from_secs(30))
        } else {
            None
        };

        // Standard client: obeys configured request timeout
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(keepalive)
            .build()
            .map_err(Error::Http)?;

        // Streaming client: no global request timeout to allow long-lived SSE
        let streaming_client = Client::builder()
            .pool_max_idle_per_host(config.max_connections)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(keepalive)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            streaming_client,
        })
    }

    fn headers(target: &RoutingTarget) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", target.api_key))
                .map_err(|_| Error::Auth("Invalid api key format".into()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl Transport for ProxyForwarder {
    async fn send(
        &self,
        target: &RoutingTarget,
        body: Bytes,
        stream: bool,
    ) -> Result<UpstreamResponse> {
        let url = target.completions_url();
        info!(
            "send_request: start -> {} (stream: {}, key: {})",
            url,
            stream,
            mask_key(&target.api_key)
        );

        let client = if stream {
            &self.streaming_client
        } else {
            &self.client
        };

        let response = client
            .post(&url)
            .headers(Self::headers(target)?)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                error!("HTTP client connection failed: {:?}", e);
                Error::Http(e)
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        info!("Upstream response status: {} ({:?})", status, content_type);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::Http));

        Ok(UpstreamResponse {
            status,
            content_type,
            body: Box::pin(body),
        })
    }
}
