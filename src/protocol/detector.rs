use crate::error::{Error, Result};
use axum::http::{HeaderMap, Method};

/// 入站路径必须以此结尾
pub const MESSAGES_SUFFIX: &str = "/v1/messages";

/// 调用方凭证所在的header
pub const API_KEY_HEADER: &str = "x-api-key";

/// 通过校验的入站请求信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRoute {
    /// 去掉前缀和后缀后的路径，静态别名路由时为空
    pub route_path: String,
    /// 调用方的 x-api-key
    pub api_key: String,
}

pub struct ProtocolDetector;

impl ProtocolDetector {
    /// 校验入站请求：路径后缀 -> 方法 -> 凭证，顺序决定返回哪个错误
    pub fn detect(
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        route_prefix: &str,
    ) -> Result<InboundRoute> {
        let route_path = Self::route_path(path, route_prefix)
            .ok_or_else(|| Error::NotFound(MESSAGES_SUFFIX.to_string()))?;

        if *method != Method::POST {
            return Err(Error::MethodNotAllowed);
        }

        let api_key = headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Auth(format!("Missing {} header", API_KEY_HEADER)))?;

        Ok(InboundRoute {
            route_path: route_path.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// 去掉前缀和 `/v1/messages` 后缀，路径不符合时返回 None
    fn route_path<'a>(path: &'a str, route_prefix: &str) -> Option<&'a str> {
        let prefix = route_prefix.trim_end_matches('/');
        let path = path.strip_prefix(prefix)?;
        // 前缀必须在路径段边界结束，"/proxy" 不匹配 "/proxyX/..."
        if !path.is_empty() && !path.starts_with('/') {
            return None;
        }
        path.strip_suffix(MESSAGES_SUFFIX)
    }

    /// 上游响应是否为 SSE
    pub fn is_event_stream(content_type: Option<&str>) -> bool {
        content_type
            .map(|ct| ct.to_ascii_lowercase().contains("text/event-stream"))
            .unwrap_or(false)
    }
}
