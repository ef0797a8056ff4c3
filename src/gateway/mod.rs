use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::mask_key;
use crate::protocol::{
    adapter::ChatCompletionsAdapter, anthropic::AnthropicRequest, detector::ProtocolDetector,
    ProtocolAdapter,
};
use crate::proxy::{ProxyForwarder, Transport};
use crate::router::Router;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router as AxumRouter,
};
use metrics::{histogram, increment_counter};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<Router>,
    pub transport: Arc<dyn Transport>,
    pub adapter: Arc<ChatCompletionsAdapter>,
    pub route_prefix: String,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// 按配置初始化各模块，上游使用 reqwest 转发
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = Arc::new(ProxyForwarder::new(config.proxy.clone())?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self {
            router: Arc::new(Router::new(config.aliases.clone())),
            transport,
            adapter: Arc::new(ChatCompletionsAdapter::new()),
            route_prefix: config.server.route_prefix.clone(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// 构建HTTP应用：健康检查、指标，其余路径全部交给网关处理
pub fn app(state: AppState) -> AxumRouter {
    AxumRouter::new()
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .fallback(handle_request)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                // 过滤掉健康检查的日志
                if request.uri().path() == "/health" {
                    tracing::trace_span!("health_check")
                } else {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        version = ?request.version(),
                    )
                }
            }),
        )
        .with_state(state)
}

async fn health() -> Response {
    axum::Json(serde_json::json!({ "status": "healthy" })).into_response()
}

async fn render_metrics(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn handle_request(State(state): State<AppState>, req: Request<Body>) -> Response {
    match process(state, req).await {
        Ok((outcome, response)) => {
            increment_counter!("gateway_requests_total", "outcome" => outcome);
            response
        }
        Err(e) => {
            match &e {
                Error::Upstream { status, .. } => warn!("Upstream rejected request: {}", status),
                Error::NotFound(_) | Error::MethodNotAllowed | Error::Auth(_) => {
                    warn!("Rejected request: {}", e)
                }
                _ => error!("Request failed: {}", e),
            }
            increment_counter!("gateway_requests_total", "outcome" => outcome_label(&e));
            error_response(&e)
        }
    }
}

/// 单个请求的完整流程：校验 -> 解析 -> 路由 -> 转换 -> 转发 -> 转换回源格式
async fn process(state: AppState, req: Request<Body>) -> Result<(&'static str, Response)> {
    let route = ProtocolDetector::detect(
        req.method(),
        req.uri().path(),
        req.headers(),
        &state.route_prefix,
    )?;

    let body_bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| Error::Translation(format!("Failed to read request body: {}", e)))?;
    let request: AnthropicRequest = serde_json::from_slice(&body_bytes)?;

    info!(
        "Request received - model: {}, stream: {}, path: {:?}, key: {}",
        request.model,
        request.is_stream(),
        route.route_path,
        mask_key(&route.api_key)
    );

    let target = state
        .router
        .resolve(&route.route_path, &request.model, &route.api_key)?;
    let outbound = state
        .adapter
        .transform_request(&request, &target.model)
        .await?;

    let started = Instant::now();
    let upstream = state
        .transport
        .send(&target, outbound, request.is_stream())
        .await?;
    histogram!("gateway_upstream_seconds", started.elapsed().as_secs_f64());

    if !upstream.is_success() {
        let status = upstream.status;
        let content_type = upstream.content_type.clone();
        let body = upstream.bytes().await?;
        return Err(Error::Upstream {
            status,
            content_type,
            body,
        });
    }

    if ProtocolDetector::is_event_stream(upstream.content_type.as_deref()) {
        let stream = state
            .adapter
            .transform_stream(upstream.body, &request.model)
            .await?;
        let headers = [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ];
        // 禁用 nginx 缓冲
        let mut response = (StatusCode::OK, headers, Body::from_stream(stream)).into_response();
        response
            .headers_mut()
            .insert("x-accel-buffering", HeaderValue::from_static("no"));
        return Ok(("stream", response));
    }

    let body = upstream.bytes().await?;
    let transformed = state
        .adapter
        .transform_response(body, &request.model)
        .await?;
    let response = (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        transformed,
    )
        .into_response();
    Ok(("ok", response))
}

fn outcome_label(error: &Error) -> &'static str {
    match error {
        Error::NotFound(_) | Error::MethodNotAllowed | Error::Auth(_) | Error::Config(_) => {
            "rejected"
        }
        Error::Upstream { .. } => "upstream_error",
        Error::Http(_) => "transport_error",
        _ => "internal_error",
    }
}

/// 把错误转换为HTTP响应
///
/// - 404/405：纯文本
/// - 上游非2xx：状态码、Content-Type 和响应体原样透传
/// - 其他：`{"error": "<message>"}`
pub fn error_response(error: &Error) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::BAD_GATEWAY);

    match error {
        Error::NotFound(_) | Error::MethodNotAllowed => (status, error.to_string()).into_response(),
        Error::Upstream {
            content_type, body, ..
        } => {
            let mut response = (status, body.clone()).into_response();
            if let Some(value) = content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
            {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            response
        }
        _ => {
            let body = serde_json::json!({ "error": error.to_string() });
            (status, axum::Json(body)).into_response()
        }
    }
}
