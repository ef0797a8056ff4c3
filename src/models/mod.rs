use serde::{Deserialize, Serialize};

/// 路由目标
/// 每个入站请求由路由模块解析一次，之后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTarget {
    /// 上游基础URL，不带末尾斜杠，例如 "https://api.openai.com/v1"
    pub base_url: String,
    /// 上游模型名称
    pub model: String,
    /// 上游 Bearer 凭证
    pub api_key: String,
}

impl RoutingTarget {
    /// 上游 chat/completions 端点
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// 源格式的Token用量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// 未观察到 finish_reason 时使用的结束原因
pub const DEFAULT_STOP_REASON: &str = "end_turn";

/// 上游 finish_reason 到源格式 stop_reason 的映射表
const FINISH_REASON_TABLE: &[(&str, &str)] = &[
    ("stop", "end_turn"),
    ("tool_calls", "tool_use"),
    ("function_call", "tool_use"),
    ("length", "max_tokens"),
];

/// 映射 finish_reason，表中没有的值原样透传
pub fn map_finish_reason(finish_reason: &str) -> String {
    FINISH_REASON_TABLE
        .iter()
        .find(|(from, _)| *from == finish_reason)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| finish_reason.to_string())
}

/// 日志中展示的凭证，只保留首尾各4个字符
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "***".to_string()
    }
}
