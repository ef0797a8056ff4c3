use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 网关的主配置结构
/// 包含服务器、上游代理、静态别名路由和日志等各个模块的配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// 服务器相关配置
    pub server: ServerConfig,
    /// 上游转发配置
    pub proxy: ProxyConfig,
    /// 静态别名路由表，按顺序匹配
    #[serde(default)]
    pub aliases: Vec<AliasConfig>,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// 服务器监听地址，例如 "0.0.0.0" 或 "127.0.0.1"
    pub host: String,
    /// 服务器监听端口
    pub port: u16,
    /// 固定的路由前缀，例如 "/proxy"；为空表示不使用前缀
    #[serde(default)]
    pub route_prefix: String,
}

/// 代理配置
/// 用于配置上游 chat/completions 请求的相关参数
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// 非流式请求的超时时间；流式请求不设全局超时
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// 每个host的最大空闲连接数
    pub max_connections: usize,
    /// 是否启用TCP Keep-Alive
    pub keep_alive: bool,
}

/// 静态别名路由
///
/// 当请求的 model 字段（忽略大小写）包含 `token` 时，使用这里配置的上游。
/// 三个目标字段任意缺失都视为该别名未配置完整。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AliasConfig {
    pub token: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 输出JSON格式日志
    #[serde(default)]
    pub json: bool,
}

/// 兼容旧部署方式的环境变量
const LEGACY_HAIKU_MODEL: &str = "HAIKU_MODEL_NAME";
const LEGACY_HAIKU_BASE_URL: &str = "HAIKU_BASE_URL";
const LEGACY_HAIKU_API_KEY: &str = "HAIKU_API_KEY";
const LEGACY_HAIKU_TOKEN: &str = "haiku";

impl Config {
    /// 从配置文件加载配置
    ///
    /// # 说明
    /// 1. 首先从指定文件加载配置
    /// 2. 然后从环境变量覆盖配置（前缀为GATEWAY，分隔符为__）
    ///    例如：GATEWAY__SERVER__PORT=8081 会覆盖 server.port
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GATEWAY").separator("__"))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// 读取 HAIKU_* 环境变量，追加一个 token 为 "haiku" 的别名
    ///
    /// 变量全部未设置时也会追加（字段为空），匹配 haiku 的请求得到配置错误，
    /// 而不是落到动态路由。配置文件里已有 haiku 别名时不重复追加。
    pub fn with_legacy_env(self) -> Self {
        self.with_legacy_vars(|name| std::env::var(name).ok())
    }

    fn with_legacy_vars(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let model = non_empty(LEGACY_HAIKU_MODEL);
        let base_url = non_empty(LEGACY_HAIKU_BASE_URL);
        let api_key = non_empty(LEGACY_HAIKU_API_KEY);

        let any_set = model.is_some() || base_url.is_some() || api_key.is_some();
        let configured = self
            .aliases
            .iter()
            .any(|alias| alias.token.eq_ignore_ascii_case(LEGACY_HAIKU_TOKEN));

        if any_set || !configured {
            self.aliases.push(AliasConfig {
                token: LEGACY_HAIKU_TOKEN.to_string(),
                base_url,
                model,
                api_key,
            });
        }
        self
    }

    /// 创建默认配置
    ///
    /// # 默认值
    /// - 服务器：监听 0.0.0.0:3000，无路由前缀
    /// - 代理：超时120秒，每host最多100空闲连接，启用Keep-Alive
    /// - 无静态别名
    pub fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
                route_prefix: String::new(),
            },
            proxy: ProxyConfig {
                timeout: Duration::from_secs(120),
                max_connections: 100,
                keep_alive: true,
            },
            aliases: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}
