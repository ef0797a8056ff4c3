use crate::config::AliasConfig;
use crate::error::{Error, Result};
use crate::models::RoutingTarget;
use reqwest::Url;
use tracing::{debug, info};

const DYNAMIC_ROUTE_HINT: &str =
    "Invalid url format. Expected /[http|https/]host/path/model/v1/messages";

/// 目标解析器
///
/// 两种互斥的策略：
/// - 动态路由：从入站路径中解出协议、host、路径和模型
/// - 静态别名：路径为空时，按请求 model 中包含的别名查配置
pub struct Router {
    aliases: Vec<AliasConfig>,
}

impl Router {
    pub fn new(aliases: Vec<AliasConfig>) -> Self {
        Self { aliases }
    }

    /// 解析路由目标
    ///
    /// # 参数
    /// * `route_path` - 去掉前缀和 `/v1/messages` 后缀的入站路径
    /// * `requested_model` - 调用方请求体中的 model 字段
    /// * `caller_key` - 调用方的 x-api-key，动态路由时作为上游凭证
    pub fn resolve(
        &self,
        route_path: &str,
        requested_model: &str,
        caller_key: &str,
    ) -> Result<RoutingTarget> {
        let path = route_path.strip_prefix('/').unwrap_or(route_path);

        if path.is_empty() {
            if let Some(alias) = self.match_alias(requested_model) {
                return Self::alias_target(alias);
            }
            // 没有别名命中时按动态路由处理，空路径必然失败
            debug!("No alias matched model {}, falling back to dynamic routing", requested_model);
        }

        let (base_url, model) = parse_dynamic_path(path)?;
        info!("Dynamic route resolved - base_url: {}, model: {}", base_url, model);

        Ok(RoutingTarget {
            base_url,
            model,
            api_key: caller_key.to_string(),
        })
    }

    fn match_alias(&self, requested_model: &str) -> Option<&AliasConfig> {
        let model = requested_model.to_lowercase();
        self.aliases
            .iter()
            .filter(|alias| !alias.token.is_empty())
            .find(|alias| model.contains(&alias.token.to_lowercase()))
    }

    fn alias_target(alias: &AliasConfig) -> Result<RoutingTarget> {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);

        match (
            non_empty(&alias.base_url),
            non_empty(&alias.model),
            non_empty(&alias.api_key),
        ) {
            (Some(base_url), Some(model), Some(api_key)) => {
                info!("Alias route resolved - token: {}, model: {}", alias.token, model);
                Ok(RoutingTarget {
                    base_url: base_url.trim_end_matches('/').to_string(),
                    model,
                    api_key,
                })
            }
            _ => Err(Error::Config(
                "Could not determine target base URL or model name".to_string(),
            )),
        }
    }
}

/// 解析动态路由路径，返回 (base_url, model)
///
/// `https/api.openai.com/v1/gpt-4o` -> (`https://api.openai.com/v1`, `gpt-4o`)
pub fn parse_dynamic_path(path: &str) -> Result<(String, String)> {
    let mut segments: Vec<&str> = path.split('/').collect();

    let protocol = match segments.first().copied() {
        Some(first @ ("http" | "https")) => {
            segments.remove(0);
            first
        }
        _ => "https",
    };

    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Err(Error::Auth(DYNAMIC_ROUTE_HINT.to_string()));
    }

    let (model, host_and_path) = match segments.split_last() {
        Some((model, rest)) => (model.to_string(), rest.join("/")),
        None => return Err(Error::Auth(DYNAMIC_ROUTE_HINT.to_string())),
    };

    let base_url = format!("{}://{}", protocol, host_and_path);
    Url::parse(&base_url).map_err(|e| Error::Auth(format!("{}: {}", DYNAMIC_ROUTE_HINT, e)))?;

    Ok((base_url, model))
}
