//! 路由模板到层级指标名的归一化。
//!
//! # 教案式说明
//! - **意图（Why）**：同一路由的所有请求必须落到同一组时间序列上，因此指标名只能由“匹配到的模板”
//!   推导，绝不能使用带实参的原始 URL，否则会造成基数爆炸。
//! - **逻辑（How）**：去掉首尾全部 `/`；`/` 替换为 `.`；删除 `:`；`{`、`}` 替换为 `_`；
//!   结果为空白即视为“无法生成身份”。
//! - **契约（What）**：归一化是纯函数，同输入必得同输出；`/foo/{id}` → `foo._id_`，
//!   `api-docs/{route: .+}` → `api-docs._route .+_`。

use std::fmt;

use crate::{identity::RouteIdentity, keys::metrics};

/// 宿主匹配到的路由模板。
///
/// 嵌套资源（子资源定位器）场景下，由各级路径片段依次拼接而成。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteTemplate(String);

impl RouteTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    /// 由外到内的各级资源路径拼接模板。
    ///
    /// 每段去除首尾 `/`，空段被跳过，段间以单个 `/` 连接。
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let joined = segments
            .into_iter()
            .map(|segment| segment.as_ref().trim_matches('/').to_string())
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Self(joined)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RouteTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 宿主给出的一次路由匹配结果：模板 + 处理它的资源身份。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch {
    template: RouteTemplate,
    identity: RouteIdentity,
}

impl RouteMatch {
    pub fn new(template: RouteTemplate, identity: RouteIdentity) -> Self {
        Self { template, identity }
    }

    /// 资源类/方法未知时的便捷构造。
    pub fn with_unknown_resource(template: RouteTemplate) -> Self {
        Self::new(template, RouteIdentity::unknown())
    }

    pub fn template(&self) -> &RouteTemplate {
        &self.template
    }

    pub fn identity(&self) -> &RouteIdentity {
        &self.identity
    }
}

/// 路由解析结果，承载一个请求全部指标名的公共部分。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedRoute {
    method: String,
    metric_path: String,
    matched_path: String,
    identity: RouteIdentity,
}

impl ResolvedRoute {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// 归一化后的路径，例如 `sample.foo.bar._id_`。
    pub fn metric_path(&self) -> &str {
        &self.metric_path
    }

    /// 匹配到的原始模板，用于 Span 属性与响应头。
    pub fn matched_path(&self) -> &str {
        &self.matched_path
    }

    pub fn identity(&self) -> &RouteIdentity {
        &self.identity
    }

    /// `request.<path>.<METHOD>`
    pub fn request_name(&self) -> String {
        format!(
            "{}{}.{}",
            metrics::REQUEST_PREFIX,
            self.metric_path,
            self.method
        )
    }

    /// `request.<path>.<METHOD>.inflight`
    pub fn inflight_name(&self) -> String {
        format!("{}{}", self.request_name(), metrics::INFLIGHT_SUFFIX)
    }

    /// 不含状态码的响应名 `response.<path>.<METHOD>`，用于路由级错误计数。
    pub fn response_base(&self) -> String {
        format!(
            "{}{}.{}",
            metrics::RESPONSE_PREFIX,
            self.metric_path,
            self.method
        )
    }

    /// `response.<path>.<METHOD>.<status>`
    pub fn response_name(&self, status: u16) -> String {
        format!("{}.{status}", self.response_base())
    }
}

/// 路由名解析器。
///
/// # 教案式说明
/// - **意图（Why）**：把“宿主匹配结果 → 指标名”的规则收敛到一个无状态入口，请求阶段只调用一次，
///   响应阶段复用结果，避免两侧规则漂移。
/// - **契约（What）**：方法或模板归一化后为空白时返回 `None`，调用方应静默跳过该请求。
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteNameResolver;

impl RouteNameResolver {
    pub fn resolve(method: &str, route: &RouteMatch) -> Option<ResolvedRoute> {
        let method = method.trim();
        if method.is_empty() {
            return None;
        }
        let metric_path = normalize_path(route.template().as_str())?;
        Some(ResolvedRoute {
            method: method.to_string(),
            metric_path,
            matched_path: route.template().as_str().to_string(),
            identity: route.identity().clone(),
        })
    }
}

/// 把路由模板归一化为点分指标路径；结果为空白时返回 `None`。
pub fn normalize_path(template: &str) -> Option<String> {
    let trimmed = template.trim_matches('/');

    let mut normalized = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        match ch {
            '/' => normalized.push('.'),
            ':' => {}
            '{' | '}' => normalized.push('_'),
            other => normalized.push(other),
        }
    }

    if normalized.trim().is_empty() {
        None
    } else {
        Some(normalized)
    }
}
