use beacon_core::{RouteIdentity, RouteMatch, RouteTemplate};

/// 宿主路由写入请求扩展的匹配结果。
///
/// 路由层知道模板与处理器身份，埋点层只读取；未写入该扩展的请求视为不可路由，
/// 过滤器会跳过全部指标与 Span。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedRoute(RouteMatch);

impl MatchedRoute {
    pub fn new(
        template: impl Into<String>,
        resource_class: impl Into<String>,
        resource_method: impl Into<String>,
    ) -> Self {
        Self(RouteMatch::new(
            RouteTemplate::new(template),
            RouteIdentity::new(resource_class, resource_method),
        ))
    }

    /// 只有模板、没有处理器身份的匹配，资源类与方法记为 `unknown`。
    pub fn template_only(template: impl Into<String>) -> Self {
        Self(RouteMatch::with_unknown_resource(RouteTemplate::new(template)))
    }

    pub fn route_match(&self) -> &RouteMatch {
        &self.0
    }
}

impl From<RouteMatch> for MatchedRoute {
    fn from(route: RouteMatch) -> Self {
        Self(route)
    }
}
