//! `http` 请求/响应到埋点交换契约的桥接。
//!
//! # 教案式说明
//! - **意图（Why）**：过滤器只认 [`RequestExchange`] / [`ResponseExchange`]；本模块把 `http` crate 的
//!   类型包装成这两个视图，并把属性袋放进 `http::Extensions`，让它随请求对象跨线程流转。
//! - **逻辑（How）**：
//!   1. [`properties_of`] 在扩展中按需插入共享的 `Arc<PropertyBag>`，同一请求多次调用拿到同一个袋子；
//!   2. [`HttpRequestExchange`] 借用请求头，供请求阶段提取上游追踪上下文；
//!   3. 请求被移交给处理函数后，[`HttpRequestExchange::detach`] 得到不再借用请求的
//!      [`DetachedExchange`]，供响应阶段与完成监听器使用。
//! - **风险（Trade-offs）**：非法 UTF-8 的头部值对埋点不可见；回写的响应头值非法时只记录告警。

use std::sync::Arc;

use beacon_core::{
    HeaderCarrier, PropertyBag, RequestExchange, RequestProperties, ResponseExchange, RouteMatch,
};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Request, Response, header::Entry};

use crate::route::MatchedRoute;

/// 扩展中保存的共享属性袋。
#[derive(Clone)]
struct SharedProperties(Arc<PropertyBag>);

/// 取出（必要时创建）请求的属性袋。
pub fn properties_of<B>(request: &mut Request<B>) -> Arc<PropertyBag> {
    if let Some(SharedProperties(bag)) = request.extensions().get::<SharedProperties>() {
        return Arc::clone(bag);
    }
    let bag = Arc::new(PropertyBag::new());
    request
        .extensions_mut()
        .insert(SharedProperties(Arc::clone(&bag)));
    bag
}

/// `HeaderMap` 上的只读头部视图。
///
/// 多值头部展开为第一个合法 UTF-8 值；名称查找沿用 `HeaderMap` 的大小写不敏感语义。
#[derive(Clone, Copy, Debug)]
pub struct HeaderMapCarrier<'a> {
    headers: &'a HeaderMap,
}

impl<'a> HeaderMapCarrier<'a> {
    pub fn new(headers: &'a HeaderMap) -> Self {
        Self { headers }
    }
}

impl HeaderCarrier for HeaderMapCarrier<'_> {
    fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(name)
            .iter()
            .find_map(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(HeaderName::as_str).collect()
    }
}

/// 与请求对象无关的部分，两种交换视图共享。
#[derive(Clone, Debug)]
struct ExchangeParts {
    method: Method,
    route: Option<RouteMatch>,
    url: String,
    properties: Arc<PropertyBag>,
}

impl ExchangeParts {
    fn capture<B>(request: &mut Request<B>) -> Self {
        let properties = properties_of(request);
        Self {
            method: request.method().clone(),
            route: request
                .extensions()
                .get::<MatchedRoute>()
                .map(|matched| matched.route_match().clone()),
            url: request.uri().to_string(),
            properties,
        }
    }
}

/// 请求阶段视图，借用请求头。
#[derive(Debug)]
pub struct HttpRequestExchange<'a> {
    parts: ExchangeParts,
    headers: HeaderMapCarrier<'a>,
}

impl<'a> HttpRequestExchange<'a> {
    /// 捕获方法、路由、URL 与属性袋；属性袋不存在时写入请求扩展。
    pub fn new<B>(request: &'a mut Request<B>) -> Self {
        let parts = ExchangeParts::capture(request);
        let request: &'a Request<B> = request;
        Self {
            parts,
            headers: HeaderMapCarrier::new(request.headers()),
        }
    }

    /// 放弃对请求头的借用，得到可跨线程移交的响应阶段视图。
    pub fn detach(self) -> DetachedExchange {
        DetachedExchange { parts: self.parts }
    }
}

impl RequestExchange for HttpRequestExchange<'_> {
    fn method(&self) -> &str {
        self.parts.method.as_str()
    }

    fn route_match(&self) -> Option<RouteMatch> {
        self.parts.route.clone()
    }

    fn headers(&self) -> &dyn HeaderCarrier {
        &self.headers
    }

    fn request_url(&self) -> Option<String> {
        Some(self.parts.url.clone())
    }

    fn properties(&self) -> &dyn RequestProperties {
        self.parts.properties.as_ref()
    }
}

/// 响应阶段视图，不再持有请求头；头部视图恒为空。
#[derive(Clone, Debug)]
pub struct DetachedExchange {
    parts: ExchangeParts,
}

impl DetachedExchange {
    /// 直接从请求捕获；适用于宿主自行管理请求阶段钩子的场景。
    pub fn capture<B>(request: &mut Request<B>) -> Self {
        Self {
            parts: ExchangeParts::capture(request),
        }
    }

    pub fn property_bag(&self) -> &Arc<PropertyBag> {
        &self.parts.properties
    }
}

impl RequestExchange for DetachedExchange {
    fn method(&self) -> &str {
        self.parts.method.as_str()
    }

    fn route_match(&self) -> Option<RouteMatch> {
        self.parts.route.clone()
    }

    fn headers(&self) -> &dyn HeaderCarrier {
        self
    }

    fn request_url(&self) -> Option<String> {
        Some(self.parts.url.clone())
    }

    fn properties(&self) -> &dyn RequestProperties {
        self.parts.properties.as_ref()
    }
}

impl HeaderCarrier for DetachedExchange {
    fn get(&self, _name: &str) -> Option<&str> {
        None
    }

    fn keys(&self) -> Vec<&str> {
        Vec::new()
    }
}

/// 响应视图。
#[derive(Debug)]
pub struct HttpResponseExchange<'a, B> {
    response: &'a mut Response<B>,
}

impl<'a, B> HttpResponseExchange<'a, B> {
    pub fn new(response: &'a mut Response<B>) -> Self {
        Self { response }
    }
}

impl<B> ResponseExchange for HttpResponseExchange<'_, B> {
    fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    fn append_header(&mut self, name: &'static str, value: &str) {
        let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) else {
            tracing::warn!(header = name, "skipping response header with invalid name or value");
            return;
        };
        match self.response.headers_mut().entry(name) {
            Entry::Occupied(mut entry) => entry.append(value),
            Entry::Vacant(entry) => {
                entry.insert(value);
            }
        }
    }
}
