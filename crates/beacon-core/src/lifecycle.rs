//! 请求阶段与响应阶段之间的状态关联。
//!
//! # 教案式说明
//! - **意图（Why）**：响应阶段需要请求开始时的时间戳和已加一的 Gauge；两阶段可能位于不同线程，
//!   因此状态随请求的属性袋流转，而不是放在线程局部变量里。
//! - **契约（What）**：
//!   - 请求阶段无论路由是否解析成功都会写入一份 [`RequestContext`]；解析失败时不带埋点信息；
//!   - 响应阶段通过 [`RequestLifecycle::take`] 取出，恰好一次；
//!   - 从未到达响应阶段的请求，其 Gauge 增量不会被回收（已知局限）。

use std::sync::Arc;

use crate::{
    gauge::Gauge,
    properties::{RequestProperties, RequestPropertiesExt},
    route::ResolvedRoute,
    tags::RouteTagSets,
};

/// 路由解析成功时由请求阶段产出的埋点状态。
#[derive(Debug)]
pub struct RouteInstrumentation {
    route: ResolvedRoute,
    tags: Arc<RouteTagSets>,
    route_gauge: Arc<Gauge>,
    total_gauge: Arc<Gauge>,
}

impl RouteInstrumentation {
    pub(crate) fn new(
        route: ResolvedRoute,
        tags: Arc<RouteTagSets>,
        route_gauge: Arc<Gauge>,
        total_gauge: Arc<Gauge>,
    ) -> Self {
        Self {
            route,
            tags,
            route_gauge,
            total_gauge,
        }
    }

    pub fn route(&self) -> &ResolvedRoute {
        &self.route
    }

    pub fn tags(&self) -> &RouteTagSets {
        &self.tags
    }

    pub fn route_gauge(&self) -> &Arc<Gauge> {
        &self.route_gauge
    }

    pub fn total_gauge(&self) -> &Arc<Gauge> {
        &self.total_gauge
    }
}

/// 一次请求从开始到响应的关联状态。
#[derive(Debug)]
pub struct RequestContext {
    start_millis: u64,
    start_cpu_nanos: Option<u64>,
    instrumentation: Option<RouteInstrumentation>,
}

impl RequestContext {
    pub fn new(
        start_millis: u64,
        start_cpu_nanos: Option<u64>,
        instrumentation: Option<RouteInstrumentation>,
    ) -> Self {
        Self {
            start_millis,
            start_cpu_nanos,
            instrumentation,
        }
    }

    pub fn start_millis(&self) -> u64 {
        self.start_millis
    }

    pub fn start_cpu_nanos(&self) -> Option<u64> {
        self.start_cpu_nanos
    }

    pub fn instrumentation(&self) -> Option<&RouteInstrumentation> {
        self.instrumentation.as_ref()
    }

    pub fn into_instrumentation(self) -> Option<RouteInstrumentation> {
        self.instrumentation
    }
}

/// 属性袋上的存取入口。
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestLifecycle;

impl RequestLifecycle {
    pub fn stash(properties: &dyn RequestProperties, context: RequestContext) {
        properties.insert_typed(context);
    }

    pub fn take(properties: &dyn RequestProperties) -> Option<RequestContext> {
        properties.take_typed::<RequestContext>()
    }

    pub fn is_pending(properties: &dyn RequestProperties) -> bool {
        properties.contains_typed::<RequestContext>()
    }
}
