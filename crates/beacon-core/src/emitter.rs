//! 响应事件到多粒度指标的扇出。
//!
//! # 教案式说明
//! - **意图（Why）**：一次响应需要同时更新路由级累计值、各粒度的 delta 计数、错误与完成总量、
//!   延迟与 CPU 直方图；这些规则集中在一个发射器里，过滤器只负责编排时机。
//! - **逻辑（How）**：
//!   1. 请求阶段 [`AggregationEmitter::begin`] 取得（或首次创建）路由级与全局在途 Gauge 并加一；
//!   2. 响应阶段 [`AggregationEmitter::complete`] 减一后依次发射：
//!      - `<resp>.cumulative`（完整路由标签）与各粒度 `<resp>.aggregated_per_*` delta；
//!      - 状态码属于 `[400, 599]` 时：`<resp-base>.errors`、`response.errors`、
//!        `response.errors.aggregated_per_source` 以及 `response.errors.aggregated_per_*` delta；
//!      - 总是发射 `response.completed.aggregated_per_source` 与 `response.completed.aggregated_per_*` delta；
//!      - 直方图 `<resp>.latency`、`<resp>.cpu_ns` 与计数 `<resp>.total_time`。
//!   3. shard、cluster 粒度只在身份配置了对应维度时发射。
//! - **契约（What）**：同一响应内的各项更新互相独立、可交换，顺序不构成契约。
//! - **风险（Trade-offs）**：路由标签集合按资源身份缓存，条目数与路由数同阶，不做淘汰。

use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    gauge::GaugeRegistry,
    identity::{ApplicationIdentity, MetricIdentity, RouteIdentity, TagSet},
    keys::metrics,
    lifecycle::RouteInstrumentation,
    route::ResolvedRoute,
    sink::MetricSink,
    tags::{AggregationPolicy, Granularity, OverallTagSets, RouteTagSets, TagSetBuilder},
    trace::is_error_status,
};

/// 一次响应的耗时读数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResponseTimings {
    /// 墙钟耗时（毫秒）。
    pub latency_millis: u64,
    /// 线程 CPU 耗时（纳秒）；平台不支持时为 0。
    pub cpu_nanos: u64,
}

/// 聚合指标发射器。
pub struct AggregationEmitter {
    sink: Arc<dyn MetricSink>,
    gauges: GaugeRegistry,
    identity: Arc<ApplicationIdentity>,
    policy: AggregationPolicy,
    overall: OverallTagSets,
    route_tags: DashMap<RouteIdentity, Arc<RouteTagSets>>,
}

impl AggregationEmitter {
    pub fn new(sink: Arc<dyn MetricSink>, identity: Arc<ApplicationIdentity>) -> Self {
        let builder = TagSetBuilder::new(&identity);
        let policy = builder.policy();
        let overall = builder.overall_tag_sets();
        Self {
            gauges: GaugeRegistry::new(Arc::clone(&sink)),
            sink,
            identity,
            policy,
            overall,
            route_tags: DashMap::new(),
        }
    }

    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    pub fn gauges(&self) -> &GaugeRegistry {
        &self.gauges
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    /// 路由的标签集合，首次访问时构建并缓存。
    pub fn route_tags(&self, route: &RouteIdentity) -> Arc<RouteTagSets> {
        if let Some(existing) = self.route_tags.get(route) {
            return Arc::clone(existing.value());
        }
        let built = Arc::new(TagSetBuilder::new(&self.identity).route_tag_sets(route));
        Arc::clone(
            self.route_tags
                .entry(route.clone())
                .or_insert(built)
                .value(),
        )
    }

    /// 请求阶段：两个在途 Gauge 加一。
    pub fn begin(&self, route: ResolvedRoute) -> RouteInstrumentation {
        let tags = self.route_tags(route.identity());

        let route_gauge = self.gauges.get_or_create(&MetricIdentity::new(
            route.inflight_name(),
            tags.complete().clone(),
        ));
        route_gauge.increment();

        let total_gauge = self.gauges.get_or_create(&MetricIdentity::new(
            metrics::TOTAL_INFLIGHT,
            self.overall.per_source().clone(),
        ));
        total_gauge.increment();

        RouteInstrumentation::new(route, tags, route_gauge, total_gauge)
    }

    /// 响应阶段：Gauge 减一并扇出全部响应指标。
    pub fn complete(
        &self,
        instrumentation: &RouteInstrumentation,
        status: u16,
        timings: ResponseTimings,
    ) {
        let route = instrumentation.route();
        if !instrumentation.route_gauge().decrement() {
            tracing::error!(
                route = %route.inflight_name(),
                "inflight gauge already at zero; request/response hooks are unbalanced"
            );
        }
        if !instrumentation.total_gauge().decrement() {
            tracing::error!(
                gauge = metrics::TOTAL_INFLIGHT,
                "inflight gauge already at zero; request/response hooks are unbalanced"
            );
        }

        let tags = instrumentation.tags();
        let response_name = route.response_name(status);
        self.emit_route_counters(&response_name, tags);
        if is_error_status(status) {
            self.emit_errors(route, tags);
        }
        self.emit_overall(metrics::RESPONSE_COMPLETED);
        self.emit_timings(&response_name, tags.complete(), timings);
    }

    fn emit_route_counters(&self, response_name: &str, tags: &RouteTagSets) {
        self.counter(
            format!("{response_name}{}", metrics::CUMULATIVE_SUFFIX),
            tags.complete(),
        );
        for granularity in self.emitted_granularities() {
            self.delta(
                format!("{response_name}{}", granularity.suffix()),
                tags.aggregated(granularity),
            );
        }
    }

    fn emit_errors(&self, route: &ResolvedRoute, tags: &RouteTagSets) {
        self.counter(
            format!("{}{}", route.response_base(), metrics::ERRORS_SUFFIX),
            tags.complete(),
        );
        self.counter(metrics::RESPONSE_ERRORS.to_string(), tags.complete());
        self.emit_overall(metrics::RESPONSE_ERRORS);
    }

    /// `<root>.aggregated_per_source` 计数加各粒度 delta。
    fn emit_overall(&self, root: &str) {
        self.counter(
            format!("{root}{}", metrics::AGGREGATED_PER_SOURCE_SUFFIX),
            self.overall.per_source(),
        );
        for granularity in self.emitted_granularities() {
            self.delta(
                format!("{root}{}", granularity.suffix()),
                self.overall.aggregated(granularity),
            );
        }
    }

    fn emit_timings(&self, response_name: &str, complete: &TagSet, timings: ResponseTimings) {
        self.sink.update_histogram(
            &MetricIdentity::new(
                format!("{response_name}{}", metrics::CPU_NS_SUFFIX),
                complete.clone(),
            ),
            timings.cpu_nanos,
        );
        self.sink.update_histogram(
            &MetricIdentity::new(
                format!("{response_name}{}", metrics::LATENCY_SUFFIX),
                complete.clone(),
            ),
            timings.latency_millis,
        );
        self.sink.increment_counter_by(
            &MetricIdentity::new(
                format!("{response_name}{}", metrics::TOTAL_TIME_SUFFIX),
                complete.clone(),
            ),
            timings.latency_millis,
        );
    }

    fn emitted_granularities(&self) -> impl Iterator<Item = Granularity> + '_ {
        Granularity::ALL
            .into_iter()
            .filter(|granularity| self.policy.emits(*granularity))
    }

    fn counter(&self, name: String, tags: &TagSet) {
        self.sink
            .increment_counter(&MetricIdentity::new(name, tags.clone()));
    }

    fn delta(&self, name: String, tags: &TagSet) {
        self.sink
            .increment_delta_counter(&MetricIdentity::new(name, tags.clone()));
    }
}

impl std::fmt::Debug for AggregationEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationEmitter")
            .field("identity", &self.identity)
            .field("policy", &self.policy)
            .field("gauges", &self.gauges)
            .finish_non_exhaustive()
    }
}
