//! 测试桩：记录型汇聚端、记录型追踪后端、可控时钟与内存交换对象。
//!
//! # 教案式说明
//! - **意图（Why）**：单元测试、集成测试与下游适配 crate 的测试都需要观察“发出了哪些指标、建了哪些 Span”，
//!   统一的桩实现避免各处重复手写。
//! - **契约（What）**：全部桩都是线程安全的，可在并发测试中共享；记录按调用顺序保存。

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{
    clock::Clock,
    exchange::{HeaderCarrier, RequestExchange, ResponseExchange},
    gauge::Gauge,
    identity::{MetricIdentity, RouteIdentity},
    properties::{PropertyBag, RequestProperties},
    route::{RouteMatch, RouteTemplate},
    sink::MetricSink,
    trace::{ServerSpan, SpanContext, SpanStart, TagValue, Tracer},
};

/// 记录的指标种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordedKind {
    Counter,
    DeltaCounter,
    Histogram,
}

/// 一次汇聚端调用。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recorded {
    pub kind: RecordedKind,
    pub identity: MetricIdentity,
    pub value: u64,
}

/// 记录全部调用的汇聚端。
#[derive(Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Recorded>>,
    gauges: Mutex<Vec<(MetricIdentity, Arc<Gauge>)>>,
}

impl RecordingSink {
    pub fn records(&self) -> Vec<Recorded> {
        self.records.lock().clone()
    }

    /// 某种类下全部记录的名称（按调用顺序，可能重复）。
    pub fn names_of(&self, kind: RecordedKind) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.kind == kind)
            .map(|record| record.identity.name().to_string())
            .collect()
    }

    /// 名称以 `prefix` 开头的记录条数（不区分种类）。
    pub fn count_named_prefix(&self, prefix: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.identity.name().starts_with(prefix))
            .count()
    }

    /// 指定名称的记录（不区分种类）。
    pub fn find(&self, name: &str) -> Vec<Recorded> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.identity.name() == name)
            .cloned()
            .collect()
    }

    /// 指定名称的累计计数器总增量。
    pub fn counter_total(&self, name: &str) -> u64 {
        self.sum_of(RecordedKind::Counter, name)
    }

    /// 指定名称的 delta 计数器总增量。
    pub fn delta_total(&self, name: &str) -> u64 {
        self.sum_of(RecordedKind::DeltaCounter, name)
    }

    pub fn histogram_samples(&self, name: &str) -> Vec<u64> {
        self.records
            .lock()
            .iter()
            .filter(|record| {
                record.kind == RecordedKind::Histogram && record.identity.name() == name
            })
            .map(|record| record.value)
            .collect()
    }

    pub fn gauge_registrations(&self) -> usize {
        self.gauges.lock().len()
    }

    pub fn gauge_value(&self, identity: &MetricIdentity) -> Option<i64> {
        self.gauges
            .lock()
            .iter()
            .find(|(registered, _)| registered == identity)
            .map(|(_, gauge)| gauge.value())
    }

    /// 已注册 Gauge 的身份列表。
    pub fn registered_gauges(&self) -> Vec<MetricIdentity> {
        self.gauges
            .lock()
            .iter()
            .map(|(identity, _)| identity.clone())
            .collect()
    }

    fn sum_of(&self, kind: RecordedKind, name: &str) -> u64 {
        self.records
            .lock()
            .iter()
            .filter(|record| record.kind == kind && record.identity.name() == name)
            .map(|record| record.value)
            .sum()
    }

    fn push(&self, kind: RecordedKind, identity: &MetricIdentity, value: u64) {
        self.records.lock().push(Recorded {
            kind,
            identity: identity.clone(),
            value,
        });
    }
}

impl MetricSink for RecordingSink {
    fn increment_counter_by(&self, identity: &MetricIdentity, delta: u64) {
        self.push(RecordedKind::Counter, identity, delta);
    }

    fn increment_delta_counter(&self, identity: &MetricIdentity) {
        self.push(RecordedKind::DeltaCounter, identity, 1);
    }

    fn update_histogram(&self, identity: &MetricIdentity, value: u64) {
        self.push(RecordedKind::Histogram, identity, value);
    }

    fn register_gauge(&self, identity: &MetricIdentity, gauge: Arc<Gauge>) {
        self.gauges.lock().push((identity.clone(), gauge));
    }
}

/// 已结束 Span 的快照。
#[derive(Clone, Debug, PartialEq)]
pub struct FinishedSpan {
    pub name: String,
    pub parent: Option<SpanContext>,
    pub tags: Vec<(&'static str, TagValue)>,
    pub error: Option<String>,
}

#[derive(Default)]
struct TracerState {
    active: Option<SpanContext>,
    extracted: Option<SpanContext>,
    started: Vec<SpanStart>,
}

/// 记录型追踪后端。
#[derive(Clone, Default)]
pub struct RecordingTracer {
    state: Arc<Mutex<TracerState>>,
    finished: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl RecordingTracer {
    pub fn set_active(&self, context: Option<SpanContext>) {
        self.state.lock().active = context;
    }

    pub fn set_extracted(&self, context: Option<SpanContext>) {
        self.state.lock().extracted = context;
    }

    pub fn started(&self) -> Vec<SpanStart> {
        self.state.lock().started.clone()
    }

    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.finished.lock().clone()
    }
}

impl Tracer for RecordingTracer {
    fn start_span(&self, start: SpanStart) -> Box<dyn ServerSpan> {
        self.state.lock().started.push(start.clone());
        Box::new(RecordingSpan {
            span: FinishedSpan {
                name: start.name,
                parent: start.parent,
                tags: start.tags,
                error: None,
            },
            sink: Arc::clone(&self.finished),
        })
    }

    fn extract(&self, _headers: &dyn HeaderCarrier) -> Option<SpanContext> {
        self.state.lock().extracted.clone()
    }

    fn active_span_context(&self) -> Option<SpanContext> {
        self.state.lock().active.clone()
    }
}

struct RecordingSpan {
    span: FinishedSpan,
    sink: Arc<Mutex<Vec<FinishedSpan>>>,
}

impl ServerSpan for RecordingSpan {
    fn set_tag(&mut self, key: &'static str, value: TagValue) {
        self.span.tags.push((key, value));
    }

    fn set_error(&mut self, description: &str) {
        self.span.tags.push(("error", TagValue::Bool(true)));
        self.span.error = Some(description.to_string());
    }

    fn finish(self: Box<Self>) {
        let RecordingSpan { span, sink } = *self;
        sink.lock().push(span);
    }
}

/// 可手动推进的时钟。
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicU64,
    cpu_nanos: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
            cpu_nanos: AtomicU64::new(0),
        }
    }

    pub fn advance_millis(&self, delta: u64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn advance_cpu_nanos(&self, delta: u64) {
        self.cpu_nanos.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn thread_cpu_nanos(&self) -> Option<u64> {
        Some(self.cpu_nanos.load(Ordering::SeqCst))
    }
}

/// 内存请求交换对象。
///
/// 默认资源身份为 `com.acme.SampleResource` / `handle`，属性袋以 `Arc` 共享，可跨线程移交。
#[derive(Clone, Debug)]
pub struct StubExchange {
    method: String,
    route: Option<RouteMatch>,
    headers: BTreeMap<String, String>,
    url: Option<String>,
    properties: Arc<PropertyBag>,
}

impl StubExchange {
    pub fn new(method: &str, template: Option<&str>) -> Self {
        Self {
            method: method.to_string(),
            route: template.map(|template| {
                RouteMatch::new(
                    RouteTemplate::new(template),
                    RouteIdentity::new("com.acme.SampleResource", "handle"),
                )
            }),
            headers: BTreeMap::new(),
            url: None,
            properties: Arc::new(PropertyBag::new()),
        }
    }

    pub fn with_route(mut self, route: RouteMatch) -> Self {
        self.route = Some(route);
        self
    }

    pub fn with_resource(mut self, resource_class: &str, resource_method: &str) -> Self {
        if let Some(route) = self.route.take() {
            self.route = Some(RouteMatch::new(
                route.template().clone(),
                RouteIdentity::new(resource_class, resource_method),
            ));
        }
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = Some(url.to_string());
        self
    }

    pub fn property_bag(&self) -> &Arc<PropertyBag> {
        &self.properties
    }
}

impl RequestExchange for StubExchange {
    fn method(&self) -> &str {
        &self.method
    }

    fn route_match(&self) -> Option<RouteMatch> {
        self.route.clone()
    }

    fn headers(&self) -> &dyn HeaderCarrier {
        &self.headers
    }

    fn request_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn properties(&self) -> &dyn RequestProperties {
        self.properties.as_ref()
    }
}

/// 内存响应交换对象。
#[derive(Clone, Debug, Default)]
pub struct StubResponse {
    status: u16,
    headers: Vec<(String, String)>,
}

impl StubResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl ResponseExchange for StubResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn append_header(&mut self, name: &'static str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }
}
