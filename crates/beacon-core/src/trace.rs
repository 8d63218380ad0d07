//! 请求级 Span 的创建、装饰与收尾。
//!
//! # 教案式说明
//! - **意图（Why）**：每个可路由的请求对应恰好一个服务端 Span，它既要能继承上游进程传来的追踪上下文，
//!   也要在异步处理失败、超时等非常规路径上被可靠关闭。
//! - **逻辑（How）**：
//!   1. [`Tracer`] 抽象具体追踪后端，只暴露“建 Span / 提取上游上下文 / 读取当前活动 Span”三项能力；
//!   2. [`TraceCorrelator::start`] 选择父上下文（活动 Span 优先，其次请求头），建 Span 后以
//!      [`SpanSlot`] 放入属性袋；
//!   3. 响应钩子与异步完成监听器都可能尝试收尾，[`SpanSlot`] 用一次 CAS 保证只有第一个成功。
//! - **契约（What）**：状态机 `NotStarted → Active → Finished`，`Finished` 为终态；
//!   Span 一旦进入 `Finished` 后的任何装饰或收尾调用都是空操作。
//! - **风险（Trade-offs）**：Span 本体以互斥锁保护，只在收尾时加锁一次，热路径代价可忽略。

use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{
    exchange::{HeaderCarrier, RequestExchange},
    keys::{span as span_keys, tags},
    properties::{RequestProperties, RequestPropertiesExt},
    route::ResolvedRoute,
    sync::{AtomicU8, Ordering},
};

/// 与后端无关的 Span 上下文，足以表达 W3C `traceparent` / `tracestate`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: [u8; 16],
    span_id: [u8; 8],
    trace_flags: u8,
    trace_state: String,
    remote: bool,
}

impl SpanContext {
    pub fn new(trace_id: [u8; 16], span_id: [u8; 8], trace_flags: u8) -> Self {
        Self {
            trace_id,
            span_id,
            trace_flags,
            trace_state: String::new(),
            remote: false,
        }
    }

    pub fn with_trace_state(mut self, trace_state: impl Into<String>) -> Self {
        self.trace_state = trace_state.into();
        self
    }

    pub fn with_remote(mut self, remote: bool) -> Self {
        self.remote = remote;
        self
    }

    pub fn trace_id(&self) -> [u8; 16] {
        self.trace_id
    }

    pub fn span_id(&self) -> [u8; 8] {
        self.span_id
    }

    pub fn trace_flags(&self) -> u8 {
        self.trace_flags
    }

    pub fn trace_state(&self) -> &str {
        &self.trace_state
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Trace ID 与 Span ID 均非全零。
    pub fn is_valid(&self) -> bool {
        self.trace_id != [0; 16] && self.span_id != [0; 8]
    }
}

/// Span 属性值。
#[derive(Clone, Debug, PartialEq)]
pub enum TagValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Str(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Str(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Int(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

/// 建 Span 所需的全部参数。
#[derive(Clone, Debug, PartialEq)]
pub struct SpanStart {
    pub name: String,
    pub parent: Option<SpanContext>,
    pub tags: Vec<(&'static str, TagValue)>,
}

/// 一个已开始、尚未结束的服务端 Span。
pub trait ServerSpan: Send {
    fn set_tag(&mut self, key: &'static str, value: TagValue);

    /// 标记错误：设置 `error=true` 并记录描述。
    fn set_error(&mut self, description: &str);

    fn finish(self: Box<Self>);
}

/// 追踪后端。
pub trait Tracer: Send + Sync {
    fn start_span(&self, start: SpanStart) -> Box<dyn ServerSpan>;

    /// 从入站请求头提取上游上下文。
    fn extract(&self, headers: &dyn HeaderCarrier) -> Option<SpanContext>;

    /// 当前执行上下文中处于活动状态的 Span。
    fn active_span_context(&self) -> Option<SpanContext>;
}

/// Span 生命周期阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SpanPhase {
    NotStarted = 0,
    Active = 1,
    Finished = 2,
}

impl SpanPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SpanPhase::NotStarted,
            1 => SpanPhase::Active,
            _ => SpanPhase::Finished,
        }
    }
}

/// 以原子字节实现的单向状态机。
#[derive(Debug)]
pub struct PhaseCell {
    phase: AtomicU8,
}

impl PhaseCell {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(SpanPhase::NotStarted as u8),
        }
    }

    pub fn phase(&self) -> SpanPhase {
        SpanPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// `NotStarted → Active`，仅第一次调用成功。
    pub fn activate(&self) -> bool {
        self.transition(SpanPhase::NotStarted, SpanPhase::Active)
    }

    /// `Active → Finished`，仅第一次调用成功。
    pub fn finish(&self) -> bool {
        self.transition(SpanPhase::Active, SpanPhase::Finished)
    }

    fn transition(&self, from: SpanPhase, to: SpanPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for PhaseCell {
    fn default() -> Self {
        Self::new()
    }
}

/// 属性袋中保存的 Span 槽位，响应钩子与异步监听器共享同一份。
pub struct SpanSlot {
    phase: PhaseCell,
    span: Mutex<Option<Box<dyn ServerSpan>>>,
    matched_path: String,
}

impl SpanSlot {
    fn active(span: Box<dyn ServerSpan>, matched_path: String) -> Self {
        let phase = PhaseCell::new();
        phase.activate();
        Self {
            phase,
            span: Mutex::new(Some(span)),
            matched_path,
        }
    }

    pub fn phase(&self) -> SpanPhase {
        self.phase.phase()
    }

    pub fn matched_path(&self) -> &str {
        &self.matched_path
    }

    /// 装饰并结束 Span；返回是否由本次调用完成收尾。
    pub fn finish_with(&self, decorate: impl FnOnce(&mut dyn ServerSpan)) -> bool {
        if !self.phase.finish() {
            return false;
        }
        if let Some(mut span) = self.span.lock().take() {
            decorate(span.as_mut());
            span.finish();
        }
        true
    }
}

impl fmt::Debug for SpanSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanSlot")
            .field("phase", &self.phase())
            .field("matched_path", &self.matched_path)
            .finish()
    }
}

/// 属性袋中的键类型。
#[derive(Clone, Debug)]
struct SharedSpan(Arc<SpanSlot>);

/// 状态码是否属于错误区间 `[400, 599]`。
pub fn is_error_status(status: u16) -> bool {
    (400..=599).contains(&status)
}

/// 请求与 Span 的一对一关联器。
pub struct TraceCorrelator {
    tracer: Arc<dyn Tracer>,
}

impl TraceCorrelator {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }

    /// 建立服务端 Span 并放入属性袋。
    ///
    /// # 教案式说明
    /// - **逻辑（How）**：父上下文优先取后端的活动 Span，其次从请求头提取，都没有则作为根 Span；
    ///   名称为 `<SimpleClassName>.<method>`。
    /// - **契约（What）**：只应在路由解析成功后调用；重复调用会覆盖属性袋中的旧槽位，旧 Span 将随
    ///   槽位析构而不再被收尾，因此宿主必须保证每个请求只触发一次请求钩子。
    pub fn start(&self, request: &dyn RequestExchange, route: &ResolvedRoute) -> Arc<SpanSlot> {
        let parent = self
            .tracer
            .active_span_context()
            .or_else(|| self.tracer.extract(request.headers()));

        let mut start_tags: Vec<(&'static str, TagValue)> = vec![
            (span_keys::KIND, span_keys::KIND_SERVER.into()),
            (
                tags::RESOURCE_CLASS,
                route.identity().resource_class().into(),
            ),
            (span_keys::RESOURCE_PATH, route.matched_path().into()),
            (span_keys::COMPONENT, span_keys::SERVER_COMPONENT.into()),
            (span_keys::HTTP_METHOD, request.method().into()),
        ];
        if let Some(url) = request.request_url() {
            start_tags.push((span_keys::HTTP_URL, url.into()));
        }

        let span = self.tracer.start_span(SpanStart {
            name: route.identity().span_name(),
            parent,
            tags: start_tags,
        });
        let slot = Arc::new(SpanSlot::active(span, route.matched_path().to_string()));
        request
            .properties()
            .insert_typed(SharedSpan(Arc::clone(&slot)));
        slot
    }

    /// 响应阶段：取出槽位、写入状态码并收尾。
    ///
    /// 返回 `true` 表示本次调用结束了 Span。
    pub fn finish_response(&self, properties: &dyn RequestProperties, status: u16) -> bool {
        let Some(SharedSpan(slot)) = properties.take_typed::<SharedSpan>() else {
            return false;
        };
        slot.finish_with(|span| {
            span.set_tag(span_keys::HTTP_STATUS_CODE, i64::from(status).into());
            if is_error_status(status) {
                span.set_tag(span_keys::ERROR, true.into());
            }
        })
    }

    /// 异步失败或超时：以错误标注收尾仍处于活动状态的 Span。
    pub fn finish_failed(&self, properties: &dyn RequestProperties, reason: &str) -> bool {
        let Some(SharedSpan(slot)) = properties.get_cloned::<SharedSpan>() else {
            return false;
        };
        slot.finish_with(|span| span.set_error(reason))
    }

    /// 查看属性袋中的槽位（不取出）。
    pub fn slot(&self, properties: &dyn RequestProperties) -> Option<Arc<SpanSlot>> {
        properties
            .get_cloned::<SharedSpan>()
            .map(|SharedSpan(slot)| slot)
    }
}

impl fmt::Debug for TraceCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceCorrelator").finish_non_exhaustive()
    }
}

#[cfg(all(test, not(all(feature = "loom-model", any(loom, beacon_loom)))))]
mod tests {
    use super::*;
    use crate::{
        identity::RouteIdentity,
        route::{RouteMatch, RouteNameResolver, RouteTemplate},
        test_stubs::{RecordingTracer, StubExchange},
    };

    fn resolved() -> ResolvedRoute {
        RouteNameResolver::resolve(
            "GET",
            &RouteMatch::new(
                RouteTemplate::new("/sample/foo/bar/{id}"),
                RouteIdentity::new("com.acme.SampleResource", "barGet"),
            ),
        )
        .expect("应可解析")
    }

    #[test]
    fn phase_cell_transitions_once() {
        let cell = PhaseCell::new();
        assert_eq!(cell.phase(), SpanPhase::NotStarted);
        assert!(!cell.finish(), "未开始的 Span 不能直接结束");
        assert!(cell.activate());
        assert!(!cell.activate());
        assert!(cell.finish());
        assert!(!cell.finish());
        assert_eq!(cell.phase(), SpanPhase::Finished);
    }

    #[test]
    fn span_start_prefers_active_context_over_headers() {
        let tracer = Arc::new(RecordingTracer::default());
        let active = SpanContext::new([1; 16], [2; 8], 1);
        let extracted = SpanContext::new([3; 16], [4; 8], 1);
        tracer.set_active(Some(active.clone()));
        tracer.set_extracted(Some(extracted.clone()));
        let correlator = TraceCorrelator::new(tracer.clone());

        let exchange = StubExchange::new("GET", Some("/sample/foo/bar/{id}"));
        correlator.start(&exchange, &resolved());
        assert_eq!(tracer.started()[0].parent, Some(active));

        tracer.set_active(None);
        let exchange = StubExchange::new("GET", Some("/sample/foo/bar/{id}"));
        correlator.start(&exchange, &resolved());
        assert_eq!(tracer.started()[1].parent, Some(extracted));
    }

    #[test]
    fn span_carries_server_tags_and_simple_name() {
        let tracer = Arc::new(RecordingTracer::default());
        let correlator = TraceCorrelator::new(tracer.clone());
        let exchange = StubExchange::new("GET", Some("/sample/foo/bar/{id}"))
            .with_url("http://localhost/sample/foo/bar/7");

        correlator.start(&exchange, &resolved());
        let started = tracer.started();
        let span = &started[0];
        assert_eq!(span.name, "SampleResource.barGet");
        assert!(span.tags.contains(&("span.kind", TagValue::from("server"))));
        assert!(span.tags.contains(&("component", TagValue::from("jersey-server"))));
        assert!(span.tags.contains(&("jersey.path", TagValue::from("/sample/foo/bar/{id}"))));
        assert!(span.tags.contains(&(
            "http.url",
            TagValue::from("http://localhost/sample/foo/bar/7")
        )));
    }

    #[test]
    fn error_response_marks_span_and_finishes_once() {
        let tracer = Arc::new(RecordingTracer::default());
        let correlator = TraceCorrelator::new(tracer.clone());
        let exchange = StubExchange::new("GET", Some("/sample/foo/bar/{id}"));

        let slot = correlator.start(&exchange, &resolved());
        assert_eq!(slot.phase(), SpanPhase::Active);
        assert!(correlator.finish_response(exchange.properties(), 503));
        assert!(!correlator.finish_response(exchange.properties(), 503));
        assert!(!correlator.finish_failed(exchange.properties(), "late"));

        let finished = tracer.finished();
        assert_eq!(finished.len(), 1, "Span 只能结束一次");
        assert!(finished[0].tags.contains(&("http.status_code", TagValue::Int(503))));
        assert!(finished[0].tags.contains(&("error", TagValue::Bool(true))));
        assert_eq!(slot.phase(), SpanPhase::Finished);
    }

    #[test]
    fn async_failure_wins_over_later_response() {
        let tracer = Arc::new(RecordingTracer::default());
        let correlator = TraceCorrelator::new(tracer.clone());
        let exchange = StubExchange::new("GET", Some("/sample/foo/bar/{id}"));

        correlator.start(&exchange, &resolved());
        assert!(correlator.finish_failed(exchange.properties(), "handler failed"));
        assert!(!correlator.finish_response(exchange.properties(), 200));

        let finished = tracer.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].error.as_deref(), Some("handler failed"));
    }
}
