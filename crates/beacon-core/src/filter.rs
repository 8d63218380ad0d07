//! 宿主可见的埋点过滤器。
//!
//! # 教案式说明
//! - **意图（Why）**：宿主只需在请求进入、响应写出、异步完成三个时机调用过滤器；路由解析、
//!   Gauge 维护、指标扇出与 Span 收尾都在内部编排。
//! - **逻辑（How）**：
//!   1. `on_request` 记录起始时间，解析路由；成功则开启 Span（若配置了追踪）并让在途 Gauge 加一；
//!      结果统一写入属性袋；
//!   2. `on_response` 先收尾 Span 并回写 Span 名称响应头，再取出上下文、计算耗时并交给发射器；
//!   3. `on_async_completion` 只处理失败与超时：以错误标注收尾仍活动的 Span。
//! - **契约（What）**：三个钩子都不会向宿主传播错误或 panic；失败以 `tracing::error!` 记录并附带错误码。
//! - **风险（Trade-offs）**：panic 边界依赖 `panic = "unwind"`；以 `abort` 构建的宿主无法享受该保护。

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use crate::{
    clock::{Clock, SystemClock},
    emitter::{AggregationEmitter, ResponseTimings},
    error::{BeaconError, Result},
    exchange::{AsyncOutcome, RequestExchange, ResponseExchange},
    identity::ApplicationIdentity,
    keys::span as span_keys,
    lifecycle::{RequestContext, RequestLifecycle},
    route::RouteNameResolver,
    sink::MetricSink,
    trace::{TraceCorrelator, Tracer},
};

/// 请求生命周期埋点过滤器。
pub struct InstrumentationFilter {
    emitter: AggregationEmitter,
    tracing: Option<TraceCorrelator>,
    clock: Arc<dyn Clock>,
}

impl InstrumentationFilter {
    pub fn builder(
        sink: Arc<dyn MetricSink>,
        identity: ApplicationIdentity,
    ) -> InstrumentationFilterBuilder {
        InstrumentationFilterBuilder {
            sink,
            identity,
            tracer: None,
            clock: None,
        }
    }

    pub fn identity(&self) -> &ApplicationIdentity {
        self.emitter.identity()
    }

    pub fn emitter(&self) -> &AggregationEmitter {
        &self.emitter
    }

    pub fn is_tracing_enabled(&self) -> bool {
        self.tracing.is_some()
    }

    /// 请求进入时调用。
    pub fn on_request(&self, request: &dyn RequestExchange) {
        guarded("request", || self.handle_request(request));
    }

    /// 响应写出前调用。
    pub fn on_response(&self, request: &dyn RequestExchange, response: &mut dyn ResponseExchange) {
        guarded("response", || self.handle_response(request, response));
    }

    /// 异步处理终结时由宿主的完成监听器调用。
    pub fn on_async_completion(&self, request: &dyn RequestExchange, outcome: AsyncOutcome) {
        guarded("async_completion", || {
            self.handle_async_completion(request, &outcome)
        });
    }

    fn handle_request(&self, request: &dyn RequestExchange) -> Result<()> {
        let start_millis = self.clock.now_millis();
        let start_cpu_nanos = self.clock.thread_cpu_nanos();

        let resolved = request
            .route_match()
            .and_then(|route| RouteNameResolver::resolve(request.method(), &route));
        let instrumentation = match resolved {
            Some(route) => {
                if let Some(correlator) = &self.tracing {
                    correlator.start(request, &route);
                }
                Some(self.emitter.begin(route))
            }
            None => {
                tracing::trace!(method = request.method(), "request has no resolvable route");
                None
            }
        };

        RequestLifecycle::stash(
            request.properties(),
            RequestContext::new(start_millis, start_cpu_nanos, instrumentation),
        );
        Ok(())
    }

    fn handle_response(
        &self,
        request: &dyn RequestExchange,
        response: &mut dyn ResponseExchange,
    ) -> Result<()> {
        let status = response.status();
        if let Some(correlator) = &self.tracing {
            correlator.finish_response(request.properties(), status);
        }

        let Some(context) = RequestLifecycle::take(request.properties()) else {
            return match request
                .route_match()
                .and_then(|route| RouteNameResolver::resolve(request.method(), &route))
            {
                Some(route) => Err(BeaconError::MissingRequestContext {
                    route: route.request_name(),
                }),
                None => Ok(()),
            };
        };

        let end_millis = self.clock.now_millis();
        let end_cpu_nanos = self.clock.thread_cpu_nanos();
        let timings = ResponseTimings {
            latency_millis: end_millis.saturating_sub(context.start_millis()),
            cpu_nanos: match (context.start_cpu_nanos(), end_cpu_nanos) {
                (Some(start), Some(end)) => end.saturating_sub(start),
                _ => 0,
            },
        };

        let Some(instrumentation) = context.into_instrumentation() else {
            return Ok(());
        };
        if self.tracing.is_some() {
            response.append_header(
                span_keys::SPAN_NAME_HEADER,
                instrumentation.route().matched_path(),
            );
        }
        self.emitter.complete(&instrumentation, status, timings);
        Ok(())
    }

    fn handle_async_completion(
        &self,
        request: &dyn RequestExchange,
        outcome: &AsyncOutcome,
    ) -> Result<()> {
        let (Some(correlator), Some(reason)) = (&self.tracing, outcome.failure_reason()) else {
            return Ok(());
        };
        if correlator.finish_failed(request.properties(), reason) {
            tracing::debug!(reason, "span finished by async completion listener");
        }
        Ok(())
    }
}

impl std::fmt::Debug for InstrumentationFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationFilter")
            .field("emitter", &self.emitter)
            .field("tracing", &self.tracing.is_some())
            .finish_non_exhaustive()
    }
}

/// [`InstrumentationFilter`] 构建器。
pub struct InstrumentationFilterBuilder {
    sink: Arc<dyn MetricSink>,
    identity: ApplicationIdentity,
    tracer: Option<Arc<dyn Tracer>>,
    clock: Option<Arc<dyn Clock>>,
}

impl InstrumentationFilterBuilder {
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_optional_tracer(mut self, tracer: Option<Arc<dyn Tracer>>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> InstrumentationFilter {
        InstrumentationFilter {
            emitter: AggregationEmitter::new(self.sink, Arc::new(self.identity)),
            tracing: self.tracer.map(TraceCorrelator::new),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
        }
    }
}

fn guarded(phase: &'static str, work: impl FnOnce() -> Result<()>) {
    let outcome = match catch_unwind(AssertUnwindSafe(work)) {
        Ok(result) => result,
        Err(payload) => Err(BeaconError::Panicked {
            phase,
            detail: panic_detail(payload.as_ref()),
        }),
    };
    if let Err(err) = outcome {
        tracing::error!(phase, code = err.code(), error = %err, "instrumentation failed");
    }
}

fn panic_detail(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
