//! [`beacon_core::Tracer`] 的 OpenTelemetry 实现。
//!
//! # 教案式说明
//! - **意图（Why）**：核心引擎以与后端无关的 [`SpanStart`] 描述一个服务端 Span；这里负责把它落成
//!   OpenTelemetry SDK 的 Span，并在两种上下文表示之间互转。
//! - **逻辑（How）**：
//!   1. 父上下文转换为带远程 SpanContext 的 [`Context`]，交给 `build_with_context`；
//!   2. 标签逐条映射为 [`KeyValue`]，`span.kind=server` 同时落到 [`SpanKind::Server`]；
//!   3. 活动 Span 先查 `tracing` 当前 Span 关联的 OpenTelemetry 上下文，再查 OpenTelemetry 自身的当前上下文。
//! - **风险（Trade-offs）**：TraceState 校验失败时放弃父上下文并以根 Span 继续，只记录一条告警，
//!   不让追踪问题影响请求处理。

use opentelemetry::{
    Context, KeyValue,
    propagation::TextMapPropagator,
    trace::{
        self as otel_trace, Span as _, SpanContext as OtelSpanContext, SpanKind, Status,
        TraceContextExt as _, Tracer as _, TracerProvider as _,
    },
};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{Span, Tracer, TracerProvider},
};
use tracing_opentelemetry::OpenTelemetrySpanExt as _;

use beacon_core::{
    HeaderCarrier, ServerSpan, SpanContext, SpanStart, TagValue,
    keys::span as span_keys,
};

use crate::{Error, INSTRUMENTATION_SCOPE, propagation::HeaderExtractor};

/// OpenTelemetry 追踪后端。
///
/// 持有 Provider 的克隆：SDK Tracer 只弱引用 Provider，Provider 释放后建出的 Span 不会被导出。
#[derive(Clone)]
pub struct OtelTracer {
    provider: TracerProvider,
    tracer: Tracer,
    propagator: TraceContextPropagator,
}

impl OtelTracer {
    pub fn from_provider(provider: TracerProvider) -> Self {
        let tracer = provider.versioned_tracer(
            INSTRUMENTATION_SCOPE,
            Some(env!("CARGO_PKG_VERSION")),
            None::<&'static str>,
            None,
        );
        Self {
            provider,
            tracer,
            propagator: TraceContextPropagator::new(),
        }
    }

    pub fn provider(&self) -> &TracerProvider {
        &self.provider
    }

    fn parent_context(parent: Option<&SpanContext>) -> Context {
        let Some(parent) = parent else {
            return Context::new();
        };
        span_context_to_otel(parent).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "discarding unusable parent span context");
            Context::new()
        })
    }
}

impl beacon_core::Tracer for OtelTracer {
    fn start_span(&self, start: SpanStart) -> Box<dyn ServerSpan> {
        let parent = Self::parent_context(start.parent.as_ref());

        let mut builder = self.tracer.span_builder(start.name);
        builder.span_kind = Some(span_kind_of(&start.tags));
        builder.attributes = Some(
            start
                .tags
                .into_iter()
                .map(|(key, value)| key_value(key, value))
                .collect(),
        );
        let span = self.tracer.build_with_context(builder, &parent);
        Box::new(OtelServerSpan::new(span))
    }

    fn extract(&self, headers: &dyn HeaderCarrier) -> Option<SpanContext> {
        let context = self.propagator.extract(&HeaderExtractor::new(headers));
        let span = context.span();
        let remote = span.span_context();
        remote
            .is_valid()
            .then(|| span_context_from_otel(remote))
    }

    fn active_span_context(&self) -> Option<SpanContext> {
        let from_tracing = tracing::Span::current().context();
        let span = from_tracing.span();
        if span.span_context().is_valid() {
            return Some(span_context_from_otel(span.span_context()));
        }

        let current = Context::current();
        let span = current.span();
        span.span_context()
            .is_valid()
            .then(|| span_context_from_otel(span.span_context()))
    }
}

impl std::fmt::Debug for OtelTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtelTracer")
            .field("scope", &INSTRUMENTATION_SCOPE)
            .finish_non_exhaustive()
    }
}

/// 已开始的 OpenTelemetry 服务端 Span。
pub struct OtelServerSpan {
    span: Span,
}

impl OtelServerSpan {
    fn new(span: Span) -> Self {
        Self { span }
    }

    pub fn span_context(&self) -> SpanContext {
        span_context_from_otel(self.span.span_context())
    }
}

impl ServerSpan for OtelServerSpan {
    fn set_tag(&mut self, key: &'static str, value: TagValue) {
        self.span.set_attribute(key_value(key, value));
    }

    fn set_error(&mut self, description: &str) {
        self.span.set_attribute(KeyValue::new(span_keys::ERROR, true));
        self.span.set_status(Status::error(description.to_string()));
    }

    fn finish(mut self: Box<Self>) {
        self.span.end();
    }
}

fn key_value(key: &'static str, value: TagValue) -> KeyValue {
    match value {
        TagValue::Str(text) => KeyValue::new(key, text),
        TagValue::Int(number) => KeyValue::new(key, number),
        TagValue::Bool(flag) => KeyValue::new(key, flag),
    }
}

fn span_kind_of(tags: &[(&'static str, TagValue)]) -> SpanKind {
    let server = tags.iter().any(|(key, value)| {
        *key == span_keys::KIND
            && matches!(value, TagValue::Str(kind) if kind == span_keys::KIND_SERVER)
    });
    if server {
        SpanKind::Server
    } else {
        SpanKind::Internal
    }
}

pub(crate) fn span_context_to_otel(parent: &SpanContext) -> Result<Context, Error> {
    let trace_state = if parent.trace_state().is_empty() {
        otel_trace::TraceState::default()
    } else {
        parent
            .trace_state()
            .parse::<otel_trace::TraceState>()
            .map_err(|err| Error::TraceStateConversion(format!("构造 otel TraceState 失败: {err}")))?
    };

    let span_context = OtelSpanContext::new(
        otel_trace::TraceId::from_bytes(parent.trace_id()),
        otel_trace::SpanId::from_bytes(parent.span_id()),
        otel_trace::TraceFlags::new(parent.trace_flags()),
        parent.is_remote(),
        trace_state,
    );

    Ok(Context::new().with_remote_span_context(span_context))
}

pub(crate) fn span_context_from_otel(ctx: &OtelSpanContext) -> SpanContext {
    SpanContext::new(
        ctx.trace_id().to_bytes(),
        ctx.span_id().to_bytes(),
        ctx.trace_flags().to_u8(),
    )
    .with_trace_state(ctx.trace_state().header())
    .with_remote(ctx.is_remote())
}
