#![cfg(feature = "test-util")]

use std::sync::Arc;

use beacon_core::{
    ApplicationIdentity, AsyncOutcome, InstrumentationFilter, Tracer,
    test_stubs::{RecordingSink, StubExchange, StubResponse},
};
use beacon_otel::testing;
use opentelemetry::trace::{SpanKind, Status};

const TRACEPARENT: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

fn filter_with_otel() -> (opentelemetry_sdk::trace::TracerProvider, InstrumentationFilter) {
    let (provider, tracer) = testing::local_tracer();
    let identity = ApplicationIdentity::builder("ordering", "alerting")
        .build()
        .expect("合法身份");
    let filter = InstrumentationFilter::builder(Arc::new(RecordingSink::default()), identity)
        .with_tracer(tracer as Arc<dyn Tracer>)
        .build();
    (provider, filter)
}

/// 验证服务端 Span 继承请求头中的上游上下文，并在响应阶段带着状态码与错误标注导出。
///
/// # 教案式说明
/// - **测试目标（Why）**：跨进程调用链依赖 `traceparent` 提取，服务端 Span 必须挂在上游 Span 之下。
/// - **测试设计（How）**：以内存导出器构造独立 Provider，按唯一的 Span 名称检索导出结果，
///   避免与同进程内并行的其他用例互相干扰。
#[test]
fn server_span_inherits_remote_parent_and_records_status() {
    let (provider, filter) = filter_with_otel();
    let request = StubExchange::new("POST", Some("/orders/{id}"))
        .with_resource("com.acme.OrderResource", "createOrder")
        .with_header("traceparent", TRACEPARENT)
        .with_url("http://localhost:8080/orders/7");
    let mut response = StubResponse::new(503);

    filter.on_request(&request);
    filter.on_response(&request, &mut response);
    testing::force_flush(Some(&provider));

    let span = testing::finished_span("OrderResource.createOrder").expect("Span 应已导出");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(
        span.span_context.trace_id().to_bytes()[..4],
        [0x4b, 0xf9, 0x2f, 0x35]
    );
    assert_eq!(
        span.parent_span_id.to_bytes(),
        [0x00, 0xf0, 0x67, 0xaa, 0x0b, 0xa9, 0x02, 0xb7]
    );
    assert_eq!(testing::attribute(&span, "http.status_code").as_deref(), Some("503"));
    assert_eq!(testing::attribute(&span, "error").as_deref(), Some("true"));
    assert_eq!(testing::attribute(&span, "jersey.path").as_deref(), Some("/orders/{id}"));
    assert_eq!(testing::attribute(&span, "component").as_deref(), Some("jersey-server"));
    assert_eq!(
        testing::attribute(&span, "http.url").as_deref(),
        Some("http://localhost:8080/orders/7")
    );
    assert_eq!(response.header("X-WF-SPAN-NAME"), Some("/orders/{id}"));
}

#[test]
fn successful_response_has_no_error_attribute() {
    let (provider, filter) = filter_with_otel();
    let request = StubExchange::new("GET", Some("/orders"))
        .with_resource("com.acme.OrderResource", "listOrders");

    filter.on_request(&request);
    filter.on_response(&request, &mut StubResponse::new(200));
    testing::force_flush(Some(&provider));

    let span = testing::finished_span("OrderResource.listOrders").expect("Span 应已导出");
    assert_eq!(span.parent_span_id.to_bytes(), [0; 8], "无上游上下文时应为根 Span");
    assert_eq!(testing::attribute(&span, "http.status_code").as_deref(), Some("200"));
    assert!(testing::attribute(&span, "error").is_none());
    assert!(!matches!(span.status, Status::Error { .. }));
}

#[test]
fn async_timeout_finishes_span_once_with_error_status() {
    let (provider, filter) = filter_with_otel();
    let request = StubExchange::new("GET", Some("/orders/slow"))
        .with_resource("com.acme.OrderResource", "slowOrders");

    filter.on_request(&request);
    filter.on_async_completion(&request, AsyncOutcome::TimedOut);
    filter.on_response(&request, &mut StubResponse::new(200));
    testing::force_flush(Some(&provider));

    let exported: Vec<_> = testing::finished_spans()
        .into_iter()
        .filter(|span| span.name == "OrderResource.slowOrders")
        .collect();
    assert_eq!(exported.len(), 1, "Span 只能结束一次");
    let span = &exported[0];
    assert!(matches!(span.status, Status::Error { .. }));
    assert_eq!(testing::attribute(span, "error").as_deref(), Some("true"));
    assert!(
        testing::attribute(span, "http.status_code").is_none(),
        "超时收尾之后的响应钩子不应再装饰 Span"
    );
}

#[test]
fn unroutable_request_creates_no_span() {
    let (provider, filter) = filter_with_otel();
    let request = StubExchange::new("GET", None);

    filter.on_request(&request);
    let mut response = StubResponse::new(404);
    filter.on_response(&request, &mut response);
    testing::force_flush(Some(&provider));

    assert!(response.header("X-WF-SPAN-NAME").is_none());
    assert!(
        testing::finished_span("SampleResource.handle").is_none(),
        "无法解析路由的请求不应建 Span"
    );
}
