//! `instrument` 包装在异步场景下的行为。
//!
//! # 教案式说明
//! - **测试目标（Why）**：异步宿主的请求阶段与响应阶段可能位于不同线程，future 也可能在完成前被丢弃；
//!   两种情况下指标与 Span 都必须保持一致。
//! - **测试设计（How）**：手动以 noop waker 轮询一次，让请求钩子执行、处理函数挂起在 oneshot 上；
//!   随后把 future 移交给另一线程完成，或直接丢弃。

use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    thread,
};

use beacon_core::{
    ApplicationIdentity, AsyncOutcome, InstrumentationFilter, MetricIdentity, TagSet, Tracer,
    test_stubs::{RecordingSink, RecordingTracer},
};
use beacon_http::{CompletionGuard, DetachedExchange, MatchedRoute, instrument};
use futures::{channel::oneshot, executor::block_on, task::noop_waker_ref};
use http::{Request, Response, StatusCode};

fn identity() -> ApplicationIdentity {
    ApplicationIdentity::builder("ordering", "alerting")
        .cluster("prod")
        .build()
        .expect("合法身份")
}

fn routed_request(method: &str, template: &str, handler: &str) -> Request<()> {
    let mut request = Request::builder()
        .method(method)
        .uri(format!("http://localhost{}", template.replace("{id}", "42")))
        .body(())
        .expect("合法请求");
    request
        .extensions_mut()
        .insert(MatchedRoute::new(template, "com.acme.OrderResource", handler));
    request
}

fn route_gauge(method: &str, path: &str, handler: &str) -> MetricIdentity {
    MetricIdentity::new(
        format!("request.{path}.{method}.inflight"),
        TagSet::from_pairs([
            ("cluster", "prod"),
            ("service", "alerting"),
            ("shard", "none"),
            ("jersey.resource.class", "com.acme.OrderResource"),
            ("jersey.resource.method", handler),
        ]),
    )
}

fn poll_once<F: Future>(future: Pin<&mut F>) -> Poll<F::Output> {
    future.poll(&mut Context::from_waker(noop_waker_ref()))
}

#[test]
fn synchronous_handler_emits_metrics_and_span_header() {
    let sink = Arc::new(RecordingSink::default());
    let tracer = RecordingTracer::default();
    let filter = InstrumentationFilter::builder(sink.clone(), identity())
        .with_tracer(Arc::new(tracer.clone()) as Arc<dyn Tracer>)
        .build();

    let response = block_on(instrument(
        &filter,
        routed_request("GET", "/orders/{id}", "getOrder"),
        |_request| async {
            Response::builder()
                .status(StatusCode::OK)
                .body(())
                .expect("合法响应")
        },
    ));

    assert_eq!(
        response
            .headers()
            .get("x-wf-span-name")
            .and_then(|value| value.to_str().ok()),
        Some("/orders/{id}")
    );
    assert_eq!(sink.find("response.orders._id_.GET.200.cumulative").len(), 1);
    assert_eq!(
        sink.gauge_value(&route_gauge("GET", "orders._id_", "getOrder")),
        Some(0)
    );

    let finished = tracer.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].name, "OrderResource.getOrder");
}

#[test]
fn response_phase_completes_on_another_thread() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), identity()).build();
    let (tx, rx) = oneshot::channel::<StatusCode>();

    let mut future = Box::pin(instrument(
        &filter,
        routed_request("POST", "/orders", "createOrder"),
        |_request| async move {
            let status = rx.await.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Response::builder().status(status).body(()).expect("合法响应")
        },
    ));

    assert!(poll_once(future.as_mut()).is_pending());
    let gauge = route_gauge("POST", "orders", "createOrder");
    assert_eq!(sink.gauge_value(&gauge), Some(1), "请求阶段已执行");

    tx.send(StatusCode::CREATED).expect("接收端仍存活");
    let response = thread::scope(|scope| {
        scope
            .spawn(move || block_on(future))
            .join()
            .expect("完成线程不应 panic")
    });

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(sink.gauge_value(&gauge), Some(0));
    assert_eq!(sink.find("response.orders.POST.201.cumulative").len(), 1);
}

#[test]
fn dropped_future_finishes_span_but_leaves_gauges() {
    let sink = Arc::new(RecordingSink::default());
    let tracer = RecordingTracer::default();
    let filter = InstrumentationFilter::builder(sink.clone(), identity())
        .with_tracer(Arc::new(tracer.clone()) as Arc<dyn Tracer>)
        .build();
    let (_tx, rx) = oneshot::channel::<StatusCode>();

    let mut future = Box::pin(instrument(
        &filter,
        routed_request("DELETE", "/orders/{id}", "deleteOrder"),
        |_request| async move {
            let status = rx.await.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            Response::builder().status(status).body(()).expect("合法响应")
        },
    ));
    assert!(poll_once(future.as_mut()).is_pending());
    drop(future);

    let finished = tracer.finished();
    assert_eq!(finished.len(), 1);
    assert_eq!(
        finished[0].error.as_deref(),
        Some("request future dropped before completion")
    );
    assert!(
        sink.records().is_empty(),
        "被放弃的请求不应发射任何响应指标"
    );
    assert_eq!(
        sink.gauge_value(&route_gauge("DELETE", "orders._id_", "deleteOrder")),
        Some(1),
        "被放弃的请求保留在途增量"
    );
}

#[test]
fn unmatched_request_passes_through_untouched() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), identity()).build();
    let request = Request::builder()
        .uri("http://localhost/health")
        .body(())
        .expect("合法请求");

    let response = block_on(instrument(&filter, request, |_request| async {
        Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(())
            .expect("合法响应")
    }));

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().is_empty());
    assert!(sink.records().is_empty());
    assert_eq!(sink.gauge_registrations(), 0);
}

#[test]
fn timed_out_guard_still_allows_metrics_for_late_response() {
    let sink = Arc::new(RecordingSink::default());
    let tracer = RecordingTracer::default();
    let filter = InstrumentationFilter::builder(sink.clone(), identity())
        .with_tracer(Arc::new(tracer.clone()) as Arc<dyn Tracer>)
        .build();

    let mut request = routed_request("GET", "/orders", "listOrders");
    let exchange = DetachedExchange::capture(&mut request);
    filter.on_request(&exchange);

    let guard = CompletionGuard::new(&filter, exchange);
    let exchange = guard
        .fail(AsyncOutcome::TimedOut)
        .expect("武装状态下的守卫持有交换视图");

    let mut response = Response::builder()
        .status(StatusCode::SERVICE_UNAVAILABLE)
        .body(())
        .expect("合法响应");
    filter.on_response(
        &exchange,
        &mut beacon_http::HttpResponseExchange::new(&mut response),
    );

    let finished = tracer.finished();
    assert_eq!(finished.len(), 1, "超时后的响应钩子不应再次结束 Span");
    assert_eq!(finished[0].error.as_deref(), Some("async request timed out"));
    assert_eq!(sink.find("response.orders.GET.503.cumulative").len(), 1);
    assert_eq!(sink.counter_total("response.errors"), 1);
    assert_eq!(
        sink.gauge_value(&route_gauge("GET", "orders", "listOrders")),
        Some(0)
    );
}
