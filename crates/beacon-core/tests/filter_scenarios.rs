//! 过滤器端到端场景。
//!
//! # 教案式说明
//! - **测试目标（Why）**：以宿主视角驱动 `on_request` / `on_response`，核对一次请求产生的全部指标名、
//!   标签与 Gauge 终值，覆盖拓扑维度齐全、缺失两种部署形态。
//! - **测试设计（How）**：使用 `test_stubs` 中的记录型汇聚端与内存交换对象；端到端用例再接入
//!   `InMemoryReporter` 检查前缀与 point tag。

use std::{collections::BTreeSet, sync::Arc, thread};

use beacon_core::{
    ApplicationIdentity, InMemoryReporter, InstrumentationFilter, MetricIdentity, MetricSink,
    PointValue, TagSet,
    test_stubs::{RecordedKind, RecordingSink, StubExchange, StubResponse},
};

const CLASS: &str = "com.acme.SampleResource";

fn full_identity() -> ApplicationIdentity {
    ApplicationIdentity::builder("ordering", "alerting")
        .cluster("prod")
        .shard("secondary")
        .build()
        .expect("合法身份")
}

fn bare_identity() -> ApplicationIdentity {
    ApplicationIdentity::builder("ordering", "alerting")
        .build()
        .expect("合法身份")
}

fn drive(filter: &InstrumentationFilter, method: &str, template: &str, status: u16) {
    let request = StubExchange::new(method, Some(template)).with_resource(CLASS, "barCreate");
    filter.on_request(&request);
    filter.on_response(&request, &mut StubResponse::new(status));
}

fn complete_tags(cluster: &str, shard: &str) -> TagSet {
    TagSet::from_pairs([
        ("cluster", cluster),
        ("service", "alerting"),
        ("shard", shard),
        ("jersey.resource.class", CLASS),
        ("jersey.resource.method", "barCreate"),
    ])
}

fn names(sink: &RecordingSink) -> BTreeSet<String> {
    sink.records()
        .into_iter()
        .map(|record| record.identity.name().to_string())
        .collect()
}

#[test]
fn successful_post_emits_full_fanout_for_complete_topology() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), full_identity()).build();

    drive(&filter, "POST", "/bar", 204);

    let cumulative = sink.find("response.bar.POST.204.cumulative");
    assert_eq!(cumulative.len(), 1);
    assert_eq!(cumulative[0].kind, RecordedKind::Counter);
    assert_eq!(cumulative[0].identity.tags(), &complete_tags("prod", "secondary"));

    let deltas: BTreeSet<String> = sink
        .names_of(RecordedKind::DeltaCounter)
        .into_iter()
        .collect();
    let expected: BTreeSet<String> = [
        "response.bar.POST.204.aggregated_per_shard",
        "response.bar.POST.204.aggregated_per_service",
        "response.bar.POST.204.aggregated_per_cluster",
        "response.bar.POST.204.aggregated_per_application",
        "response.completed.aggregated_per_shard",
        "response.completed.aggregated_per_service",
        "response.completed.aggregated_per_cluster",
        "response.completed.aggregated_per_application",
    ]
    .into_iter()
    .map(String::from)
    .collect();
    assert_eq!(deltas, expected);

    let per_shard = sink.find("response.bar.POST.204.aggregated_per_shard");
    assert_eq!(
        per_shard[0].identity.tags().get("source"),
        Some("wavefront-provided")
    );
    assert_eq!(per_shard[0].identity.tags().get("shard"), Some("secondary"));

    let per_source = sink.find("response.completed.aggregated_per_source");
    assert_eq!(per_source.len(), 1);
    assert_eq!(
        per_source[0].identity.tags(),
        &TagSet::from_pairs([
            ("cluster", "prod"),
            ("service", "alerting"),
            ("shard", "secondary")
        ])
    );

    assert!(
        names(&sink).iter().all(|name| !name.contains("errors")),
        "2xx 响应不应产生错误指标"
    );
    assert_eq!(sink.histogram_samples("response.bar.POST.204.latency").len(), 1);
    assert_eq!(sink.histogram_samples("response.bar.POST.204.cpu_ns").len(), 1);
    assert_eq!(sink.find("response.bar.POST.204.total_time").len(), 1);

    let route_gauge = MetricIdentity::new(
        "request.bar.POST.inflight",
        complete_tags("prod", "secondary"),
    );
    assert_eq!(sink.gauge_value(&route_gauge), Some(0));
    assert_eq!(sink.gauge_registrations(), 2);
}

#[test]
fn absent_cluster_and_shard_suppress_their_aggregations() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), bare_identity()).build();

    drive(&filter, "POST", "/bar", 500);

    let emitted = names(&sink);
    assert!(emitted.iter().all(|name| !name.ends_with("aggregated_per_shard")));
    assert!(emitted.iter().all(|name| !name.ends_with("aggregated_per_cluster")));
    assert!(emitted.contains("response.bar.POST.500.aggregated_per_service"));
    assert!(emitted.contains("response.errors.aggregated_per_application"));
    assert!(emitted.contains("response.bar.POST.errors"));

    let cumulative = sink.find("response.bar.POST.500.cumulative");
    assert_eq!(cumulative[0].identity.tags(), &complete_tags("none", "none"));
}

#[test]
fn separator_only_template_is_skipped() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), full_identity()).build();

    drive(&filter, "GET", "///", 200);

    assert!(sink.records().is_empty(), "全分隔符模板不应产生任何指标");
    assert_eq!(sink.gauge_registrations(), 0);
}

#[test]
fn repeated_slashes_share_the_series_of_the_plain_template() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), full_identity()).build();

    drive(&filter, "POST", "/bar", 204);
    drive(&filter, "POST", "//bar//", 204);

    assert_eq!(sink.counter_total("response.bar.POST.204.cumulative"), 2);
    assert_eq!(sink.gauge_registrations(), 2, "两种写法应复用同一组 Gauge");
}

#[test]
fn completed_per_application_counts_every_response() {
    let sink = Arc::new(RecordingSink::default());
    let filter = InstrumentationFilter::builder(sink.clone(), full_identity()).build();

    for status in [200, 201, 404, 500, 204] {
        drive(&filter, "GET", "/sample/foo/bar/{id}", status);
    }

    assert_eq!(
        sink.delta_total("response.completed.aggregated_per_application"),
        5
    );
    assert_eq!(sink.delta_total("response.errors.aggregated_per_application"), 2);
    assert_eq!(sink.counter_total("response.errors"), 2);
    assert_eq!(sink.gauge_registrations(), 2, "同一路由只注册一组 Gauge");
}

#[test]
fn response_phase_may_run_on_another_thread() {
    let sink = Arc::new(RecordingSink::default());
    let filter = Arc::new(InstrumentationFilter::builder(sink.clone(), full_identity()).build());

    let request = StubExchange::new("GET", Some("sample/foo/bar/{id}")).with_resource(CLASS, "barGet");
    filter.on_request(&request);

    let remote_filter = Arc::clone(&filter);
    let remote_request = request.clone();
    thread::spawn(move || {
        remote_filter.on_response(&remote_request, &mut StubResponse::new(200));
    })
    .join()
    .expect("响应线程不应 panic");

    assert_eq!(
        sink.find("response.sample.foo.bar._id_.GET.200.cumulative").len(),
        1
    );
    let gauges = sink.registered_gauges();
    assert!(
        gauges
            .iter()
            .all(|identity| sink.gauge_value(identity) == Some(0)),
        "跨线程完成后在途 Gauge 必须归零"
    );
}

#[test]
fn reporter_end_to_end_applies_prefix_and_point_tags() {
    let identity = full_identity();
    let reporter = Arc::new(
        InMemoryReporter::builder()
            .source("host-a")
            .application(&identity)
            .build(),
    );
    let sink: Arc<dyn MetricSink> = reporter.clone();
    let filter = InstrumentationFilter::builder(sink, identity).build();

    drive(&filter, "POST", "/sample/foo/bar", 204);

    let cumulative = MetricIdentity::new(
        "response.sample.foo.bar.POST.204.cumulative",
        complete_tags("prod", "secondary"),
    );
    assert_eq!(reporter.value_of(&cumulative), Some(PointValue::Counter(1)));

    let points = reporter.report();
    let point = points
        .iter()
        .find(|point| point.name == "jersey.server.response.sample.foo.bar.POST.204.cumulative")
        .expect("应上报带前缀的累计计数器");
    assert_eq!(point.source, "host-a");
    assert_eq!(point.tags.get("application").map(String::as_str), Some("ordering"));

    let inflight = points
        .iter()
        .find(|point| point.name == "jersey.server.request.sample.foo.bar.POST.inflight")
        .expect("应上报在途 Gauge");
    assert_eq!(inflight.value, PointValue::Gauge(0.0));
}
