#![deny(unsafe_code)]
#![doc = "beacon-core: HTTP 服务端请求生命周期指标与追踪关联引擎。"]
#![doc = ""]
#![doc = "== 职责边界 =="]
#![doc = "1. 由宿主给出的路由模板推导层级指标名（`request.<path>.<METHOD>` / `response.<path>.<METHOD>.<status>`）。"]
#![doc = "2. 以请求属性袋关联请求阶段与响应阶段的状态，允许两者位于不同线程。"]
#![doc = "3. 维护在途请求 Gauge，保证每个指标身份只向汇聚端注册一次。"]
#![doc = "4. 将一次响应扇出为 route / shard / service / cluster / application 多粒度指标。"]
#![doc = "5. 可选地为每个请求维护一个服务端 Span，并在异步失败路径上可靠收尾。"]
#![doc = ""]
#![doc = "线路协议、批量发送、JVM 指标与心跳均不在本 crate 范围内。"]

pub mod clock;
pub mod config;
pub mod emitter;
pub mod error;
pub mod exchange;
pub mod filter;
pub mod gauge;
pub mod identity;
pub mod keys;
pub mod lifecycle;
pub mod properties;
pub mod reporter;
pub mod route;
pub mod setup;
pub mod sink;
mod sync;
pub mod tags;
pub mod test_stubs;
pub mod trace;

pub use clock::{Clock, SystemClock};
pub use config::{ApplicationTagsConfig, ReportingConfig, ReportingTarget};
pub use emitter::{AggregationEmitter, ResponseTimings};
pub use error::{BeaconError, Result};
pub use exchange::{AsyncOutcome, HeaderCarrier, RequestExchange, ResponseExchange};
pub use filter::{InstrumentationFilter, InstrumentationFilterBuilder};
pub use gauge::{Gauge, GaugeRegistry};
pub use identity::{ApplicationIdentity, MetricIdentity, RouteIdentity, TagSet};
pub use lifecycle::{RequestContext, RequestLifecycle, RouteInstrumentation};
pub use properties::{PropertyBag, RequestProperties, RequestPropertiesExt};
pub use reporter::{InMemoryReporter, PointValue, ReportedPoint};
pub use route::{ResolvedRoute, RouteMatch, RouteNameResolver, RouteTemplate};
pub use setup::InstrumentationSetup;
pub use sink::MetricSink;
pub use tags::{AggregationPolicy, Granularity, TagSetBuilder};
pub use trace::{
    ServerSpan, SpanContext, SpanPhase, SpanSlot, SpanStart, TagValue, TraceCorrelator, Tracer,
};
