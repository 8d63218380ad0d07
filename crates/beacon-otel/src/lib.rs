//! beacon-otel：`beacon-core` 追踪契约的 OpenTelemetry 实现。
//!
//! # 教案式说明
//! - **意图（Why）**：核心引擎只依赖 [`beacon_core::Tracer`] 抽象；本 crate 负责把它接到
//!   OpenTelemetry SDK，并顺带完成 `tracing` 日志订阅器的安装，让埋点日志与服务端 Span 同源。
//! - **结构（How）**：
//!   - [`trace`]：`OtelTracer` / `OtelServerSpan` 与上下文互转；
//!   - [`propagation`]：以 W3C `traceparent` 从请求头提取上游上下文；
//!   - [`resource`]：由应用身份构造 OpenTelemetry `Resource`；
//!   - 本文件：全局安装入口与测试辅助。

use std::{
    borrow::Cow,
    sync::{Arc, OnceLock},
};

use opentelemetry::{global, trace::TracerProvider as _};
use opentelemetry_sdk::{
    Resource,
    trace::{self as sdk_trace, TracerProvider},
};
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

pub mod propagation;
pub mod resource;
pub mod trace;

pub use propagation::HeaderExtractor;
pub use resource::resource_from_identity;
pub use trace::{OtelServerSpan, OtelTracer};

#[cfg(feature = "test-util")]
use opentelemetry_sdk::export::trace::SpanData;
#[cfg(feature = "test-util")]
use test_support::InMemorySpanExporter;

/// 服务端 Span 的 instrumentation scope 名称。
pub const INSTRUMENTATION_SCOPE: &str = "beacon.http.server";

/// 安装状态的全局缓存，确保 `install` 仅执行一次。
static INSTALL_STATE: OnceLock<InstallState> = OnceLock::new();

/// beacon-otel 安装过程可能出现的错误。
///
/// # 教案式说明
/// - **意图（Why）**：启动流程需要区分“重复安装”与“宿主已自行配置日志”两类误用，
///   前者可以忽略，后者说明宿主应改为直接使用 [`OtelTracer::from_provider`]。
/// - **契约（What）**：实现 [`std::error::Error`]，可直接交给上层错误框架。
#[derive(Debug)]
pub enum Error {
    /// `beacon_otel::install` 被重复调用。
    AlreadyInstalled,
    /// 外部提前设置了全局 `tracing` Subscriber。
    SubscriberAlreadySet,
    /// W3C TraceState 在互转过程中校验失败。
    TraceStateConversion(String),
    /// 设置全局 Subscriber 失败的底层错误。
    SetGlobalSubscriber(tracing::dispatcher::SetGlobalDefaultError),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::AlreadyInstalled => f.write_str("beacon-otel 已完成安装，禁止重复调用 install"),
            Error::SubscriberAlreadySet => {
                f.write_str("全局 tracing Subscriber 已存在，beacon-otel 无法覆盖")
            }
            Error::TraceStateConversion(reason) => write!(f, "TraceState 互转失败: {reason}"),
            Error::SetGlobalSubscriber(err) => {
                write!(f, "设置 tracing 全局 Subscriber 失败: {err}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// 安装后的持久状态：Provider 必须与进程同寿，否则 SDK Tracer 产出的 Span 会静默丢弃。
struct InstallState {
    #[cfg_attr(not(feature = "test-util"), allow(dead_code))]
    provider: TracerProvider,
    tracer: Arc<OtelTracer>,
}

/// 零配置安装入口，使用默认 Resource。
pub fn install() -> Result<(), Error> {
    install_with_resource(Resource::default())
}

/// 以给定 Resource 安装：构建 Provider、注册 `tracing` 层，并缓存供过滤器使用的追踪后端。
///
/// # 教案式说明
/// - **逻辑（How）**：
///   1. 检查重复安装与外部已设置的 Subscriber；
///   2. 构建 `TracerProvider` 并注册到 `opentelemetry::global`；
///   3. 组装 `EnvFilter + fmt + OpenTelemetry` 三层 Subscriber 并设为全局；
///   4. 以同一个 Provider 构造 [`OtelTracer`]，写入 `INSTALL_STATE`。
/// - **契约（What）**：重复调用返回 [`Error::AlreadyInstalled`]；外部已配置 Subscriber 时返回
///   [`Error::SubscriberAlreadySet`]；成功后可通过 [`installed_tracer`] 取得追踪后端。
pub fn install_with_resource(resource: Resource) -> Result<(), Error> {
    if INSTALL_STATE.get().is_some() {
        return Err(Error::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(Error::SubscriberAlreadySet);
    }

    let state = install_impl(resource)?;
    INSTALL_STATE
        .set(state)
        .map_err(|_| Error::AlreadyInstalled)
}

/// 已安装的追踪后端；未安装时返回 `None`。
pub fn installed_tracer() -> Option<Arc<dyn beacon_core::Tracer>> {
    INSTALL_STATE
        .get()
        .map(|state| Arc::clone(&state.tracer) as Arc<dyn beacon_core::Tracer>)
}

/// 供 `InstrumentationSetup` 使用的追踪工厂。
///
/// 已经全局安装时复用安装好的后端；否则以应用身份构造独立 Provider。
pub fn tracer_factory(
    identity: &beacon_core::ApplicationIdentity,
    source: &str,
) -> Arc<dyn beacon_core::Tracer> {
    if let Some(tracer) = installed_tracer() {
        return tracer;
    }
    let provider = build_tracer_provider(resource_from_identity(identity, source));
    Arc::new(OtelTracer::from_provider(provider))
}

fn install_impl(resource: Resource) -> Result<InstallState, Error> {
    let provider = build_tracer_provider(resource);
    global::set_tracer_provider(provider.clone());

    let tracer = Arc::new(OtelTracer::from_provider(provider.clone()));
    let layer_tracer = provider.versioned_tracer(
        INSTRUMENTATION_SCOPE,
        Some(env!("CARGO_PKG_VERSION")),
        Some(Cow::Borrowed(env!("CARGO_PKG_NAME"))),
        None,
    );

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_opentelemetry::layer().with_tracer(layer_tracer));
    tracing::subscriber::set_global_default(subscriber).map_err(Error::SetGlobalSubscriber)?;

    Ok(InstallState { provider, tracer })
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub(crate) fn build_tracer_provider(resource: Resource) -> TracerProvider {
    #[allow(unused_mut)]
    let mut builder = TracerProvider::builder().with_config(
        sdk_trace::config()
            .with_sampler(sdk_trace::Sampler::AlwaysOn)
            .with_resource(resource),
    );

    #[cfg(feature = "test-util")]
    {
        let exporter = fetch_in_memory_exporter();
        builder = builder.with_simple_exporter(exporter.clone());
    }

    builder.build()
}

#[cfg(feature = "test-util")]
fn fetch_in_memory_exporter() -> InMemorySpanExporter {
    static EXPORTER: OnceLock<InMemorySpanExporter> = OnceLock::new();
    EXPORTER.get_or_init(InMemorySpanExporter::default).clone()
}

#[cfg(feature = "test-util")]
mod test_support {
    use std::sync::{Arc, Mutex};

    use futures_util::future::BoxFuture;
    use opentelemetry::trace::{TraceError, TraceResult};
    use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};

    /// 收集已完成 Span 的内存导出器。
    ///
    /// # 教案式说明
    /// - **意图（Why）**：只保留“收集 Span 供断言”的能力，不启用 `opentelemetry-sdk/testing`，
    ///   以免间接引入额外的异步运行时。
    /// - **契约（What）**：`export` 追加批次；`finished_spans` 返回快照；`reset` 清空缓冲。
    #[derive(Clone, Debug, Default)]
    pub struct InMemorySpanExporter {
        spans: Arc<Mutex<Vec<SpanData>>>,
    }

    impl InMemorySpanExporter {
        pub fn finished_spans(&self) -> TraceResult<Vec<SpanData>> {
            self.spans
                .lock()
                .map(|guard| guard.clone())
                .map_err(TraceError::from)
        }

        pub fn reset(&self) {
            if let Ok(mut guard) = self.spans.lock() {
                guard.clear();
            }
        }
    }

    impl SpanExporter for InMemorySpanExporter {
        fn export(&mut self, mut batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
            let result = self
                .spans
                .lock()
                .map(|mut guard| guard.append(&mut batch))
                .map_err(TraceError::from);

            Box::pin(async move { result })
        }

        fn shutdown(&mut self) {
            self.reset();
        }
    }
}

#[cfg(feature = "test-util")]
/// 测试辅助工具：读取内存导出器中的 Span。
pub mod testing {
    use super::*;

    /// 以测试导出器构造独立 Provider 与追踪后端，不触碰全局 Subscriber。
    pub fn local_tracer() -> (TracerProvider, Arc<OtelTracer>) {
        let provider = build_tracer_provider(Resource::default());
        let tracer = Arc::new(OtelTracer::from_provider(provider.clone()));
        (provider, tracer)
    }

    /// 强制刷新 Provider，确保 Span 已进入导出器。
    pub fn force_flush(provider: Option<&TracerProvider>) {
        let provider = provider.or_else(|| INSTALL_STATE.get().map(|state| &state.provider));
        if let Some(provider) = provider {
            for result in provider.force_flush() {
                let _ = result;
            }
        }
    }

    pub fn finished_spans() -> Vec<SpanData> {
        fetch_in_memory_exporter()
            .finished_spans()
            .unwrap_or_default()
    }

    /// 按名称查找已完成的 Span。
    pub fn finished_span(name: &str) -> Option<SpanData> {
        finished_spans().into_iter().find(|span| span.name == name)
    }

    /// 读取 Span 属性的文本形式。
    pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
        span.attributes
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    /// 清空内存导出器，隔离测试用例。
    pub fn reset() {
        fetch_in_memory_exporter().reset();
    }
}

/// 单元测试用：不带导出器的独立追踪后端。
#[cfg(test)]
pub(crate) fn testing_provider() -> OtelTracer {
    OtelTracer::from_provider(TracerProvider::builder().build())
}
