//! 一站式装配：从配置构建身份、上报器与过滤器。
//!
//! # 教案式说明
//! - **意图（Why）**：大多数宿主只想“给两份配置，拿回一个可注册的过滤器”；本模块按固定顺序完成装配：
//!   1. 解析应用标签得到 [`ApplicationIdentity`]；
//!   2. 校验上报配置得到 [`ReportingTarget`] 与 source；
//!   3. 构建带 point tag 与 source 的 [`InMemoryReporter`]；
//!   4. 仅在 `report_traces = true` 时调用追踪工厂，并把追踪后端交给过滤器。
//! - **契约（What）**：追踪工厂收到最终的身份与 source，便于后端把它们写入 Resource；
//!   数据点的传输由调用方依据 `target` 完成。

use std::{path::Path, sync::Arc};

use crate::{
    config::{ApplicationTagsConfig, ReportingConfig, ReportingTarget},
    error::Result,
    filter::InstrumentationFilter,
    identity::ApplicationIdentity,
    reporter::InMemoryReporter,
    sink::MetricSink,
    trace::Tracer,
};

/// 装配结果。
pub struct InstrumentationSetup {
    identity: ApplicationIdentity,
    target: ReportingTarget,
    source: String,
    reporter: Arc<InMemoryReporter>,
    tracer: Option<Arc<dyn Tracer>>,
    filter: Arc<InstrumentationFilter>,
}

impl InstrumentationSetup {
    pub fn from_configs<F>(
        tags: ApplicationTagsConfig,
        reporting: ReportingConfig,
        tracer_factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ApplicationIdentity, &str) -> Arc<dyn Tracer>,
    {
        let identity = tags.into_identity()?;
        let target = reporting.target()?;
        let source = reporting.source();

        let reporter = Arc::new(
            InMemoryReporter::builder()
                .source(source.clone())
                .application(&identity)
                .reporting_interval(reporting.reporting_interval())
                .build(),
        );

        let tracer = reporting
            .report_traces()
            .then(|| tracer_factory(&identity, &source));

        let sink: Arc<dyn MetricSink> = reporter.clone();
        let filter = Arc::new(
            InstrumentationFilter::builder(sink, identity.clone())
                .with_optional_tracer(tracer.clone())
                .build(),
        );

        tracing::info!(
            application = identity.application(),
            service = identity.service(),
            source = %source,
            traces = tracer.is_some(),
            "request instrumentation configured"
        );

        Ok(Self {
            identity,
            target,
            source,
            reporter,
            tracer,
            filter,
        })
    }

    pub fn from_paths<F>(
        tags_path: impl AsRef<Path>,
        reporting_path: impl AsRef<Path>,
        tracer_factory: F,
    ) -> Result<Self>
    where
        F: FnOnce(&ApplicationIdentity, &str) -> Arc<dyn Tracer>,
    {
        Self::from_configs(
            ApplicationTagsConfig::from_path(tags_path)?,
            ReportingConfig::from_path(reporting_path)?,
            tracer_factory,
        )
    }

    pub fn identity(&self) -> &ApplicationIdentity {
        &self.identity
    }

    pub fn target(&self) -> &ReportingTarget {
        &self.target
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn reporter(&self) -> &Arc<InMemoryReporter> {
        &self.reporter
    }

    pub fn tracer(&self) -> Option<&Arc<dyn Tracer>> {
        self.tracer.as_ref()
    }

    pub fn filter(&self) -> &Arc<InstrumentationFilter> {
        &self.filter
    }
}

impl std::fmt::Debug for InstrumentationSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationSetup")
            .field("identity", &self.identity)
            .field("target", &self.target)
            .field("source", &self.source)
            .field("tracing", &self.tracer.is_some())
            .finish_non_exhaustive()
    }
}
