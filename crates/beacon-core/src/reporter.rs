//! 进程内上报器：汇聚指标并按周期生成带前缀、point tag 与 source 的数据点。
//!
//! # 教案式说明
//! - **意图（Why）**：引擎通过 [`MetricSink`] 发出的是“增量事件”，后端需要的是周期性的“数据点”；
//!   上报器负责把前者累积为后者，同时补齐所有数据点共享的前缀、point tag 与 source。
//! - **逻辑（How）**：
//!   1. 累计计数器、delta 计数器、直方图样本分别存放在 `DashMap` 中，热路径只做原子加或短暂加锁；
//!   2. Gauge 由注册表持有，上报器只保留引用并在上报时读取；
//!   3. [`InMemoryReporter::report`] 生成一批 [`ReportedPoint`]：delta 计数器与直方图样本在此被清空，
//!      累计计数器与 Gauge 保持原值。
//! - **契约（What）**：
//!   - 指标名统一加 `<prefix>.`，delta 计数器再在最前面加 `∆`；SDK 自身指标不加前缀；
//!   - point tag 与指标标签合并，同名时以指标标签为准；
//!   - 发送数据点不在此处完成，调用方按 [`InMemoryReporter::reporting_interval`] 调度并自行传输。
//! - **风险（Trade-offs）**：直方图保留原始样本直至下一次上报，上报周期过长会占用更多内存。

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    gauge::Gauge,
    identity::{ApplicationIdentity, MetricIdentity},
    keys::reporter as reporter_keys,
    sink::MetricSink,
};

/// Delta 计数器名称前缀。
pub const DELTA_PREFIX: &str = "\u{2206}";

/// 直方图在一个上报周期内的摘要。
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub sum: u64,
    pub mean: f64,
}

impl HistogramSnapshot {
    fn from_samples(samples: &[u64]) -> Option<Self> {
        let count = u64::try_from(samples.len()).ok()?;
        let min = samples.iter().copied().min()?;
        let max = samples.iter().copied().max()?;
        let sum = samples.iter().copied().fold(0u64, u64::saturating_add);
        Some(Self {
            count,
            min,
            max,
            sum,
            mean: sum as f64 / count as f64,
        })
    }
}

/// 数据点取值。
#[derive(Clone, Debug, PartialEq)]
pub enum PointValue {
    Counter(u64),
    DeltaCounter(u64),
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

/// 一个待发送的数据点。
#[derive(Clone, Debug, PartialEq)]
pub struct ReportedPoint {
    pub name: String,
    pub source: String,
    pub tags: BTreeMap<String, String>,
    pub value: PointValue,
}

/// 进程内上报器。
pub struct InMemoryReporter {
    prefix: String,
    source: String,
    point_tags: BTreeMap<String, String>,
    interval: Duration,
    counters: DashMap<MetricIdentity, AtomicU64>,
    deltas: DashMap<MetricIdentity, AtomicU64>,
    histograms: DashMap<MetricIdentity, Mutex<Vec<u64>>>,
    gauges: DashMap<MetricIdentity, Arc<Gauge>>,
    sdk_version: f64,
}

impl InMemoryReporter {
    pub fn builder() -> InMemoryReporterBuilder {
        InMemoryReporterBuilder::default()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn point_tags(&self) -> &BTreeMap<String, String> {
        &self.point_tags
    }

    pub fn reporting_interval(&self) -> Duration {
        self.interval
    }

    /// 读取当前值，不清空任何状态。
    pub fn value_of(&self, identity: &MetricIdentity) -> Option<PointValue> {
        if let Some(counter) = self.counters.get(identity) {
            return Some(PointValue::Counter(counter.load(Ordering::Acquire)));
        }
        if let Some(delta) = self.deltas.get(identity) {
            return Some(PointValue::DeltaCounter(delta.load(Ordering::Acquire)));
        }
        if let Some(gauge) = self.gauges.get(identity) {
            return Some(PointValue::Gauge(gauge.value().value() as f64));
        }
        self.histograms.get(identity).and_then(|samples| {
            HistogramSnapshot::from_samples(&samples.lock()).map(PointValue::Histogram)
        })
    }

    /// 生成一批数据点；delta 计数器与直方图样本随之清空。
    pub fn report(&self) -> Vec<ReportedPoint> {
        let mut points = Vec::new();

        for entry in self.counters.iter() {
            points.push(self.point(
                self.prefixed(entry.key()),
                entry.key(),
                PointValue::Counter(entry.value().load(Ordering::Acquire)),
            ));
        }

        for entry in self.deltas.iter() {
            let drained = entry.value().swap(0, Ordering::AcqRel);
            if drained == 0 {
                continue;
            }
            points.push(self.point(
                format!("{DELTA_PREFIX}{}", self.prefixed(entry.key())),
                entry.key(),
                PointValue::DeltaCounter(drained),
            ));
        }

        for entry in self.gauges.iter() {
            points.push(self.point(
                self.prefixed(entry.key()),
                entry.key(),
                PointValue::Gauge(entry.value().value() as f64),
            ));
        }

        for entry in self.histograms.iter() {
            let samples = std::mem::take(&mut *entry.value().lock());
            if let Some(snapshot) = HistogramSnapshot::from_samples(&samples) {
                points.push(self.point(
                    self.prefixed(entry.key()),
                    entry.key(),
                    PointValue::Histogram(snapshot),
                ));
            }
        }

        points.push(ReportedPoint {
            name: format!(
                "{}.{}",
                reporter_keys::SDK_METRIC_PREFIX,
                reporter_keys::SDK_VERSION_GAUGE
            ),
            source: self.source.clone(),
            tags: self.point_tags.clone(),
            value: PointValue::Gauge(self.sdk_version),
        });

        tracing::debug!(points = points.len(), "metrics snapshot reported");
        points
    }

    fn prefixed(&self, identity: &MetricIdentity) -> String {
        if self.prefix.is_empty() {
            identity.name().to_string()
        } else {
            format!("{}.{}", self.prefix, identity.name())
        }
    }

    fn point(&self, name: String, identity: &MetricIdentity, value: PointValue) -> ReportedPoint {
        let mut tags = self.point_tags.clone();
        tags.extend(
            identity
                .tags()
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );
        ReportedPoint {
            name,
            source: self.source.clone(),
            tags,
            value,
        }
    }
}

impl MetricSink for InMemoryReporter {
    fn increment_counter_by(&self, identity: &MetricIdentity, delta: u64) {
        add_to(&self.counters, identity, delta);
    }

    fn increment_delta_counter(&self, identity: &MetricIdentity) {
        add_to(&self.deltas, identity, 1);
    }

    fn update_histogram(&self, identity: &MetricIdentity, value: u64) {
        if let Some(samples) = self.histograms.get(identity) {
            samples.lock().push(value);
            return;
        }
        self.histograms
            .entry(identity.clone())
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(value);
    }

    fn register_gauge(&self, identity: &MetricIdentity, gauge: Arc<Gauge>) {
        self.gauges.insert(identity.clone(), gauge);
    }
}

fn add_to(map: &DashMap<MetricIdentity, AtomicU64>, identity: &MetricIdentity, delta: u64) {
    if let Some(counter) = map.get(identity) {
        counter.fetch_add(delta, Ordering::AcqRel);
        return;
    }
    map.entry(identity.clone())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(delta, Ordering::AcqRel);
}

impl std::fmt::Debug for InMemoryReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryReporter")
            .field("prefix", &self.prefix)
            .field("source", &self.source)
            .field("interval", &self.interval)
            .field("counters", &self.counters.len())
            .field("deltas", &self.deltas.len())
            .field("histograms", &self.histograms.len())
            .field("gauges", &self.gauges.len())
            .finish()
    }
}

/// [`InMemoryReporter`] 构建器。
#[derive(Clone, Debug)]
pub struct InMemoryReporterBuilder {
    prefix: String,
    source: Option<String>,
    point_tags: BTreeMap<String, String>,
    interval: Duration,
}

impl Default for InMemoryReporterBuilder {
    fn default() -> Self {
        Self {
            prefix: reporter_keys::DEFAULT_PREFIX.to_string(),
            source: None,
            point_tags: BTreeMap::new(),
            interval: Duration::from_secs(reporter_keys::DEFAULT_INTERVAL_SECS),
        }
    }
}

impl InMemoryReporterBuilder {
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn point_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.point_tags.insert(key.into(), value.into());
        self
    }

    /// 以应用身份的 `application` 与自定义标签作为 point tag。
    pub fn application(mut self, identity: &ApplicationIdentity) -> Self {
        self.point_tags.extend(identity.point_tags());
        self
    }

    pub fn reporting_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn build(self) -> InMemoryReporter {
        InMemoryReporter {
            prefix: self.prefix,
            source: self.source.unwrap_or_else(default_source),
            point_tags: self.point_tags,
            interval: self.interval,
            counters: DashMap::new(),
            deltas: DashMap::new(),
            histograms: DashMap::new(),
            gauges: DashMap::new(),
            sdk_version: semver_gauge_value(env!("CARGO_PKG_VERSION")),
        }
    }
}

/// 默认 source：本机主机名，取不到时为 `"unknown"`。
pub fn default_source() -> String {
    hostname()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| reporter_keys::UNKNOWN_SOURCE.to_string())
}

#[cfg(target_os = "linux")]
fn hostname() -> Option<String> {
    nix::unistd::gethostname().ok()?.into_string().ok()
}

#[cfg(not(target_os = "linux"))]
fn hostname() -> Option<String> {
    std::env::var("HOSTNAME").ok()
}

/// `major.minor.patch` 编码为 `major + minor/100 + patch/10000`，例如 `1.2.3` → `1.0203`。
pub fn semver_gauge_value(version: &str) -> f64 {
    let mut parts = version
        .split(['.', '-', '+'])
        .map(|part| part.parse::<u32>().unwrap_or(0));
    let major = f64::from(parts.next().unwrap_or(0));
    let minor = f64::from(parts.next().unwrap_or(0));
    let patch = f64::from(parts.next().unwrap_or(0));
    major + minor / 100.0 + patch / 10_000.0
}
