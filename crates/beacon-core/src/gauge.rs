//! 在途请求 Gauge 与其注册表。
//!
//! # 教案式说明
//! - **意图（Why）**：在途请求数需要在请求开始时加一、结束时减一，且每个指标身份只能向汇聚端注册一次；
//!   重复注册会让后端出现同名多序列。
//! - **逻辑（How）**：
//!   1. [`Gauge`] 是一个原子整数，增减都是无锁操作；
//!   2. [`GaugeRegistry`] 以 `DashMap` 保存“身份 → Gauge”，命中时走只读分片锁；
//!   3. 未命中时通过 `entry` API 在分片写锁内创建、注册并插入，保证并发首访只产生一次
//!      [`MetricSink::register_gauge`] 调用。
//! - **契约（What）**：
//!   - 同一身份的并发调用拿到同一个 `Arc<Gauge>`；
//!   - 注册表条目从不移除，生命周期与进程相同，规模受路由数量约束；
//!   - 汇聚端在 `register_gauge` 中不得回调注册表，否则会与分片写锁形成自锁。
//! - **风险（Trade-offs）**：注册回调在写锁内执行，只会在每个身份的首次访问时发生一次，换来的是
//!   “注册完成之前任何线程都看不到该 Gauge”的强保证。

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    identity::MetricIdentity,
    sink::MetricSink,
    sync::{AtomicI64, Ordering},
};

/// 在途请求计数器。
///
/// 不变量：值永不为负；对每个完成的请求，增减净效果为零。
#[derive(Debug)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::AcqRel);
    }

    /// 减一；当前值已为零时拒绝下溢并返回 `false`。
    pub fn decrement(&self) -> bool {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current > 0).then(|| current - 1)
            })
            .is_ok()
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// 指标身份到 Gauge 的并发注册表。
pub struct GaugeRegistry {
    gauges: DashMap<MetricIdentity, Arc<Gauge>>,
    sink: Arc<dyn MetricSink>,
}

impl GaugeRegistry {
    pub fn new(sink: Arc<dyn MetricSink>) -> Self {
        Self {
            gauges: DashMap::new(),
            sink,
        }
    }

    /// 获取或创建 Gauge；创建时恰好向汇聚端注册一次。
    pub fn get_or_create(&self, identity: &MetricIdentity) -> Arc<Gauge> {
        if let Some(existing) = self.gauges.get(identity) {
            return Arc::clone(existing.value());
        }

        match self.gauges.entry(identity.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let gauge = Arc::new(Gauge::new());
                self.sink.register_gauge(identity, Arc::clone(&gauge));
                tracing::debug!(gauge = %identity, "registered inflight gauge");
                entry.insert(Arc::clone(&gauge));
                gauge
            }
        }
    }

    /// 只读查询，不会创建条目。
    pub fn get(&self, identity: &MetricIdentity) -> Option<Arc<Gauge>> {
        self.gauges.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }
}

impl std::fmt::Debug for GaugeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GaugeRegistry")
            .field("gauges", &self.gauges.len())
            .finish()
    }
}
