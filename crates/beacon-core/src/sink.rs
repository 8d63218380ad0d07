//! 指标汇聚端契约。
//!
//! # 教案式说明
//! - **意图（Why）**：引擎只负责“算出该记什么”，记到哪里、如何批量发送都属于汇聚端；
//!   以 trait 隔离后，测试可替换为记录型实现，生产可接入任意上报器。
//! - **契约（What）**：
//!   - 全部方法都是“发出即忘”，不得阻塞请求线程，也不向调用方返回错误；
//!   - 实现必须 `Send + Sync`，会被多个请求线程并发调用；
//!   - [`MetricSink::register_gauge`] 对同一身份只会被 [`crate::GaugeRegistry`] 调用一次，
//!     汇聚端此后按需读取 [`Gauge::value`] 即可。
//! - **风险（Trade-offs）**：无返回值意味着传输失败只能由汇聚端自行记录日志。

use std::sync::Arc;

use crate::{gauge::Gauge, identity::MetricIdentity};

/// 指标汇聚端。
pub trait MetricSink: Send + Sync {
    /// 累计计数器加一。
    fn increment_counter(&self, identity: &MetricIdentity) {
        self.increment_counter_by(identity, 1);
    }

    /// 累计计数器加 `delta`。
    fn increment_counter_by(&self, identity: &MetricIdentity, delta: u64);

    /// Delta 计数器加一：上报后清零，由后端跨来源求和。
    fn increment_delta_counter(&self, identity: &MetricIdentity);

    /// 直方图记录一个样本。
    fn update_histogram(&self, identity: &MetricIdentity, value: u64);

    /// 注册一个由外部持有、汇聚端周期读取的 Gauge。
    fn register_gauge(&self, identity: &MetricIdentity, gauge: Arc<Gauge>);
}
