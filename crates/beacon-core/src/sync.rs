//! 原子类型的统一入口：Loom 模型检查时切换为 `loom` 的实现。

#[cfg(all(feature = "loom-model", any(loom, beacon_loom)))]
pub(crate) use loom::sync::atomic::{AtomicI64, AtomicU8, Ordering};

#[cfg(not(all(feature = "loom-model", any(loom, beacon_loom))))]
pub(crate) use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
