//! 墙钟与线程 CPU 时钟。
//!
//! # 教案式说明
//! - **意图（Why）**：延迟直方图使用墙钟毫秒，`cpu_ns` 直方图使用当前线程 CPU 纳秒；
//!   抽象为 trait 后测试可注入可控时钟。
//! - **契约（What）**：
//!   - `now_millis` 单调性不作保证（墙钟可能被校时回拨），调用方以饱和减法求差；
//!   - `thread_cpu_nanos` 在平台不支持时返回 `None`。
//! - **风险（Trade-offs）**：请求与响应阶段若运行在不同线程，CPU 差值只反映两个线程各自的读数差，
//!   数值不具备严格意义；这是线程 CPU 时钟的固有局限。

use std::time::{SystemTime, UNIX_EPOCH};

/// 时钟抽象。
pub trait Clock: Send + Sync {
    /// Unix 纪元以来的毫秒数。
    fn now_millis(&self) -> u64;

    /// 当前线程已消耗的 CPU 纳秒数。
    fn thread_cpu_nanos(&self) -> Option<u64>;
}

/// 基于操作系统的默认时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }

    fn thread_cpu_nanos(&self) -> Option<u64> {
        thread_cpu_nanos()
    }
}

#[cfg(target_os = "linux")]
fn thread_cpu_nanos() -> Option<u64> {
    use nix::time::{ClockId, clock_gettime};

    let spec = clock_gettime(ClockId::CLOCK_THREAD_CPUTIME_ID).ok()?;
    let secs = u64::try_from(spec.tv_sec()).ok()?;
    let nanos = u64::try_from(spec.tv_nsec()).ok()?;
    secs.checked_mul(1_000_000_000)?.checked_add(nanos)
}

#[cfg(not(target_os = "linux"))]
fn thread_cpu_nanos() -> Option<u64> {
    None
}
