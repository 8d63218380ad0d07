#![cfg(all(feature = "loom-model", any(loom, beacon_loom)))]

use beacon_core::{Gauge, SpanPhase, trace::PhaseCell};
use loom::{model, sync::Arc, thread};

#[test]
fn gauge_never_observes_negative_values() {
    //
    // 教案级说明：请求阶段与响应阶段可能在不同线程上操作同一个在途 Gauge。
    // - **Why**：下溢会让后端看到负的在途数，且之后每个请求都会少计一次。
    // - **How**：一个线程先增后减，另一个线程同时尝试减一；Loom 穷举所有交错。
    // - **What**：无论顺序如何，观察值都不为负；被拒绝的减一不改变计数。
    model(|| {
        let gauge = Arc::new(Gauge::new());

        let worker = {
            let gauge = Arc::clone(&gauge);
            thread::spawn(move || {
                gauge.increment();
                assert!(gauge.value() >= 0);
                gauge.decrement()
            })
        };
        let stray = {
            let gauge = Arc::clone(&gauge);
            thread::spawn(move || gauge.decrement())
        };

        let worker_done = worker.join().expect("工作线程不应 panic");
        let stray_done = stray.join().expect("干扰线程不应 panic");

        let successes = i64::from(worker_done) + i64::from(stray_done);
        assert_eq!(successes, 1, "一次增加只能抵消一次减少");
        assert_eq!(gauge.value(), 0);
    });
}

#[test]
fn phase_cell_finishes_exactly_once() {
    //
    // 教案级说明：响应钩子与异步失败监听器可能同时尝试结束同一个 Span。
    // - **How**：两线程并发调用 `finish`，统计成功次数。
    // - **What**：恰好一次成功，最终阶段为 `Finished`。
    model(|| {
        let cell = Arc::new(PhaseCell::new());
        assert!(cell.activate());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || cell.finish())
            })
            .collect();

        let finished = handles
            .into_iter()
            .map(|handle| handle.join().expect("收尾线程不应 panic"))
            .filter(|won| *won)
            .count();

        assert_eq!(finished, 1);
        assert_eq!(cell.phase(), SpanPhase::Finished);
        assert!(!cell.activate(), "结束后不可重新激活");
    });
}
