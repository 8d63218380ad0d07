//! 异步处理函数的埋点包装。
//!
//! # 教案式说明
//! - **意图（Why）**：异步处理函数可能在别的线程上完成，也可能被取消（客户端断开、超时中间件丢弃 future）
//!   或 panic；无论哪种情况，服务端 Span 都不能一直停留在活动状态。
//! - **逻辑（How）**：
//!   1. 请求阶段钩子在处理函数运行前执行，随后把交换视图“摘离”请求，请求本体交给处理函数；
//!   2. [`CompletionGuard`] 持有摘离后的视图；正常拿到响应时执行响应钩子并解除武装；
//!   3. 若 guard 在武装状态下被析构（取消或 panic），以失败结局调用完成监听器收尾 Span。
//! - **契约（What）**：被放弃的请求只收尾 Span，不触碰在途 Gauge 与响应指标。
//! - **风险（Trade-offs）**：在途 Gauge 因此会在被放弃的请求上保留一次增量；这与同步宿主中
//!   “响应钩子从未执行”的行为一致。

use std::future::Future;

use beacon_core::{AsyncOutcome, InstrumentationFilter, RequestExchange};
use http::{Request, Response};

use crate::exchange::{DetachedExchange, HttpRequestExchange, HttpResponseExchange};

/// 处理函数在产出响应前被丢弃时使用的失败原因。
const ABANDONED: &str = "request future dropped before completion";
/// 处理函数 panic 时使用的失败原因。
const PANICKED: &str = "request handler panicked";

/// 以过滤器包裹一个异步处理函数。
pub async fn instrument<B, R, F, Fut>(
    filter: &InstrumentationFilter,
    mut request: Request<B>,
    handler: F,
) -> Response<R>
where
    F: FnOnce(Request<B>) -> Fut,
    Fut: Future<Output = Response<R>>,
{
    let exchange = HttpRequestExchange::new(&mut request);
    filter.on_request(&exchange);
    let guard = CompletionGuard::new(filter, exchange.detach());

    let mut response = handler(request).await;
    guard.complete(&mut response);
    response
}

/// 请求完成守卫。
///
/// 宿主自行编排中间件时，可在请求钩子之后创建守卫，并在拿到响应时调用 [`CompletionGuard::complete`]；
/// 检测到超时等失败时调用 [`CompletionGuard::fail`]。
#[must_use = "守卫被立即丢弃会把请求当作已放弃处理"]
pub struct CompletionGuard<'f> {
    filter: &'f InstrumentationFilter,
    exchange: Option<DetachedExchange>,
}

impl<'f> CompletionGuard<'f> {
    pub fn new(filter: &'f InstrumentationFilter, exchange: DetachedExchange) -> Self {
        Self {
            filter,
            exchange: Some(exchange),
        }
    }

    /// 响应已产出：执行响应钩子并解除武装。
    pub fn complete<R>(mut self, response: &mut Response<R>) {
        if let Some(exchange) = self.exchange.take() {
            self.filter
                .on_response(&exchange, &mut HttpResponseExchange::new(response));
        }
    }

    /// 以失败结局收尾 Span 并解除武装。
    ///
    /// 返回的视图仍可用于之后的响应钩子（例如超时后写出 503），此时只发射指标，Span 不会被再次结束。
    pub fn fail(mut self, outcome: AsyncOutcome) -> Option<DetachedExchange> {
        let exchange = self.exchange.take()?;
        self.filter.on_async_completion(&exchange, outcome);
        Some(exchange)
    }

    pub fn exchange(&self) -> Option<&DetachedExchange> {
        self.exchange.as_ref()
    }
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        let Some(exchange) = self.exchange.take() else {
            return;
        };
        let reason = if std::thread::panicking() {
            PANICKED
        } else {
            ABANDONED
        };
        tracing::debug!(
            reason,
            method = exchange.method(),
            "request abandoned before response"
        );
        self.filter.on_async_completion(
            &exchange,
            AsyncOutcome::Failed {
                reason: reason.to_string(),
            },
        );
    }
}
