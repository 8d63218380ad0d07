#![deny(unsafe_code)]
#![doc = "beacon-http: 把 `beacon-core` 的埋点过滤器接到 `http::Request` / `http::Response` 上。"]
#![doc = ""]
#![doc = "宿主路由在匹配成功后向请求扩展写入 [`MatchedRoute`]；随后以 [`instrument`] 包裹处理函数，"]
#![doc = "或在自有中间件中直接使用 [`HttpRequestExchange`] / [`HttpResponseExchange`] 调用过滤器钩子。"]

mod exchange;
mod instrument;
mod route;

pub use exchange::{
    DetachedExchange, HeaderMapCarrier, HttpRequestExchange, HttpResponseExchange, properties_of,
};
pub use instrument::{CompletionGuard, instrument};
pub use route::MatchedRoute;
