//! W3C Trace Context 的请求头提取适配。

use beacon_core::HeaderCarrier;
use opentelemetry::propagation::Extractor;

/// 把宿主请求头包装为 OpenTelemetry [`Extractor`]。
///
/// 查找语义沿用 [`HeaderCarrier::get`]（大小写不敏感、多值已展开），
/// 因此 `traceparent` 与 `Traceparent` 均可命中。
pub struct HeaderExtractor<'a> {
    headers: &'a dyn HeaderCarrier,
}

impl<'a> HeaderExtractor<'a> {
    pub fn new(headers: &'a dyn HeaderCarrier) -> Self {
        Self { headers }
    }
}

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys()
    }
}
