//! 宿主框架与引擎之间的请求/响应交换契约。
//!
//! # 教案式说明
//! - **意图（Why）**：引擎不绑定任何 HTTP 框架；宿主适配层只需把方法、路由匹配结果、请求头与属性袋
//!   以只读视图交出来，再在响应阶段暴露状态码与追加响应头的能力。
//! - **契约（What）**：
//!   - [`RequestExchange::route_match`] 返回 `None` 表示宿主未能匹配路由，该请求将被静默跳过；
//!   - [`RequestExchange::properties`] 必须在请求与响应两个阶段返回同一个属性袋；
//!   - [`HeaderCarrier`] 的键查找应大小写不敏感，多值头按“首个值”返回。

use std::collections::BTreeMap;

use crate::{properties::RequestProperties, route::RouteMatch};

/// 入站请求头的只读视图，用于跨进程追踪上下文提取。
pub trait HeaderCarrier {
    /// 大小写不敏感地查找头部值。
    fn get(&self, name: &str) -> Option<&str>;

    /// 全部头部名称。
    fn keys(&self) -> Vec<&str>;
}

impl HeaderCarrier for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<&str> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn keys(&self) -> Vec<&str> {
        self.keys().map(String::as_str).collect()
    }
}

/// 请求阶段可见的宿主视图。
pub trait RequestExchange {
    /// HTTP 方法，例如 `GET`。
    fn method(&self) -> &str;

    /// 宿主匹配到的路由模板与资源身份。
    fn route_match(&self) -> Option<RouteMatch>;

    fn headers(&self) -> &dyn HeaderCarrier;

    /// 完整请求 URL，仅用于 Span 属性；宿主无法给出时返回 `None`。
    fn request_url(&self) -> Option<String> {
        None
    }

    /// 随请求流转的属性袋。
    fn properties(&self) -> &dyn RequestProperties;
}

/// 响应阶段可见的宿主视图。
pub trait ResponseExchange {
    fn status(&self) -> u16;

    fn append_header(&mut self, name: &'static str, value: &str);
}

/// 异步处理的终态，由宿主的完成监听器上报。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AsyncOutcome {
    /// 正常完成；响应钩子负责收尾。
    Completed,
    /// 处理过程抛出错误。
    Failed { reason: String },
    /// 异步处理超时。
    TimedOut,
}

impl AsyncOutcome {
    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            AsyncOutcome::Completed => None,
            AsyncOutcome::Failed { reason } => Some(reason),
            AsyncOutcome::TimedOut => Some("async request timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_carrier_lookup_is_case_insensitive() {
        let mut headers = BTreeMap::new();
        headers.insert("Traceparent".to_string(), "00-abc-def-01".to_string());
        assert_eq!(HeaderCarrier::get(&headers, "traceparent"), Some("00-abc-def-01"));
        assert_eq!(HeaderCarrier::keys(&headers), vec!["Traceparent"]);
    }

    #[test]
    fn completed_outcome_has_no_failure_reason() {
        assert_eq!(AsyncOutcome::Completed.failure_reason(), None);
        assert_eq!(
            AsyncOutcome::Failed {
                reason: "boom".into()
            }
            .failure_reason(),
            Some("boom")
        );
        assert!(AsyncOutcome::TimedOut.failure_reason().is_some());
    }
}
