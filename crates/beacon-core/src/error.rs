//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 汇总配置解析、身份校验与生命周期不变量三类失败，供过滤器边界统一记录；
//! - 埋点失败绝不外泄给宿主，因此这里的错误主要服务于日志与测试断言。
//!
//! ## 设计要求（What）
//! - 全部变体派生 [`thiserror::Error`]；
//! - 通过 [`BeaconError::code`] 暴露稳定错误码，便于日志检索与告警聚合。

use std::{io, path::PathBuf};

use thiserror::Error;

/// beacon 的统一错误域。
///
/// # 教案式说明
/// - **意图（Why）**：让配置加载与过滤器内部的失败路径共享同一套错误码，排障时只需按 `code` 聚合。
/// - **契约（What）**：所有变体 `Send + Sync + 'static`；`code()` 返回值一经发布不得修改。
/// - **风险（Trade-offs）**：上下文以 `String` 保存，换取可读性；这些错误只出现在冷路径，分配开销可忽略。
#[derive(Debug, Error)]
pub enum BeaconError {
    /// 配置语义非法，例如缺失必填字段或上报方式未知。
    #[error("invalid configuration `{field}`: {reason}")]
    Config { field: String, reason: String },

    /// 读取配置文件失败。
    #[error("failed to read configuration file `{path}`: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 配置文件不是合法的 TOML 或结构不匹配。
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// 应用身份校验失败（application/service 为空等）。
    #[error("invalid application identity: {reason}")]
    InvalidIdentity { reason: String },

    /// 可路由的请求在响应阶段找不到请求阶段留下的上下文。
    ///
    /// - **意图（Why）**：请求阶段只要路由解析成功就必然写入上下文与 Gauge；缺失说明宿主未调用请求钩子
    ///   或属性袋被替换，属于编程不变量被破坏，需要高声报告而不是静默吞掉。
    #[error("request context missing at response time for route `{route}`")]
    MissingRequestContext { route: String },

    /// 埋点逻辑在过滤器边界内发生 panic。
    #[error("instrumentation panicked during `{phase}`: {detail}")]
    Panicked { phase: &'static str, detail: String },
}

impl BeaconError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            BeaconError::Config { .. } => "beacon.config.invalid",
            BeaconError::ConfigIo { .. } => "beacon.config.io",
            BeaconError::ConfigParse(_) => "beacon.config.parse",
            BeaconError::InvalidIdentity { .. } => "beacon.identity.invalid",
            BeaconError::MissingRequestContext { .. } => "beacon.lifecycle.missing_context",
            BeaconError::Panicked { .. } => "beacon.filter.panicked",
        }
    }

    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        BeaconError::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// crate 内统一的结果别名。
pub type Result<T, E = BeaconError> = std::result::Result<T, E>;
