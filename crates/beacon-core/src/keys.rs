//! 指标名、标签键与 Span 属性键的集中定义。
//!
//! # 教案式说明
//! - **意图（Why）**：指标名称与标签键一旦发布就会被仪表盘、告警规则直接引用，任何字面量漂移都会
//!   让历史数据断档；集中在此处声明可以避免散落的字符串常量互相不一致。
//! - **契约（What）**：本模块的全部常量与既有的 Jersey 服务端埋点逐字兼容，包括
//!   `jersey.resource.class` 等带框架前缀的键名，以便新旧服务共用同一套看板。
//! - **风险（Trade-offs）**：键名保留历史前缀在语义上略显“错位”，但更名的代价是全部下游查询失效，
//!   因此只允许新增、禁止修改。

/// 指标标签键。
pub mod tags {
    /// 应用名标签，仅出现在上报器级别的 point tag 中。
    pub const APPLICATION: &str = "application";
    pub const CLUSTER: &str = "cluster";
    pub const SERVICE: &str = "service";
    pub const SHARD: &str = "shard";
    /// 资源类全名（例如 `com.acme.SampleResource`）。
    pub const RESOURCE_CLASS: &str = "jersey.resource.class";
    /// 资源方法名（例如 `barCreate`）。
    pub const RESOURCE_METHOD: &str = "jersey.resource.method";
    /// 聚合指标携带的来源标记键。
    pub const SOURCE: &str = "source";

    /// 来源标记值：区分“由埋点库预聚合”的序列与宿主自身上报的序列。
    pub const PROVIDED_SOURCE: &str = "wavefront-provided";
    /// 未配置的可选维度（cluster/shard）在标签中的占位值。
    pub const NULL_TAG_VALUE: &str = "none";
    /// 宿主无法给出资源类或方法时使用的占位值。
    pub const UNKNOWN: &str = "unknown";
}

/// 指标名片段。
///
/// 请求级名称形如 `request.<path>.<METHOD>`，响应级名称形如
/// `response.<path>.<METHOD>.<status>`；后缀在二者之后拼接。
pub mod metrics {
    pub const REQUEST_PREFIX: &str = "request.";
    pub const RESPONSE_PREFIX: &str = "response.";

    pub const INFLIGHT_SUFFIX: &str = ".inflight";
    pub const CUMULATIVE_SUFFIX: &str = ".cumulative";
    pub const ERRORS_SUFFIX: &str = ".errors";
    pub const LATENCY_SUFFIX: &str = ".latency";
    pub const CPU_NS_SUFFIX: &str = ".cpu_ns";
    pub const TOTAL_TIME_SUFFIX: &str = ".total_time";

    pub const AGGREGATED_PER_SOURCE_SUFFIX: &str = ".aggregated_per_source";
    pub const AGGREGATED_PER_SHARD_SUFFIX: &str = ".aggregated_per_shard";
    pub const AGGREGATED_PER_SERVICE_SUFFIX: &str = ".aggregated_per_service";
    pub const AGGREGATED_PER_CLUSTER_SUFFIX: &str = ".aggregated_per_cluster";
    pub const AGGREGATED_PER_APPLICATION_SUFFIX: &str = ".aggregated_per_application";

    /// 全局在途请求数 Gauge。
    pub const TOTAL_INFLIGHT: &str = "total_requests.inflight";
    /// 全局错误计数的名称根。
    pub const RESPONSE_ERRORS: &str = "response.errors";
    /// 全局完成计数的名称根。
    pub const RESPONSE_COMPLETED: &str = "response.completed";
}

/// 上报器相关默认值。
pub mod reporter {
    /// 上报时统一添加的指标名前缀。
    pub const DEFAULT_PREFIX: &str = "jersey.server";
    /// 默认上报周期（秒）。
    pub const DEFAULT_INTERVAL_SECS: u64 = 60;
    /// SDK 自身指标的名称前缀。
    pub const SDK_METRIC_PREFIX: &str = "~sdk.rust.beacon";
    /// SDK 版本 Gauge 的名称。
    pub const SDK_VERSION_GAUGE: &str = "version";
    /// 无法获取主机名时使用的 source。
    pub const UNKNOWN_SOURCE: &str = "unknown";
}

/// Span 名称、属性键与响应头。
pub mod span {
    pub const KIND: &str = "span.kind";
    pub const KIND_SERVER: &str = "server";
    pub const COMPONENT: &str = "component";
    /// 服务端 Span 的组件名。
    pub const SERVER_COMPONENT: &str = "jersey-server";
    pub const HTTP_METHOD: &str = "http.method";
    pub const HTTP_URL: &str = "http.url";
    pub const HTTP_STATUS_CODE: &str = "http.status_code";
    pub const ERROR: &str = "error";
    /// 匹配到的路由路径（未归一化前的模板）。
    pub const RESOURCE_PATH: &str = "jersey.path";
    /// 回写给客户端的 Span 名称响应头，值为匹配到的路由路径。
    pub const SPAN_NAME_HEADER: &str = "X-WF-SPAN-NAME";
}
