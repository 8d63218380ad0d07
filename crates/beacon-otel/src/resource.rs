use beacon_core::{ApplicationIdentity, keys::tags};
use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;

/// OpenTelemetry 语义约定中的服务名键。
pub const SERVICE_NAME: &str = "service.name";
/// 上报来源（通常为主机名）的资源键。
pub const SOURCE: &str = "source";

/// 由应用身份构造 OpenTelemetry `Resource`。
///
/// # 教案式说明
/// - **意图（Why）**：Span 与指标应携带同一组拓扑标签，仪表盘才能在两者之间跳转。
/// - **逻辑（How）**：`application`、`service`、`cluster`、`shard` 与自定义标签逐条映射为
///   [`KeyValue`]；服务名额外写入 `service.name`，未配置的 cluster/shard 使用 `none` 占位。
/// - **契约（What）**：自定义标签与内置键重名时，以内置键为准（`Resource::new` 保留最后一次出现的值）。
pub fn resource_from_identity(identity: &ApplicationIdentity, source: &str) -> Resource {
    let custom = identity
        .custom_tags()
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));

    let builtin = [
        KeyValue::new(SERVICE_NAME, identity.service().to_string()),
        KeyValue::new(tags::APPLICATION, identity.application().to_string()),
        KeyValue::new(tags::SERVICE, identity.service().to_string()),
        KeyValue::new(tags::CLUSTER, identity.cluster_tag().to_string()),
        KeyValue::new(tags::SHARD, identity.shard_tag().to_string()),
        KeyValue::new(SOURCE, source.to_string()),
    ];

    Resource::new(custom.chain(builtin))
}
