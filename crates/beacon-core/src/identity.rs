//! 应用身份、路由身份与指标身份。
//!
//! # 教案式说明
//! - **意图（Why）**：指标的“身份”由名称与标签集合共同决定，注册表以此为键去重；
//!   路由身份则由宿主适配层显式给出，不依赖任何反射。
//! - **契约（What）**：
//!   - [`ApplicationIdentity`] 构建后不可变，以 `Arc` 在线程间只读共享；
//!   - [`TagSet`] 以有序映射存储，使相等性与哈希与插入顺序无关；
//!   - [`MetricIdentity`] 是 [`crate::GaugeRegistry`] 与上报器的键。

use std::{collections::BTreeMap, fmt, sync::Arc};

use crate::{
    error::{BeaconError, Result},
    keys::tags,
};

/// 部署拓扑中的应用身份：application / service / cluster / shard 以及自定义标签。
///
/// # 教案式说明
/// - **意图（Why）**：所有聚合粒度都以该结构为准，启动时构建一次后不再变化。
/// - **契约（What）**：`application` 与 `service` 非空；`cluster`、`shard` 可缺省，缺省时在相关标签中
///   渲染为 `"none"`，同时抑制 shard/cluster 粒度的聚合指标。
/// - **风险（Trade-offs）**：字段私有、仅提供只读访问，修改身份必须重建过滤器，换来的是热路径上零同步。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApplicationIdentity {
    application: String,
    service: String,
    cluster: Option<String>,
    shard: Option<String>,
    custom_tags: BTreeMap<String, String>,
}

impl ApplicationIdentity {
    /// 以必填字段创建构建器。
    pub fn builder(
        application: impl Into<String>,
        service: impl Into<String>,
    ) -> ApplicationIdentityBuilder {
        ApplicationIdentityBuilder {
            application: application.into(),
            service: service.into(),
            cluster: None,
            shard: None,
            custom_tags: BTreeMap::new(),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    pub fn shard(&self) -> Option<&str> {
        self.shard.as_deref()
    }

    pub fn custom_tags(&self) -> &BTreeMap<String, String> {
        &self.custom_tags
    }

    /// 渲染 cluster 标签值，缺省时为 `"none"`。
    pub fn cluster_tag(&self) -> &str {
        self.cluster().unwrap_or(tags::NULL_TAG_VALUE)
    }

    /// 渲染 shard 标签值，缺省时为 `"none"`。
    pub fn shard_tag(&self) -> &str {
        self.shard().unwrap_or(tags::NULL_TAG_VALUE)
    }

    /// 上报器级别的 point tag：`application` 加全部自定义标签。
    ///
    /// 自定义标签后写入，与 `application` 同名时以自定义标签为准。
    pub fn point_tags(&self) -> BTreeMap<String, String> {
        let mut point_tags = BTreeMap::new();
        point_tags.insert(tags::APPLICATION.to_string(), self.application.clone());
        point_tags.extend(
            self.custom_tags
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        point_tags
    }
}

/// [`ApplicationIdentity`] 的构建器。
#[derive(Clone, Debug)]
pub struct ApplicationIdentityBuilder {
    application: String,
    service: String,
    cluster: Option<String>,
    shard: Option<String>,
    custom_tags: BTreeMap<String, String>,
}

impl ApplicationIdentityBuilder {
    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    pub fn shard(mut self, shard: impl Into<String>) -> Self {
        self.shard = Some(shard.into());
        self
    }

    pub fn custom_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_tags.insert(key.into(), value.into());
        self
    }

    pub fn custom_tags<I, K, V>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.custom_tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// 校验并产出不可变身份。
    ///
    /// # 教案式说明
    /// - **契约（What）**：`application`、`service` 去除空白后为空时返回
    ///   [`BeaconError::InvalidIdentity`]；空白的 cluster/shard 视为未配置。
    pub fn build(self) -> Result<ApplicationIdentity> {
        if self.application.trim().is_empty() {
            return Err(BeaconError::InvalidIdentity {
                reason: "application must not be blank".into(),
            });
        }
        if self.service.trim().is_empty() {
            return Err(BeaconError::InvalidIdentity {
                reason: "service must not be blank".into(),
            });
        }

        Ok(ApplicationIdentity {
            application: self.application,
            service: self.service,
            cluster: self.cluster.filter(|value| !value.trim().is_empty()),
            shard: self.shard.filter(|value| !value.trim().is_empty()),
            custom_tags: self.custom_tags,
        })
    }
}

/// 处理请求的资源类与方法。
///
/// 宿主无法给出时两者均为 `"unknown"`。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteIdentity {
    resource_class: String,
    resource_method: String,
}

impl RouteIdentity {
    pub fn new(resource_class: impl Into<String>, resource_method: impl Into<String>) -> Self {
        let resource_class = resource_class.into();
        let resource_method = resource_method.into();
        Self {
            resource_class: non_blank_or_unknown(resource_class),
            resource_method: non_blank_or_unknown(resource_method),
        }
    }

    pub fn unknown() -> Self {
        Self {
            resource_class: tags::UNKNOWN.to_string(),
            resource_method: tags::UNKNOWN.to_string(),
        }
    }

    pub fn resource_class(&self) -> &str {
        &self.resource_class
    }

    pub fn resource_method(&self) -> &str {
        &self.resource_method
    }

    /// 资源类的简单名：最后一个 `.` 之后的部分。
    pub fn simple_class_name(&self) -> &str {
        self.resource_class
            .rsplit_once('.')
            .map_or(self.resource_class.as_str(), |(_, simple)| simple)
    }

    /// Span 名称：`<SimpleClassName>.<method>`。
    pub fn span_name(&self) -> String {
        format!("{}.{}", self.simple_class_name(), self.resource_method)
    }
}

fn non_blank_or_unknown(value: String) -> String {
    if value.trim().is_empty() {
        tags::UNKNOWN.to_string()
    } else {
        value
    }
}

/// 不可变标签集合。
///
/// # 教案式说明
/// - **意图（Why）**：同一路由的标签集合会被多个指标身份共享，`Arc` 让克隆只是一次引用计数。
/// - **契约（What）**：内部为 `BTreeMap`，相等性、哈希与排序只取决于内容。
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagSet(Arc<BTreeMap<String, String>>);

impl TagSet {
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self(Arc::new(map))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::from_map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

/// 指标身份：名称 + 标签集合。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricIdentity {
    name: String,
    tags: TagSet,
}

impl MetricIdentity {
    pub fn new(name: impl Into<String>, tags: TagSet) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}

impl fmt::Display for MetricIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.tags)
    }
}
