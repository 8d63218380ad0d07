//! 聚合粒度与标签集合构建。
//!
//! # 教案式说明
//! - **意图（Why）**：每个响应会扇出到五种粒度（route / shard / service / cluster / application），
//!   每种粒度又分“路由级”与“全局级”两套标签。把这些组合收敛到纯函数构建器里，
//!   “维度已配置才包含”的策略就只有一个实现点。
//! - **逻辑（How）**：[`Granularity`] 描述包含哪些拓扑维度；[`TagSetBuilder`] 按粒度、是否带路由身份、
//!   是否带来源标记组装 [`TagSet`]；[`AggregationPolicy`] 决定 shard/cluster 粒度是否发射。
//! - **契约（What）**：
//!   - 完整路由标签：cluster、service、shard、资源类、资源方法，不带来源标记；
//!   - 路由聚合标签：在对应维度基础上加资源类/方法与 `source=wavefront-provided`；
//!   - 全局 per-source 标签：cluster、service、shard，不带来源标记（也用于 `total_requests.inflight`）；
//!   - 全局其余粒度：对应维度 + 来源标记。
//!   - 缺省的 cluster/shard 渲染为 `"none"`。

use std::collections::BTreeMap;

use crate::{
    identity::{ApplicationIdentity, RouteIdentity, TagSet},
    keys::{metrics, tags},
};

/// 聚合粒度。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Granularity {
    Shard,
    Service,
    Cluster,
    Application,
}

impl Granularity {
    /// 扇出时的固定遍历顺序。
    pub const ALL: [Granularity; 4] = [
        Granularity::Shard,
        Granularity::Service,
        Granularity::Cluster,
        Granularity::Application,
    ];

    /// 指标名后缀，例如 `.aggregated_per_shard`。
    pub fn suffix(self) -> &'static str {
        match self {
            Granularity::Shard => metrics::AGGREGATED_PER_SHARD_SUFFIX,
            Granularity::Service => metrics::AGGREGATED_PER_SERVICE_SUFFIX,
            Granularity::Cluster => metrics::AGGREGATED_PER_CLUSTER_SUFFIX,
            Granularity::Application => metrics::AGGREGATED_PER_APPLICATION_SUFFIX,
        }
    }

    fn dimensions(self) -> Dimensions {
        match self {
            Granularity::Shard => Dimensions::CLUSTER_SERVICE_SHARD,
            Granularity::Service => Dimensions {
                cluster: true,
                service: true,
                shard: false,
            },
            Granularity::Cluster => Dimensions {
                cluster: true,
                service: false,
                shard: false,
            },
            Granularity::Application => Dimensions {
                cluster: false,
                service: false,
                shard: false,
            },
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Dimensions {
    cluster: bool,
    service: bool,
    shard: bool,
}

impl Dimensions {
    const CLUSTER_SERVICE_SHARD: Dimensions = Dimensions {
        cluster: true,
        service: true,
        shard: true,
    };
}

/// shard/cluster 粒度的发射开关。
///
/// service 与 application 粒度总是发射；shard、cluster 仅在身份中配置了对应维度时发射。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AggregationPolicy {
    shard: bool,
    cluster: bool,
}

impl AggregationPolicy {
    pub fn for_identity(identity: &ApplicationIdentity) -> Self {
        Self {
            shard: identity.shard().is_some(),
            cluster: identity.cluster().is_some(),
        }
    }

    pub fn emits(&self, granularity: Granularity) -> bool {
        match granularity {
            Granularity::Shard => self.shard,
            Granularity::Cluster => self.cluster,
            Granularity::Service | Granularity::Application => true,
        }
    }
}

/// 单条路由的全部标签变体。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteTagSets {
    complete: TagSet,
    per_shard: TagSet,
    per_service: TagSet,
    per_cluster: TagSet,
    per_application: TagSet,
}

impl RouteTagSets {
    /// 完整路由标签（cumulative、inflight、路由级错误计数使用）。
    pub fn complete(&self) -> &TagSet {
        &self.complete
    }

    pub fn aggregated(&self, granularity: Granularity) -> &TagSet {
        match granularity {
            Granularity::Shard => &self.per_shard,
            Granularity::Service => &self.per_service,
            Granularity::Cluster => &self.per_cluster,
            Granularity::Application => &self.per_application,
        }
    }
}

/// 与路由无关的全局标签变体。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverallTagSets {
    per_source: TagSet,
    per_shard: TagSet,
    per_service: TagSet,
    per_cluster: TagSet,
    per_application: TagSet,
}

impl OverallTagSets {
    /// cluster/service/shard，不带来源标记。
    pub fn per_source(&self) -> &TagSet {
        &self.per_source
    }

    pub fn aggregated(&self, granularity: Granularity) -> &TagSet {
        match granularity {
            Granularity::Shard => &self.per_shard,
            Granularity::Service => &self.per_service,
            Granularity::Cluster => &self.per_cluster,
            Granularity::Application => &self.per_application,
        }
    }
}

/// 标签集合构建器，借用不可变的应用身份。
#[derive(Clone, Copy, Debug)]
pub struct TagSetBuilder<'a> {
    identity: &'a ApplicationIdentity,
}

impl<'a> TagSetBuilder<'a> {
    pub fn new(identity: &'a ApplicationIdentity) -> Self {
        Self { identity }
    }

    pub fn policy(&self) -> AggregationPolicy {
        AggregationPolicy::for_identity(self.identity)
    }

    pub fn complete(&self, route: &RouteIdentity) -> TagSet {
        self.build(Some(route), Dimensions::CLUSTER_SERVICE_SHARD, false)
    }

    pub fn route_aggregated(&self, route: &RouteIdentity, granularity: Granularity) -> TagSet {
        self.build(Some(route), granularity.dimensions(), true)
    }

    pub fn overall_per_source(&self) -> TagSet {
        self.build(None, Dimensions::CLUSTER_SERVICE_SHARD, false)
    }

    pub fn overall(&self, granularity: Granularity) -> TagSet {
        self.build(None, granularity.dimensions(), true)
    }

    pub fn route_tag_sets(&self, route: &RouteIdentity) -> RouteTagSets {
        RouteTagSets {
            complete: self.complete(route),
            per_shard: self.route_aggregated(route, Granularity::Shard),
            per_service: self.route_aggregated(route, Granularity::Service),
            per_cluster: self.route_aggregated(route, Granularity::Cluster),
            per_application: self.route_aggregated(route, Granularity::Application),
        }
    }

    pub fn overall_tag_sets(&self) -> OverallTagSets {
        OverallTagSets {
            per_source: self.overall_per_source(),
            per_shard: self.overall(Granularity::Shard),
            per_service: self.overall(Granularity::Service),
            per_cluster: self.overall(Granularity::Cluster),
            per_application: self.overall(Granularity::Application),
        }
    }

    fn build(
        &self,
        route: Option<&RouteIdentity>,
        dimensions: Dimensions,
        with_source: bool,
    ) -> TagSet {
        let mut map = BTreeMap::new();
        if dimensions.cluster {
            map.insert(
                tags::CLUSTER.to_string(),
                self.identity.cluster_tag().to_string(),
            );
        }
        if dimensions.service {
            map.insert(tags::SERVICE.to_string(), self.identity.service().to_string());
        }
        if dimensions.shard {
            map.insert(tags::SHARD.to_string(), self.identity.shard_tag().to_string());
        }
        if let Some(route) = route {
            map.insert(
                tags::RESOURCE_CLASS.to_string(),
                route.resource_class().to_string(),
            );
            map.insert(
                tags::RESOURCE_METHOD.to_string(),
                route.resource_method().to_string(),
            );
        }
        if with_source {
            map.insert(tags::SOURCE.to_string(), tags::PROVIDED_SOURCE.to_string());
        }
        TagSet::from_map(map)
    }
}
