//! TOML 配置：应用标签与上报方式。
//!
//! # 教案式说明
//! - **意图（Why）**：运维通常以文件下发拓扑身份与上报目标，启动阶段读取一次即可。
//! - **逻辑（How）**：`serde` 反序列化为原始结构，再经 `into_identity` / `target` 校验为强类型结果；
//!   上报方式保留为字符串解析，以便给出带字段名的 [`BeaconError::Config`]。
//! - **契约（What）**：
//!   - 应用标签：`application`、`service` 必填，`cluster`、`shard`、`custom_tags` 可选；
//!   - 上报配置：`reporting_mechanism` 取 `proxy` 或 `direct`；proxy 需 `proxy_host`，
//!     direct 需 `server` 与 `token`；`report_traces` 缺省为 `true`。
//!
//! ```toml
//! application = "shop"
//! service = "orders"
//! cluster = "prod"
//!
//! [custom_tags]
//! env = "staging"
//! ```

use std::{collections::BTreeMap, fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::{BeaconError, Result},
    identity::ApplicationIdentity,
    keys::reporter as reporter_keys,
    reporter::default_source,
};

/// 应用标签配置文件。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ApplicationTagsConfig {
    pub application: String,
    pub service: String,
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub shard: Option<String>,
    #[serde(default)]
    pub custom_tags: BTreeMap<String, String>,
}

impl ApplicationTagsConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    pub fn into_identity(self) -> Result<ApplicationIdentity> {
        let mut builder = ApplicationIdentity::builder(self.application, self.service)
            .custom_tags(self.custom_tags);
        if let Some(cluster) = self.cluster {
            builder = builder.cluster(cluster);
        }
        if let Some(shard) = self.shard {
            builder = builder.shard(shard);
        }
        builder.build()
    }
}

/// 上报配置文件。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ReportingConfig {
    pub reporting_mechanism: String,
    #[serde(default)]
    pub proxy_host: Option<String>,
    #[serde(default)]
    pub proxy_metrics_port: Option<u16>,
    #[serde(default)]
    pub proxy_distributions_port: Option<u16>,
    #[serde(default)]
    pub proxy_tracing_port: Option<u16>,
    #[serde(default)]
    pub server: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub report_traces: Option<bool>,
    #[serde(default)]
    pub reporting_interval_seconds: Option<u64>,
}

/// 校验后的上报目标。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReportingTarget {
    Proxy {
        host: String,
        metrics_port: Option<u16>,
        distributions_port: Option<u16>,
        tracing_port: Option<u16>,
    },
    Direct {
        server: String,
        token: String,
    },
}

impl ReportingConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_toml_str(&read(path.as_ref())?)
    }

    /// 校验上报方式及其必填字段。
    pub fn target(&self) -> Result<ReportingTarget> {
        match self.reporting_mechanism.trim() {
            "proxy" => Ok(ReportingTarget::Proxy {
                host: required(&self.proxy_host, "proxy_host")?,
                metrics_port: self.proxy_metrics_port,
                distributions_port: self.proxy_distributions_port,
                tracing_port: self.proxy_tracing_port,
            }),
            "direct" => Ok(ReportingTarget::Direct {
                server: required(&self.server, "server")?,
                token: required(&self.token, "token")?,
            }),
            other => Err(BeaconError::config(
                "reporting_mechanism",
                format!("unsupported reporting mechanism `{other}`, expected `proxy` or `direct`"),
            )),
        }
    }

    /// 配置的 source，缺省时为本机主机名。
    pub fn source(&self) -> String {
        self.source
            .as_deref()
            .map(str::trim)
            .filter(|source| !source.is_empty())
            .map_or_else(default_source, str::to_string)
    }

    pub fn report_traces(&self) -> bool {
        self.report_traces.unwrap_or(true)
    }

    pub fn reporting_interval(&self) -> Duration {
        Duration::from_secs(
            self.reporting_interval_seconds
                .filter(|secs| *secs > 0)
                .unwrap_or(reporter_keys::DEFAULT_INTERVAL_SECS),
        )
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| BeaconError::config(field, "required field is missing or blank"))
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| BeaconError::ConfigIo {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_tags_parse_into_identity() {
        let config = ApplicationTagsConfig::from_toml_str(
            r#"
            application = "shop"
            service = "orders"
            cluster = "prod"

            [custom_tags]
            env = "staging"
            "#,
        )
        .expect("合法配置应解析成功");

        let identity = config.into_identity().expect("合法身份");
        assert_eq!(identity.cluster(), Some("prod"));
        assert_eq!(identity.shard(), None);
        assert_eq!(
            identity.custom_tags().get("env").map(String::as_str),
            Some("staging")
        );
    }

    #[test]
    fn missing_service_is_a_parse_error() {
        let err = ApplicationTagsConfig::from_toml_str(r#"application = "shop""#)
            .expect_err("缺少 service 应失败");
        assert_eq!(err.code(), "beacon.config.parse");
    }

    #[test]
    fn proxy_and_direct_targets_validate_required_fields() {
        let proxy = ReportingConfig::from_toml_str(
            r#"
            reporting_mechanism = "proxy"
            proxy_host = "wavefront-proxy"
            proxy_metrics_port = 2878
            "#,
        )
        .expect("合法配置");
        assert_eq!(
            proxy.target().expect("proxy 配置合法"),
            ReportingTarget::Proxy {
                host: "wavefront-proxy".into(),
                metrics_port: Some(2878),
                distributions_port: None,
                tracing_port: None,
            }
        );
        assert!(proxy.report_traces());
        assert_eq!(proxy.reporting_interval(), Duration::from_secs(60));

        let direct = ReportingConfig::from_toml_str(
            r#"
            reporting_mechanism = "direct"
            server = "https://metrics.example"
            "#,
        )
        .expect("合法配置");
        let err = direct.target().expect_err("缺少 token 应失败");
        assert_eq!(err.code(), "beacon.config.invalid");
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn unknown_mechanism_is_rejected() {
        let config = ReportingConfig::from_toml_str(r#"reporting_mechanism = "carrier-pigeon""#)
            .expect("结构合法");
        let err = config.target().expect_err("未知上报方式应失败");
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn configured_source_wins_over_hostname() {
        let config = ReportingConfig::from_toml_str(
            r#"
            reporting_mechanism = "proxy"
            proxy_host = "localhost"
            source = "checkout-01"
            report_traces = false
            "#,
        )
        .expect("合法配置");
        assert_eq!(config.source(), "checkout-01");
        assert!(!config.report_traces());
    }

    #[test]
    fn missing_file_reports_io_error() {
        let err = ReportingConfig::from_path("/definitely/not/here.toml").expect_err("应失败");
        assert_eq!(err.code(), "beacon.config.io");
    }
}
