//! Concrete metric sources for the polling runtime.
//!
//! Each [`SourceConfig`] variant knows its stat table and how to build a
//! [`SourceAdapter`](statpoll_collector::source::SourceAdapter) for it.
//! [`build_collectors`] turns one configuration entry into one or more
//! ready-to-schedule [`PollingCollector`]s.

pub mod error;
pub mod http;
pub mod marathon;
pub mod mesos;
pub mod snmp;

use serde::{Deserialize, Serialize};
use statpoll_collector::cycle::PollingCollector;
use statpoll_common::path::MetricPath;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Grace period on top of the HTTP request timeout before the cycle gives
/// up on a fetch.
const FETCH_GRACE: Duration = Duration::from_secs(1);

/// Settings shared by the HTTP-JSON collectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Full endpoint URL; overrides host/port when set.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    /// Source identifier in emitted paths. Defaults to the short hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Path component after the hostname.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MesosSlaveConfig {
    #[serde(flatten)]
    pub http: HttpSourceConfig,
    #[serde(default = "default_mesos_version", alias = "mesos_version")]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarathonConfig {
    #[serde(flatten)]
    pub http: HttpSourceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpDevice {
    pub host: String,
    #[serde(default = "default_snmp_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpInterfaceConfig {
    /// Device name -> connection settings. Every device becomes its own
    /// collector instance.
    pub devices: BTreeMap<String, SnmpDevice>,
    #[serde(default = "default_if_types")]
    pub if_types: Vec<i64>,
    /// Timeout for each individual get/getnext.
    #[serde(default = "default_snmp_timeout")]
    pub timeout_secs: u64,
    /// Upper bound for one complete table read.
    #[serde(default = "default_snmp_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_snmp_path")]
    pub path: String,
}

/// One `[[collectors]]` entry, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    MesosSlave(MesosSlaveConfig),
    Marathon(MarathonConfig),
    SnmpInterface(SnmpInterfaceConfig),
}

impl SourceConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::MesosSlave(_) => "mesos_slave",
            SourceConfig::Marathon(_) => "marathon",
            SourceConfig::SnmpInterface(_) => "snmp_interface",
        }
    }
}

fn default_http_timeout() -> u64 {
    10
}

fn default_mesos_version() -> String {
    mesos::DEFAULT_VERSION.to_string()
}

fn default_snmp_port() -> u16 {
    snmp::DEFAULT_PORT
}

fn default_community() -> String {
    snmp::DEFAULT_COMMUNITY.to_string()
}

fn default_if_types() -> Vec<i64> {
    snmp::DEFAULT_IF_TYPES.to_vec()
}

fn default_snmp_timeout() -> u64 {
    5
}

fn default_snmp_fetch_timeout() -> u64 {
    60
}

fn default_snmp_path() -> String {
    "interface".to_string()
}

/// Short hostname of this machine, used as the default source identifier.
pub fn local_hostname() -> String {
    sysinfo::System::host_name()
        .and_then(|h| h.split('.').next().map(str::to_string))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

impl HttpSourceConfig {
    fn endpoint(&self, default_host: &str, default_port: u16, default_path: &str) -> String {
        match &self.url {
            Some(url) if !url.is_empty() => url.clone(),
            _ => http::endpoint_url(
                self.host.as_deref().unwrap_or(default_host),
                self.port.unwrap_or(default_port),
                default_path,
            ),
        }
    }

    fn metric_path(&self, default_sub_path: &str) -> MetricPath {
        let hostname = self.hostname.clone().unwrap_or_else(local_hostname);
        MetricPath::new(
            "servers",
            hostname,
            self.path.clone().unwrap_or_else(|| default_sub_path.to_string()),
        )
    }

    fn adapter(&self, name: &str, url: &str) -> error::Result<http::HttpJsonAdapter> {
        Ok(
            http::HttpJsonAdapter::new(name, url, Duration::from_secs(self.timeout_secs))?
                .with_basic_auth(&self.username, &self.password),
        )
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs) + FETCH_GRACE
    }
}

/// Builds the collector instances described by one configuration entry.
///
/// # Errors
///
/// Returns [`error::SourceError::ConfigError`] for an SNMP entry without
/// devices, [`error::SourceError::Catalog`] if a built-in stat table is
/// inconsistent, and [`error::SourceError::HttpClient`] if the HTTP client
/// cannot be created.
pub fn build_collectors(config: &SourceConfig) -> error::Result<Vec<PollingCollector>> {
    match config {
        SourceConfig::MesosSlave(cfg) => {
            let catalog = Arc::new(mesos::catalog()?);
            let default_host = local_hostname();
            let url = cfg
                .http
                .endpoint(&default_host, mesos::DEFAULT_PORT, mesos::SNAPSHOT_PATH);
            let adapter = cfg.http.adapter("mesos_slave", &url)?;
            let collector = PollingCollector::new(
                "mesos_slave",
                Box::new(adapter),
                catalog,
                cfg.http.metric_path("mesos_slave"),
            )
            .with_version(Some(cfg.version.clone()))
            .with_fetch_timeout(cfg.http.fetch_timeout());
            Ok(vec![collector])
        }
        SourceConfig::Marathon(cfg) => {
            let catalog = Arc::new(marathon::catalog()?);
            let url = cfg.http.endpoint(
                marathon::DEFAULT_HOST,
                marathon::DEFAULT_PORT,
                marathon::METRICS_PATH,
            );
            let adapter = cfg.http.adapter("marathon", &url)?;
            let collector = PollingCollector::new(
                "marathon",
                Box::new(adapter),
                catalog,
                cfg.http.metric_path("marathon"),
            )
            .with_fetch_timeout(cfg.http.fetch_timeout());
            Ok(vec![collector])
        }
        SourceConfig::SnmpInterface(cfg) => {
            if cfg.devices.is_empty() {
                return Err(error::SourceError::ConfigError(
                    "snmp_interface collector has no devices".to_string(),
                ));
            }
            let catalog = Arc::new(snmp::catalog()?);
            let timeout = Duration::from_secs(cfg.timeout_secs);

            Ok(cfg
                .devices
                .iter()
                .map(|(device, settings)| {
                    let connector = Arc::new(snmp::UdpConnector::new(
                        &settings.host,
                        settings.port,
                        &settings.community,
                        timeout,
                    ));
                    let adapter =
                        snmp::SnmpInterfaceAdapter::new(device, connector, cfg.if_types.clone());
                    PollingCollector::new(
                        format!("snmp_interface:{device}"),
                        Box::new(adapter),
                        Arc::clone(&catalog),
                        MetricPath::new("devices", device.as_str(), cfg.path.as_str()),
                    )
                    .with_fetch_timeout(Duration::from_secs(cfg.fetch_timeout_secs))
                })
                .collect())
        }
    }
}
