//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the controller runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_health_check_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_failover_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_scale_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_switch_call_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_scale_up_cpu_threshold() -> f64 {
    80.0
}

fn default_scale_down_cpu_threshold() -> f64 {
    20.0
}

fn default_monitoring_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_metrics_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_min_replicas() -> u32 {
    1
}

fn default_max_replicas() -> u32 {
    3
}

fn default_docker_binary() -> String {
    "docker".to_owned()
}

fn default_notification_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Primary configuration object for the warden daemon.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub redundancy: RedundancyConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "WARDEN_CONFIG";

    /// Load configuration from disk, respecting the `WARDEN_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::from_path(path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path.to_path_buf(),
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.redundancy.validate()?;
        self.notification.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Controller policy: polling cadence, trigger threshold, remediation timeouts
/// and the monitored service set.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedundancyConfig {
    /// Cadence of the monitoring loop; every tick polls every service once.
    #[serde(default = "default_health_check_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub health_check_interval: Duration,
    /// Deadline for a single `inspect` call.
    #[serde(default = "default_health_check_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub health_check_timeout: Duration,
    /// Consecutive unhealthy observations required for non-critical trigger types.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Deadline for a restart remediation.
    #[serde(default = "default_failover_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub failover_timeout: Duration,
    /// Deadline for a scale remediation.
    #[serde(default = "default_scale_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub scale_timeout: Duration,
    /// Deadline applied to each of the stop/start calls of a backup switch.
    #[serde(default = "default_switch_call_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub switch_call_timeout: Duration,
    /// CPU percentage at or above which a running service counts as resource exhausted.
    #[serde(default = "default_scale_up_cpu_threshold")]
    pub scale_up_cpu_threshold: f64,
    /// CPU percentage below which a service is reported as over-provisioned.
    #[serde(default = "default_scale_down_cpu_threshold")]
    pub scale_down_cpu_threshold: f64,
    /// Cadence of the fleet summary (availability and resource gauges, summary log line).
    #[serde(default = "default_monitoring_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub monitoring_interval: Duration,
    /// Maximum age of an entry in the per-service observation history.
    #[serde(default = "default_metrics_retention")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub metrics_retention: Duration,
    /// Replica bounds applied to services without an explicit entry.
    #[serde(default)]
    pub default_replicas: ServiceConfig,
    /// Replica bounds keyed by base service (`task-worker` for `task-worker-primary`).
    /// Entries here are never polled.
    #[serde(default)]
    pub replicas: IndexMap<String, ServiceConfig>,
    /// Monitored instances keyed by instance name, in polling order.
    #[serde(default)]
    pub services: IndexMap<String, ServiceConfig>,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            health_check_interval: default_health_check_interval(),
            health_check_timeout: default_health_check_timeout(),
            failure_threshold: default_failure_threshold(),
            failover_timeout: default_failover_timeout(),
            scale_timeout: default_scale_timeout(),
            switch_call_timeout: default_switch_call_timeout(),
            scale_up_cpu_threshold: default_scale_up_cpu_threshold(),
            scale_down_cpu_threshold: default_scale_down_cpu_threshold(),
            monitoring_interval: default_monitoring_interval(),
            metrics_retention: default_metrics_retention(),
            default_replicas: ServiceConfig::default(),
            replicas: IndexMap::new(),
            services: IndexMap::new(),
        }
    }
}

impl RedundancyConfig {
    /// Build a configuration monitoring the provided services with default bounds.
    pub fn with_services<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            services: services
                .into_iter()
                .map(|name| (name.into(), ServiceConfig::default()))
                .collect(),
            ..Self::default()
        }
    }

    /// Names of the monitored instances in configuration order. Bounds-only
    /// entries under `replicas` are not included.
    pub fn service_names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    /// Replica bounds for `name`: the `replicas` table, then the instance
    /// entry, then `default_replicas`.
    pub fn replica_bounds(&self, name: &str) -> ServiceConfig {
        self.replica_bounds_for(name, name)
    }

    /// Bounds governing `instance` when it is scaled through `base`.
    pub fn replica_bounds_for(&self, base: &str, instance: &str) -> ServiceConfig {
        self.replicas
            .get(base)
            .or_else(|| self.replicas.get(instance))
            .or_else(|| self.services.get(base))
            .or_else(|| self.services.get(instance))
            .cloned()
            .unwrap_or_else(|| self.default_replicas.clone())
    }

    pub fn validate(&self) -> Result<()> {
        if self.services.is_empty() {
            return Err(anyhow!("redundancy configuration must list at least one service"));
        }
        let intervals = [
            ("health_check_interval", self.health_check_interval),
            ("health_check_timeout", self.health_check_timeout),
            ("failover_timeout", self.failover_timeout),
            ("scale_timeout", self.scale_timeout),
            ("switch_call_timeout", self.switch_call_timeout),
            ("monitoring_interval", self.monitoring_interval),
            ("metrics_retention", self.metrics_retention),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        if self.failure_threshold == 0 {
            return Err(anyhow!("failure_threshold must be at least 1"));
        }
        if self.scale_down_cpu_threshold >= self.scale_up_cpu_threshold {
            return Err(anyhow!(
                "scale_down_cpu_threshold ({}) must be below scale_up_cpu_threshold ({})",
                self.scale_down_cpu_threshold,
                self.scale_up_cpu_threshold
            ));
        }
        self.default_replicas.validate("default_replicas")?;
        for (name, bounds) in self.replicas.iter().chain(&self.services) {
            bounds.validate(name)?;
        }
        Ok(())
    }
}

/// Replica bounds for a single service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceConfig {
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    #[serde(default = "default_max_replicas")]
    pub max_replicas: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            min_replicas: default_min_replicas(),
            max_replicas: default_max_replicas(),
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_replicas == 0 {
            return Err(anyhow!("service '{}' must allow at least one replica", name));
        }
        if self.min_replicas > self.max_replicas {
            return Err(anyhow!(
                "service '{}' has min_replicas {} above max_replicas {}",
                name,
                self.min_replicas,
                self.max_replicas
            ));
        }
        Ok(())
    }
}

/// Settings for the container runtime adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Executable used for runtime commands.
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    /// Compose project used for scaling; swarm `service scale` is used when unset.
    #[serde(default)]
    pub compose_project: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_binary: default_docker_binary(),
            compose_project: None,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Endpoint receiving emergency plans as JSON; plans are only logged when unset.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_notification_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout: default_notification_timeout(),
        }
    }
}

impl NotificationConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.webhook_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow!("notification webhook_url must be an http(s) url: {}", url));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Status endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
        }
    }
}
