//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::gateway::RuntimeGateway;
use crate::status::{HealthState, LifecycleState, ReplicaCount, ResourceUsage, ServiceStatus};

/// [`RuntimeGateway`] backed by the `docker` command line client.
///
/// Instances are addressed by container name. Scaling goes through
/// `docker compose` when a compose project is configured and through
/// `docker service scale` otherwise.
#[derive(Debug, Clone)]
pub struct DockerCliGateway {
    binary: String,
    compose_project: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    id: String,
    created: Option<String>,
    #[serde(default)]
    restart_count: u32,
    state: ContainerState,
    #[serde(default)]
    config: Option<ContainerConfig>,
    #[serde(default)]
    network_settings: Option<NetworkSettings>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    status: String,
    started_at: Option<String>,
    #[serde(default)]
    health: Option<ContainerHealth>,
    #[serde(default)]
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    networks: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ContainerStats {
    #[serde(rename = "CPUPerc")]
    cpu_perc: String,
    #[serde(rename = "MemUsage")]
    mem_usage: String,
}

const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
const SWARM_SERVICE_LABEL: &str = "com.docker.swarm.service.name";

/// Where the replica count of an instance's service can be read from.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplicaSource {
    Compose { project: String, service: String },
    Swarm { service: String },
    Standalone,
}

impl ReplicaSource {
    fn from_labels(labels: Option<&HashMap<String, String>>) -> Self {
        let Some(labels) = labels else {
            return ReplicaSource::Standalone;
        };
        if let (Some(project), Some(service)) = (
            labels.get(COMPOSE_PROJECT_LABEL),
            labels.get(COMPOSE_SERVICE_LABEL),
        ) {
            return ReplicaSource::Compose {
                project: project.clone(),
                service: service.clone(),
            };
        }
        match labels.get(SWARM_SERVICE_LABEL) {
            Some(service) => ReplicaSource::Swarm {
                service: service.clone(),
            },
            None => ReplicaSource::Standalone,
        }
    }
}

impl DockerCliGateway {
    /// Gateway invoking `binary` (usually `docker`).
    pub fn new(binary: impl Into<String>, compose_project: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            compose_project,
        }
    }

    async fn run(&self, service: &str, args: &[&str]) -> Result<String, GatewayError> {
        debug!(binary = %self.binary, ?args, "invoking runtime command");
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                GatewayError::transient(format!("failed to spawn {}: {}", self.binary, err))
            })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(classify_failure(service, stderr.trim()))
    }

    /// Replica counts of the service backing `instance`. Falls back to a single
    /// replica when the runtime cannot be asked.
    async fn observe_replicas(
        &self,
        instance: &str,
        source: &ReplicaSource,
        lifecycle: LifecycleState,
    ) -> ReplicaCount {
        let standalone = ReplicaCount {
            running: u32::from(lifecycle == LifecycleState::Running),
            target: 1,
        };
        let observed = match source {
            ReplicaSource::Standalone => return standalone,
            ReplicaSource::Compose { project, service } => {
                let project_filter = format!("label={}={}", COMPOSE_PROJECT_LABEL, project);
                let service_filter = format!("label={}={}", COMPOSE_SERVICE_LABEL, service);
                self.run(
                    instance,
                    &[
                        "ps",
                        "--all",
                        "--filter",
                        project_filter.as_str(),
                        "--filter",
                        service_filter.as_str(),
                        "--format",
                        "{{.State}}",
                    ],
                )
                .await
                .map(|raw| parse_compose_states(&raw))
            }
            ReplicaSource::Swarm { service } => {
                let name_filter = format!("name={}", service);
                self.run(
                    instance,
                    &[
                        "service",
                        "ls",
                        "--filter",
                        name_filter.as_str(),
                        "--format",
                        "{{.Name}} {{.Replicas}}",
                    ],
                )
                .await
                .map(|raw| parse_swarm_replicas(&raw, service))
            }
        };
        match observed {
            Ok(Some(replicas)) => replicas,
            Ok(None) => {
                debug!(instance, ?source, "no replica information reported");
                standalone
            }
            Err(err) => {
                warn!(instance, error = %err, "replica lookup failed");
                standalone
            }
        }
    }

    async fn sample_resources(&self, service: &str) -> ResourceUsage {
        let raw = match self
            .run(
                service,
                &["stats", "--no-stream", "--format", "{{json .}}", service],
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(service, error = %err, "resource sampling failed");
                return ResourceUsage::default();
            }
        };
        match serde_json::from_str::<ContainerStats>(raw.trim()) {
            Ok(stats) => ResourceUsage {
                cpu_percent: parse_percent(&stats.cpu_perc).unwrap_or_default(),
                memory_mb: parse_memory_mb(&stats.mem_usage).unwrap_or_default(),
            },
            Err(err) => {
                warn!(service, error = %err, "unparseable stats output");
                ResourceUsage::default()
            }
        }
    }
}

impl Default for DockerCliGateway {
    fn default() -> Self {
        Self::new("docker", None)
    }
}

#[async_trait]
impl RuntimeGateway for DockerCliGateway {
    async fn inspect(&self, service: &str) -> Result<ServiceStatus, GatewayError> {
        let raw = self
            .run(service, &["inspect", "--type", "container", service])
            .await?;
        let mut parsed: Vec<ContainerInspect> = serde_json::from_str(&raw).map_err(|err| {
            GatewayError::transient(format!("unparseable inspect output for {}: {}", service, err))
        })?;
        let container = parsed
            .pop()
            .ok_or_else(|| GatewayError::not_found(service))?;

        let lifecycle = LifecycleState::parse(&container.state.status);
        let attached_networks = container
            .network_settings
            .as_ref()
            .map(|settings| settings.networks.len())
            .unwrap_or_default();
        if lifecycle == LifecycleState::Running && attached_networks == 0 {
            return Err(GatewayError::Partitioned {
                service: service.to_owned(),
                detail: "running container has no attached networks".to_owned(),
            });
        }

        let health = match &container.state.health {
            Some(health) => HealthState::parse(&health.status),
            None if lifecycle == LifecycleState::Running => HealthState::Healthy,
            None => HealthState::Unhealthy,
        };
        let resources = if lifecycle == LifecycleState::Running {
            self.sample_resources(service).await
        } else {
            ResourceUsage::default()
        };
        let source = ReplicaSource::from_labels(
            container
                .config
                .as_ref()
                .and_then(|config| config.labels.as_ref()),
        );
        let replicas = self.observe_replicas(service, &source, lifecycle).await;

        let mut status = ServiceStatus::new(service, lifecycle, health);
        status.instance_id = Some(container.id);
        status.created_at = container.created.as_deref().and_then(parse_timestamp);
        status.started_at = container.state.started_at.as_deref().and_then(parse_timestamp);
        status.restart_count = container.restart_count;
        status.resources = resources;
        status.replicas = replicas;
        if !container.state.error.is_empty() {
            status.detail = Some(container.state.error);
        } else {
            status.detail = Some(container.state.status);
        }
        Ok(status)
    }

    async fn restart(&self, service: &str) -> Result<(), GatewayError> {
        self.run(service, &["restart", service]).await.map(|_| ())
    }

    async fn scale(&self, service: &str, replicas: u32) -> Result<(), GatewayError> {
        let assignment = format!("{}={}", service, replicas);
        match &self.compose_project {
            Some(project) => self
                .run(
                    service,
                    &[
                        "compose",
                        "-p",
                        project.as_str(),
                        "up",
                        "-d",
                        "--no-recreate",
                        "--scale",
                        assignment.as_str(),
                        service,
                    ],
                )
                .await
                .map(|_| ()),
            None => self
                .run(service, &["service", "scale", assignment.as_str()])
                .await
                .map(|_| ()),
        }
    }

    async fn stop(&self, service: &str) -> Result<(), GatewayError> {
        self.run(service, &["stop", service]).await.map(|_| ())
    }

    async fn start(&self, service: &str) -> Result<(), GatewayError> {
        self.run(service, &["start", service]).await.map(|_| ())
    }
}

fn classify_failure(service: &str, stderr: &str) -> GatewayError {
    let lowered = stderr.to_ascii_lowercase();
    if lowered.contains("no such object")
        || lowered.contains("no such container")
        || lowered.contains("no such service")
        || lowered.contains("not found")
    {
        GatewayError::not_found(service)
    } else if lowered.contains("network") && lowered.contains("unreachable") {
        GatewayError::Partitioned {
            service: service.to_owned(),
            detail: stderr.to_owned(),
        }
    } else {
        GatewayError::transient(stderr.to_owned())
    }
}

/// Docker reports never-started containers with the zero time `0001-01-01T00:00:00Z`.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
        .filter(|ts| ts.year() > 1)
}

/// One `{{.State}}` line per container of a compose service; every container
/// counts towards the target, running ones towards `running`.
fn parse_compose_states(raw: &str) -> Option<ReplicaCount> {
    let states: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if states.is_empty() {
        return None;
    }
    let running = states
        .iter()
        .filter(|state| state.eq_ignore_ascii_case("running"))
        .count();
    Some(ReplicaCount {
        running: u32::try_from(running).unwrap_or(u32::MAX),
        target: u32::try_from(states.len()).unwrap_or(u32::MAX),
    })
}

/// Parse `docker service ls` lines of the form `name 2/3` (optionally followed
/// by `(max 1 per node)`). The name filter matches prefixes, so the exact
/// service name is required.
fn parse_swarm_replicas(raw: &str, service: &str) -> Option<ReplicaCount> {
    raw.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next()? != service {
            return None;
        }
        let (running, target) = fields.next()?.split_once('/')?;
        Some(ReplicaCount {
            running: running.parse().ok()?,
            target: target.parse().ok()?,
        })
    })
}

fn parse_percent(raw: &str) -> Option<f64> {
    raw.trim().trim_end_matches('%').parse().ok()
}

/// Parse the used half of `MemUsage` (`"512MiB / 2GiB"`) into mebibytes.
fn parse_memory_mb(raw: &str) -> Option<f64> {
    let used = raw.split('/').next()?.trim();
    let split_at = used.find(|c: char| c.is_ascii_alphabetic())?;
    let (value, unit) = used.split_at(split_at);
    let value: f64 = value.trim().parse().ok()?;
    let factor = match unit {
        "B" => 1.0 / (1024.0 * 1024.0),
        "KiB" | "kB" | "KB" => 1.0 / 1024.0,
        "MiB" | "MB" => 1.0,
        "GiB" | "GB" => 1024.0,
        "TiB" | "TB" => 1024.0 * 1024.0,
        _ => return None,
    };
    Some(value * factor)
}
