//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayErrorKind};

/// Lifecycle state reported by the runtime for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// The instance process is running.
    Running,
    /// The instance process has terminated.
    Exited,
    /// The runtime is restarting the instance.
    Restarting,
    /// The status could not be retrieved; see [`ServiceStatus::error`].
    Error,
    /// The runtime reported a state this crate does not model.
    Unknown,
}

impl LifecycleState {
    /// Map a runtime-specific state string onto the lifecycle model.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "running" => LifecycleState::Running,
            "exited" | "dead" | "stopped" => LifecycleState::Exited,
            "restarting" => LifecycleState::Restarting,
            _ => LifecycleState::Unknown,
        }
    }

    /// Static label used in logs and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Running => "running",
            LifecycleState::Exited => "exited",
            LifecycleState::Restarting => "restarting",
            LifecycleState::Error => "error",
            LifecycleState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health classification of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Health checks pass.
    Healthy,
    /// Health checks fail or the instance is not running.
    Unhealthy,
    /// The instance is inside its start-up grace period.
    Starting,
    /// No current observation is available.
    Unknown,
}

impl HealthState {
    /// Map a runtime-specific health string onto the health model.
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "healthy" => HealthState::Healthy,
            "unhealthy" => HealthState::Unhealthy,
            "starting" => HealthState::Starting,
            _ => HealthState::Unknown,
        }
    }

    /// Static label used in logs and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Starting => "starting",
            HealthState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource consumption sampled alongside the status.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU utilisation in percent of one core.
    pub cpu_percent: f64,
    /// Resident memory in mebibytes.
    pub memory_mb: f64,
}

/// Running versus desired replica counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaCount {
    /// Replicas currently running.
    pub running: u32,
    /// Replicas the runtime is asked to keep.
    pub target: u32,
}

impl Default for ReplicaCount {
    fn default() -> Self {
        Self {
            running: 1,
            target: 1,
        }
    }
}

/// Point-in-time snapshot of one service instance. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Configured service name.
    pub service: String,
    /// Runtime identifier of the instance, when known.
    pub instance_id: Option<String>,
    /// Lifecycle state.
    pub lifecycle: LifecycleState,
    /// Health classification.
    pub health: HealthState,
    /// Creation time of the instance.
    pub created_at: Option<DateTime<Utc>>,
    /// Last start time of the instance.
    pub started_at: Option<DateTime<Utc>>,
    /// Restarts performed by the runtime.
    pub restart_count: u32,
    /// Sampled resource usage.
    pub resources: ResourceUsage,
    /// Replica counts.
    pub replicas: ReplicaCount,
    /// Raw status detail or error text.
    pub detail: Option<String>,
    /// Error classification when the status stands in for a failed inspect.
    pub error: Option<GatewayErrorKind>,
    /// When the observation was taken.
    pub observed_at: DateTime<Utc>,
}

impl ServiceStatus {
    /// Status with the given lifecycle and health and neutral defaults elsewhere.
    pub fn new(service: impl Into<String>, lifecycle: LifecycleState, health: HealthState) -> Self {
        Self {
            service: service.into(),
            instance_id: None,
            lifecycle,
            health,
            created_at: None,
            started_at: None,
            restart_count: 0,
            resources: ResourceUsage::default(),
            replicas: ReplicaCount::default(),
            detail: None,
            error: None,
            observed_at: Utc::now(),
        }
    }

    /// A running, healthy instance.
    pub fn healthy(service: impl Into<String>) -> Self {
        Self::new(service, LifecycleState::Running, HealthState::Healthy)
    }

    /// Stand-in for an inspect call that failed: lifecycle `error`, health `unhealthy`.
    pub fn from_error(service: impl Into<String>, error: &GatewayError) -> Self {
        let mut status = Self::new(service, LifecycleState::Error, HealthState::Unhealthy);
        status.detail = Some(error.to_string());
        status.error = Some(error.kind());
        status.replicas = ReplicaCount {
            running: 0,
            target: 1,
        };
        status
    }

    /// Placeholder for a service that has no observation in the latest poll.
    pub fn unknown(service: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut status = Self::new(service, LifecycleState::Unknown, HealthState::Unknown);
        status.detail = Some(detail.into());
        status
    }

    /// Replace the sampled CPU utilisation.
    pub fn with_cpu(mut self, cpu_percent: f64) -> Self {
        self.resources.cpu_percent = cpu_percent;
        self
    }

    /// Replace the replica counts.
    pub fn with_replicas(mut self, running: u32, target: u32) -> Self {
        self.replicas = ReplicaCount { running, target };
        self
    }

    /// Attach a detail string.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Whether the instance counts towards availability.
    pub fn is_healthy(&self) -> bool {
        self.health == HealthState::Healthy
    }
}
