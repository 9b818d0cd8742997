//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Failure observations and trigger classification."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_runtime::{GatewayErrorKind, LifecycleState, ServiceStatus};

/// Why a service was considered failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    /// Health checks report the instance unhealthy.
    HealthCheckFailed,
    /// The health probe itself did not answer in time.
    HealthCheckTimeout,
    /// The instance exited or disappeared from the runtime.
    InstanceExit,
    /// The instance runs hot above the scale-up threshold.
    ResourceExhaustion,
    /// The instance is unreachable over the network.
    NetworkPartition,
    /// No more specific classification applies.
    Unclassified,
}

impl TriggerType {
    /// Types that bypass the consecutive-failure threshold.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            TriggerType::InstanceExit
                | TriggerType::HealthCheckTimeout
                | TriggerType::ResourceExhaustion
        )
    }

    /// Derive the trigger type of an unhealthy observation.
    ///
    /// Gateway error kinds win over lifecycle, lifecycle wins over resource usage.
    pub fn classify(status: &ServiceStatus, scale_up_cpu_threshold: f64) -> Self {
        if let Some(kind) = status.error {
            return match kind {
                GatewayErrorKind::Timeout => TriggerType::HealthCheckTimeout,
                GatewayErrorKind::NotFound => TriggerType::InstanceExit,
                GatewayErrorKind::Partitioned => TriggerType::NetworkPartition,
                GatewayErrorKind::Transient => TriggerType::HealthCheckFailed,
            };
        }
        match status.lifecycle {
            LifecycleState::Exited => TriggerType::InstanceExit,
            LifecycleState::Running
                if status.resources.cpu_percent >= scale_up_cpu_threshold =>
            {
                TriggerType::ResourceExhaustion
            }
            _ => TriggerType::HealthCheckFailed,
        }
    }

    /// Static label used in logs, metrics and payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::HealthCheckFailed => "health-check-failed",
            TriggerType::HealthCheckTimeout => "health-check-timeout",
            TriggerType::InstanceExit => "instance-exit",
            TriggerType::ResourceExhaustion => "resource-exhaustion",
            TriggerType::NetworkPartition => "network-partition",
            TriggerType::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "health-check-failed" | "health-check-failure" => Ok(TriggerType::HealthCheckFailed),
            "health-check-timeout" => Ok(TriggerType::HealthCheckTimeout),
            "instance-exit" => Ok(TriggerType::InstanceExit),
            "resource-exhaustion" => Ok(TriggerType::ResourceExhaustion),
            "network-partition" => Ok(TriggerType::NetworkPartition),
            "unclassified" => Ok(TriggerType::Unclassified),
            other => Err(format!("unknown trigger type '{}'", other)),
        }
    }
}

/// A single unhealthy observation of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    pub service: String,
    pub trigger: TriggerType,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Consecutive-failure count of the service once this event was counted.
    pub consecutive_failures: u32,
}

impl FailureEvent {
    pub fn new(service: impl Into<String>, trigger: TriggerType) -> Self {
        Self {
            service: service.into(),
            trigger,
            detail: None,
            timestamp: Utc::now(),
            consecutive_failures: 0,
        }
    }

    /// Event for `status`, stamped with the observation time.
    pub fn from_status(status: &ServiceStatus, trigger: TriggerType) -> Self {
        Self {
            service: status.service.clone(),
            trigger,
            detail: status.detail.clone(),
            timestamp: status.observed_at,
            consecutive_failures: 0,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_runtime::{GatewayError, HealthState};

    const THRESHOLD: f64 = 80.0;

    #[test]
    fn gateway_errors_map_to_trigger_types() {
        let cases = [
            (
                GatewayError::Timeout {
                    operation: warden_runtime::GatewayOperation::Inspect,
                    timeout: std::time::Duration::from_secs(10),
                },
                TriggerType::HealthCheckTimeout,
            ),
            (GatewayError::not_found("api"), TriggerType::InstanceExit),
            (
                GatewayError::Partitioned {
                    service: "api".into(),
                    detail: "no route".into(),
                },
                TriggerType::NetworkPartition,
            ),
            (GatewayError::transient("busy"), TriggerType::HealthCheckFailed),
        ];
        for (error, expected) in cases {
            let status = ServiceStatus::from_error("api", &error);
            assert_eq!(TriggerType::classify(&status, THRESHOLD), expected, "{error}");
        }
    }

    #[test]
    fn lifecycle_and_cpu_drive_classification() {
        let exited = ServiceStatus::new("api", LifecycleState::Exited, HealthState::Unhealthy);
        assert_eq!(TriggerType::classify(&exited, THRESHOLD), TriggerType::InstanceExit);

        let hot = ServiceStatus::new("api", LifecycleState::Running, HealthState::Unhealthy)
            .with_cpu(95.0);
        assert_eq!(TriggerType::classify(&hot, THRESHOLD), TriggerType::ResourceExhaustion);

        let cool = hot.clone().with_cpu(10.0);
        assert_eq!(TriggerType::classify(&cool, THRESHOLD), TriggerType::HealthCheckFailed);
    }

    #[test]
    fn critical_set_is_fixed() {
        assert!(TriggerType::InstanceExit.is_critical());
        assert!(TriggerType::HealthCheckTimeout.is_critical());
        assert!(TriggerType::ResourceExhaustion.is_critical());
        assert!(!TriggerType::HealthCheckFailed.is_critical());
        assert!(!TriggerType::NetworkPartition.is_critical());
        assert!(!TriggerType::Unclassified.is_critical());
    }

    #[test]
    fn parses_labels() {
        assert_eq!(
            "network-partition".parse::<TriggerType>().unwrap(),
            TriggerType::NetworkPartition
        );
        assert_eq!(
            "health-check-failure".parse::<TriggerType>().unwrap(),
            TriggerType::HealthCheckFailed
        );
        assert!("meltdown".parse::<TriggerType>().is_err());
        assert_eq!(
            serde_json::to_string(&TriggerType::ResourceExhaustion).unwrap(),
            "\"resource-exhaustion\""
        );
    }
}
