//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Failover plans, records and impact assessment."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use uuid::Uuid;
use warden_common::time::{elapsed_between, within_window};

use crate::failure::TriggerType;

/// Connections assumed to be served per second of downtime.
pub const CONNECTIONS_PER_SECOND: u64 = 10;

/// Remediation strategy chosen for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Restart,
    ScaleUp,
    SwitchToBackup,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Restart => "restart",
            Strategy::ScaleUp => "scale-up",
            Strategy::SwitchToBackup => "switch-to-backup",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the decision engine wants done; input to the executor.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPlan {
    /// Failing instance.
    pub service: String,
    /// Instance name without its `-primary`/`-backup` role suffix.
    pub base_service: String,
    pub trigger: TriggerType,
    pub strategy: Strategy,
    /// Instance or service the strategy acts on.
    pub target: String,
    /// Replicas added by a scale-up; zero for other strategies.
    pub scale_factor: u32,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub estimated_downtime: Duration,
}

/// Gateway step that completed during a failover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecoveryActionKind {
    RestartInstance,
    ScaleService,
    StopInstance,
    StartInstance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAction {
    pub kind: RecoveryActionKind,
    pub target: String,
    /// Replica count requested by a scale step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryAction {
    pub fn new(kind: RecoveryActionKind, target: impl Into<String>) -> Self {
        Self {
            kind,
            target: target.into(),
            replicas: None,
            timestamp: Utc::now(),
        }
    }

    pub fn scaled(target: impl Into<String>, replicas: u32) -> Self {
        Self {
            replicas: Some(replicas),
            ..Self::new(RecoveryActionKind::ScaleService, target)
        }
    }
}

/// Estimated cost of a failover, computed once it completes.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    /// Wall time between start and completion.
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub failover_time: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub estimated_downtime: Duration,
    pub affected_connections: u64,
}

impl ImpactAssessment {
    /// Successful failovers cost their elapsed time; failed ones the plan's
    /// downtime estimate, since the service stays degraded.
    pub fn assess(failover_time: Duration, estimated_downtime: Duration, success: bool) -> Self {
        let downtime_secs = if success {
            failover_time.as_secs().max(1)
        } else {
            estimated_downtime.as_secs().max(1)
        };
        Self {
            failover_time,
            estimated_downtime,
            affected_connections: downtime_secs.saturating_mul(CONNECTIONS_PER_SECOND),
        }
    }
}

/// Record of one remediation attempt. Frozen once completed.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub id: Uuid,
    pub service: String,
    pub trigger: TriggerType,
    pub strategy: Strategy,
    pub target: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub estimated_downtime: Duration,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub actions: Vec<RecoveryAction>,
    pub impact: Option<ImpactAssessment>,
    pub error: Option<String>,
}

impl FailoverEvent {
    /// In-flight record for `plan`.
    pub fn begin(plan: &FailoverPlan) -> Self {
        Self {
            id: Uuid::new_v4(),
            service: plan.service.clone(),
            trigger: plan.trigger,
            strategy: plan.strategy,
            target: plan.target.clone(),
            estimated_downtime: plan.estimated_downtime,
            started_at: Utc::now(),
            completed_at: None,
            success: false,
            actions: Vec::new(),
            impact: None,
            error: None,
        }
    }

    pub fn record(&mut self, action: RecoveryAction) {
        self.actions.push(action);
    }

    /// Mark the attempt finished at `now`. Completing twice keeps the first outcome.
    pub fn complete_at(&mut self, success: bool, error: Option<String>, now: DateTime<Utc>) {
        if self.is_completed() {
            return;
        }
        let elapsed = elapsed_between(self.started_at, now);
        self.completed_at = Some(now);
        self.success = success;
        self.error = error;
        self.impact = Some(ImpactAssessment::assess(
            elapsed,
            self.estimated_downtime,
            success,
        ));
    }

    pub fn complete(&mut self, success: bool, error: Option<String>) {
        self.complete_at(success, error, Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// In flight, or completed no longer than `retention` before `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>, retention: Duration) -> bool {
        match self.completed_at {
            None => true,
            Some(completed) => within_window(completed, now, retention),
        }
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.completed_at
            .map(|completed| elapsed_between(self.started_at, completed))
    }
}
