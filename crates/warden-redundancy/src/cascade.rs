//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Cascading failure detection and emergency response plans."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Fleet-wide escalation. Thresholds and plan durations are fixed constants.
use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::warn;
use warden_common::time::{elapsed_between, within_window};

use crate::failure::FailureEvent;

/// Sliding window over which failures are clustered.
pub const CASCADE_WINDOW: Duration = Duration::from_secs(300);
/// Failures inside the window that constitute a cascade.
pub const CASCADE_EVENT_THRESHOLD: usize = 3;

const ISOLATE_DURATION: Duration = Duration::from_secs(60);
const ALERT_DURATION: Duration = Duration::from_secs(5);
const SCALE_HEALTHY_DURATION: Duration = Duration::from_secs(120);
const BACKUP_DURATION: Duration = Duration::from_secs(300);

/// Result of clustering the recent failure history.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeInfo {
    pub is_cascading: bool,
    /// Failures inside the window.
    pub event_count: usize,
    /// Distinct services among those failures.
    pub affected_services: usize,
    pub services: Vec<String>,
    /// Between the earliest and latest failure inside the window.
    #[serde_as(as = "DurationSeconds<u64>")]
    pub time_span: Duration,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionPriority {
    Immediate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmergencyActionKind {
    IsolateFailingServices,
    AlertAdministrators,
    ScaleHealthyServices,
    EmergencyBackup,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyAction {
    pub kind: EmergencyActionKind,
    pub priority: ActionPriority,
    pub description: String,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub estimated_duration: Duration,
    /// Services the action applies to; empty means fleet-wide.
    pub services: Vec<String>,
}

/// Escalation handed to the notification sink when failures cluster.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyResponsePlan {
    pub severity: Severity,
    pub actions: Vec<EmergencyAction>,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub total_estimated_duration: Duration,
    pub affected_services: usize,
    pub generated_at: DateTime<Utc>,
}

/// Stateless detector over a failure history.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadingFailureDetector;

impl CascadingFailureDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect<'a, I>(&self, events: I) -> CascadeInfo
    where
        I: IntoIterator<Item = &'a FailureEvent>,
    {
        self.detect_at(events, Utc::now())
    }

    /// Cluster the events that fall inside [`CASCADE_WINDOW`] before `now`.
    pub fn detect_at<'a, I>(&self, events: I, now: DateTime<Utc>) -> CascadeInfo
    where
        I: IntoIterator<Item = &'a FailureEvent>,
    {
        let recent: Vec<&FailureEvent> = events
            .into_iter()
            .filter(|event| within_window(event.timestamp, now, CASCADE_WINDOW))
            .collect();
        let services: BTreeSet<&str> = recent.iter().map(|event| event.service.as_str()).collect();
        let earliest = recent.iter().map(|event| event.timestamp).min();
        let latest = recent.iter().map(|event| event.timestamp).max();
        let time_span = match (earliest, latest) {
            (Some(earliest), Some(latest)) => elapsed_between(earliest, latest),
            _ => Duration::ZERO,
        };

        let is_cascading = recent.len() >= CASCADE_EVENT_THRESHOLD;
        if is_cascading {
            warn!(
                events = recent.len(),
                services = services.len(),
                time_span_secs = time_span.as_secs(),
                "cascading failure detected"
            );
        }
        CascadeInfo {
            is_cascading,
            event_count: recent.len(),
            affected_services: services.len(),
            services: services.into_iter().map(str::to_owned).collect(),
            time_span,
            detected_at: now,
        }
    }

    /// Fixed four-step response, most urgent first.
    pub fn build_emergency_plan(&self, info: &CascadeInfo) -> EmergencyResponsePlan {
        let actions = vec![
            EmergencyAction {
                kind: EmergencyActionKind::IsolateFailingServices,
                priority: ActionPriority::Immediate,
                description: format!(
                    "isolate {} failing service(s) from traffic",
                    info.affected_services
                ),
                estimated_duration: ISOLATE_DURATION,
                services: info.services.clone(),
            },
            EmergencyAction {
                kind: EmergencyActionKind::AlertAdministrators,
                priority: ActionPriority::Immediate,
                description: format!(
                    "alert administrators: {} failures across {} service(s) within {}s",
                    info.event_count,
                    info.affected_services,
                    info.time_span.as_secs()
                ),
                estimated_duration: ALERT_DURATION,
                services: Vec::new(),
            },
            EmergencyAction {
                kind: EmergencyActionKind::ScaleHealthyServices,
                priority: ActionPriority::High,
                description: "scale up healthy services to absorb redirected load".to_owned(),
                estimated_duration: SCALE_HEALTHY_DURATION,
                services: Vec::new(),
            },
            EmergencyAction {
                kind: EmergencyActionKind::EmergencyBackup,
                priority: ActionPriority::High,
                description: "trigger emergency data protection backup".to_owned(),
                estimated_duration: BACKUP_DURATION,
                services: Vec::new(),
            },
        ];
        let total_estimated_duration = actions.iter().map(|action| action.estimated_duration).sum();
        EmergencyResponsePlan {
            severity: Severity::Critical,
            actions,
            total_estimated_duration,
            affected_services: info.affected_services,
            generated_at: Utc::now(),
        }
    }
}
