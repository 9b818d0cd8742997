//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Redundancy controller: monitoring, failover and cascade escalation."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Service redundancy and self-healing: health polling, failover decisions,
//! remediation through the runtime gateway, and cascade escalation.

pub mod cascade;
pub mod controller;
pub mod decision;
pub mod executor;
pub mod failover;
pub mod failure;
pub mod history;
pub mod monitor;
pub mod notify;

pub use cascade::{
    ActionPriority, CascadeInfo, CascadingFailureDetector, EmergencyAction, EmergencyActionKind,
    EmergencyResponsePlan, Severity, CASCADE_EVENT_THRESHOLD, CASCADE_WINDOW,
};
pub use controller::{ControllerError, RedundancyController, SystemStatus, TickReport};
pub use decision::{base_service_name, sibling_instance, FailoverDecisionEngine};
pub use executor::{FailoverExecutor, RemediationTimeouts, ReplicaContext};
pub use failover::{
    FailoverEvent, FailoverPlan, ImpactAssessment, RecoveryAction, RecoveryActionKind, Strategy,
};
pub use failure::{FailureEvent, TriggerType};
pub use history::BoundedHistory;
pub use monitor::{HealthMonitor, MonitorError, ObservationLog};
pub use notify::{NotificationSink, TracingNotificationSink, WebhookNotificationSink};
