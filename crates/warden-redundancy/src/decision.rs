//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Failover trigger decisions and strategy selection."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::{debug, info};

use crate::failover::{FailoverEvent, FailoverPlan, Strategy};
use crate::failure::{FailureEvent, TriggerType};
use crate::history::BoundedHistory;

/// Failure observations retained per service.
pub const SERVICE_FAILURE_HISTORY: usize = 50;

const PRIMARY_SUFFIX: &str = "-primary";
const BACKUP_SUFFIX: &str = "-backup";

const RESTART_DOWNTIME: Duration = Duration::from_secs(30);
const SCALE_UP_DOWNTIME: Duration = Duration::from_secs(60);
const SWITCH_DOWNTIME: Duration = Duration::from_secs(10);
const SCALE_UP_STEP: u32 = 1;

#[derive(Debug, Clone)]
struct ServiceFailureState {
    consecutive_failures: u32,
    history: BoundedHistory<FailureEvent>,
}

impl ServiceFailureState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            history: BoundedHistory::new(SERVICE_FAILURE_HISTORY),
        }
    }
}

/// Per-service failure bookkeeping and remediation policy.
///
/// Not synchronised; the controller owns it behind its state lock.
#[derive(Debug)]
pub struct FailoverDecisionEngine {
    threshold: u32,
    services: HashMap<String, ServiceFailureState>,
}

impl FailoverDecisionEngine {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            threshold: failure_threshold.max(1),
            services: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Count `event` against its service and decide whether to remediate now.
    pub fn should_trigger(&mut self, event: &FailureEvent) -> bool {
        let state = self
            .services
            .entry(event.service.clone())
            .or_insert_with(ServiceFailureState::new);
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let count = state.consecutive_failures;
        state.history.push(FailureEvent {
            consecutive_failures: count,
            ..event.clone()
        });

        if event.trigger.is_critical() {
            info!(
                service = %event.service,
                trigger = %event.trigger,
                consecutive_failures = count,
                "critical failure; bypassing threshold"
            );
            return true;
        }
        let trigger = count >= self.threshold;
        debug!(
            service = %event.service,
            trigger = %event.trigger,
            consecutive_failures = count,
            threshold = self.threshold,
            fire = trigger,
            "evaluated failure"
        );
        trigger
    }

    /// A healthy observation clears the streak.
    pub fn record_healthy(&mut self, service: &str) {
        if let Some(state) = self.services.get_mut(service) {
            if state.consecutive_failures > 0 {
                debug!(service, previous = state.consecutive_failures, "service recovered");
            }
            state.consecutive_failures = 0;
        }
    }

    /// Successful remediation clears the streak; a failed one leaves it for escalation.
    pub fn record_outcome(&mut self, event: &FailoverEvent) {
        if event.success {
            self.record_healthy(&event.service);
        }
    }

    pub fn consecutive_failures(&self, service: &str) -> u32 {
        self.services
            .get(service)
            .map(|state| state.consecutive_failures)
            .unwrap_or_default()
    }

    /// Every known counter, ordered by service name.
    pub fn counters(&self) -> BTreeMap<String, u32> {
        self.services
            .iter()
            .map(|(service, state)| (service.clone(), state.consecutive_failures))
            .collect()
    }

    pub fn failure_history(&self, service: &str) -> Vec<FailureEvent> {
        self.services
            .get(service)
            .map(|state| state.history.to_vec())
            .unwrap_or_default()
    }

    /// Map a failure onto a remediation plan. Depends on `event` alone.
    pub fn decide_strategy(event: &FailureEvent) -> FailoverPlan {
        let service = event.service.as_str();
        let base = base_service_name(service).to_owned();
        let (strategy, target, scale_factor, estimated_downtime) = match event.trigger {
            TriggerType::ResourceExhaustion => (
                Strategy::ScaleUp,
                base.clone(),
                SCALE_UP_STEP,
                SCALE_UP_DOWNTIME,
            ),
            TriggerType::NetworkPartition => (
                Strategy::SwitchToBackup,
                sibling_instance(service),
                0,
                SWITCH_DOWNTIME,
            ),
            TriggerType::InstanceExit
            | TriggerType::HealthCheckFailed
            | TriggerType::HealthCheckTimeout
            | TriggerType::Unclassified => {
                (Strategy::Restart, service.to_owned(), 0, RESTART_DOWNTIME)
            }
        };
        FailoverPlan {
            service: service.to_owned(),
            base_service: base,
            trigger: event.trigger,
            strategy,
            target,
            scale_factor,
            estimated_downtime,
        }
    }
}

/// Service name with a trailing `-primary` or `-backup` role removed.
pub fn base_service_name(service: &str) -> &str {
    service
        .strip_suffix(PRIMARY_SUFFIX)
        .or_else(|| service.strip_suffix(BACKUP_SUFFIX))
        .filter(|base| !base.is_empty())
        .unwrap_or(service)
}

/// The opposite-role instance: `x-primary` <-> `x-backup`; `x` maps to `x-backup`.
pub fn sibling_instance(service: &str) -> String {
    if let Some(base) = service.strip_suffix(PRIMARY_SUFFIX).filter(|b| !b.is_empty()) {
        format!("{base}{BACKUP_SUFFIX}")
    } else if let Some(base) = service.strip_suffix(BACKUP_SUFFIX).filter(|b| !b.is_empty()) {
        format!("{base}{PRIMARY_SUFFIX}")
    } else {
        format!("{service}{BACKUP_SUFFIX}")
    }
}
