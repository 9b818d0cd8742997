//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Monitoring loop, failover coordination and status snapshots."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! The controller is meant to be the only active instance for a fleet. Two
//! controllers pointed at the same services will both remediate.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use warden_common::time::elapsed_between;
use warden_common::RedundancyConfig;
use warden_metrics::{FailoverOutcome, RedundancyMetrics};
use warden_runtime::{HealthState, LifecycleState, RuntimeGateway, ServiceCatalog, ServiceStatus};

use crate::cascade::{CascadeInfo, CascadingFailureDetector, EmergencyResponsePlan, CASCADE_WINDOW};
use crate::decision::FailoverDecisionEngine;
use crate::executor::{FailoverExecutor, RemediationTimeouts, ReplicaContext};
use crate::failover::{FailoverEvent, FailoverPlan};
use crate::failure::{FailureEvent, TriggerType};
use crate::history::BoundedHistory;
use crate::monitor::{HealthMonitor, ObservationLog};
use crate::notify::NotificationSink;

/// How long a completed failover stays in the active set.
pub const FAILOVER_RETENTION: Duration = Duration::from_secs(300);
/// Completed failovers kept for diagnostics.
pub const COMPLETED_FAILOVER_LOG: usize = 100;
/// Failure events kept for cascade detection.
pub const GLOBAL_FAILURE_HISTORY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("invalid redundancy configuration: {0}")]
    InvalidConfig(String),
    #[error("service {0} is not monitored")]
    UnknownService(String),
    #[error("no tokio runtime available to drive the monitoring loop")]
    NoRuntime,
}

/// Read-only snapshot returned by [`RedundancyController::status`].
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub monitoring_active: bool,
    /// Latest observation per service; services absent from the last poll read `unknown`.
    pub services: IndexMap<String, ServiceStatus>,
    /// In flight, or completed within the retention window.
    pub active_failovers: Vec<FailoverEvent>,
    /// Healthy share of the latest poll in percent; zero before the first poll.
    pub availability_percent: f64,
    pub healthy_services: usize,
    pub total_services: usize,
    pub consecutive_failures: BTreeMap<String, u32>,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_emergency_plan: Option<EmergencyResponsePlan>,
    pub config: RedundancyConfig,
}

/// What a single tick observed and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// The catalog could not be enumerated; nothing else happened.
    pub skipped: bool,
    pub polled: usize,
    pub failures: Vec<FailureEvent>,
    pub failovers: Vec<FailoverEvent>,
    pub cascade: Option<CascadeInfo>,
    /// Set only when a plan was issued during this tick.
    pub emergency_plan: Option<EmergencyResponsePlan>,
}

#[derive(Debug)]
struct ControllerState {
    engine: FailoverDecisionEngine,
    observations: ObservationLog,
    latest: IndexMap<String, ServiceStatus>,
    last_poll: Option<PollSummary>,
    failures: BoundedHistory<FailureEvent>,
    active_failovers: IndexMap<Uuid, FailoverEvent>,
    completed: BoundedHistory<FailoverEvent>,
    last_plan: Option<EmergencyResponsePlan>,
    last_summary_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct PollSummary {
    at: DateTime<Utc>,
    healthy: usize,
    total: usize,
}

impl ControllerState {
    fn new(config: &RedundancyConfig) -> Self {
        let latest = config
            .services
            .keys()
            .map(|name| (name.clone(), ServiceStatus::unknown(name.clone(), "not yet polled")))
            .collect();
        Self {
            engine: FailoverDecisionEngine::new(config.failure_threshold),
            observations: ObservationLog::new(config.metrics_retention),
            latest,
            last_poll: None,
            failures: BoundedHistory::new(GLOBAL_FAILURE_HISTORY),
            active_failovers: IndexMap::new(),
            completed: BoundedHistory::new(COMPLETED_FAILOVER_LOG),
            last_plan: None,
            last_summary_at: None,
        }
    }

    /// Replace the latest view with `batch`. Services the batch does not cover
    /// are downgraded to `unknown` instead of keeping a stale observation.
    fn merge_poll(&mut self, batch: &[ServiceStatus], now: DateTime<Utc>) {
        let polled: HashSet<&str> = batch.iter().map(|status| status.service.as_str()).collect();
        for (name, status) in self.latest.iter_mut() {
            if !polled.contains(name.as_str()) && status.health != HealthState::Unknown {
                *status = ServiceStatus::unknown(name.clone(), "missing from latest poll");
            }
        }
        for status in batch {
            self.latest.insert(status.service.clone(), status.clone());
        }
        self.observations.record(batch, now);
        self.last_poll = Some(PollSummary {
            at: now,
            healthy: batch.iter().filter(|status| status.is_healthy()).count(),
            total: batch.len(),
        });
    }

    fn prune_failovers(&mut self, now: DateTime<Utc>) {
        self.active_failovers
            .retain(|_, event| event.is_active_at(now, FAILOVER_RETENTION));
    }

    fn availability_ratio(&self) -> f64 {
        match self.last_poll {
            Some(poll) if poll.total > 0 => poll.healthy as f64 / poll.total as f64,
            _ => 0.0,
        }
    }
}

struct Shared {
    config: Arc<RedundancyConfig>,
    monitor: HealthMonitor,
    executor: FailoverExecutor,
    detector: CascadingFailureDetector,
    sink: Arc<dyn NotificationSink>,
    metrics: Option<RedundancyMetrics>,
    state: Mutex<ControllerState>,
    /// Serialises ticks and manual triggers so decisions never interleave.
    decisions: tokio::sync::Mutex<()>,
}

struct Worker {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Ties monitoring, decisions, remediation and escalation together.
pub struct RedundancyController {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for RedundancyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundancyController")
            .field("running", &self.is_running())
            .field("services", &self.shared.config.services.len())
            .finish_non_exhaustive()
    }
}

impl RedundancyController {
    pub fn new(
        config: RedundancyConfig,
        gateway: Arc<dyn RuntimeGateway>,
        catalog: Arc<dyn ServiceCatalog>,
        sink: Arc<dyn NotificationSink>,
        metrics: Option<RedundancyMetrics>,
    ) -> Result<Self, ControllerError> {
        config
            .validate()
            .map_err(|err| ControllerError::InvalidConfig(format!("{err:#}")))?;
        let monitor = HealthMonitor::new(
            Arc::clone(&gateway),
            catalog,
            config.health_check_timeout,
        );
        let executor = FailoverExecutor::new(gateway, RemediationTimeouts::from(&config));
        let state = ControllerState::new(&config);
        Ok(Self {
            shared: Arc::new(Shared {
                config: Arc::new(config),
                monitor,
                executor,
                detector: CascadingFailureDetector::new(),
                sink,
                metrics,
                state: Mutex::new(state),
                decisions: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> Arc<RedundancyConfig> {
        Arc::clone(&self.shared.config)
    }

    /// Whether the monitoring loop task is alive. A loop that panicked reads
    /// as stopped even though `stop()` was never called.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    /// Spawn the monitoring loop. Starting a running controller does nothing.
    pub fn start(&self) -> Result<(), ControllerError> {
        let mut worker = self.worker.lock();
        if worker
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            debug!("redundancy controller already running");
            return Ok(());
        }
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| ControllerError::NoRuntime)?;
        let (shutdown, signal) = watch::channel(false);
        let handle = runtime.spawn(run_loop(Arc::clone(&self.shared), signal));
        *worker = Some(Worker { shutdown, handle });
        info!(
            services = self.shared.config.services.len(),
            interval_secs = self.shared.config.health_check_interval.as_secs_f64(),
            threshold = self.shared.config.failure_threshold,
            "redundancy controller started"
        );
        Ok(())
    }

    /// Ask the loop to exit after its current tick and wait for it. Idempotent.
    pub async fn stop(&self) {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            return;
        };
        let _ = worker.shutdown.send(true);
        if let Err(err) = worker.handle.await {
            error!(error = %err, "monitoring loop terminated abnormally");
        }
        info!("redundancy controller stopped");
    }

    /// Run one monitoring tick now, serialised with the loop.
    pub async fn tick(&self) -> TickReport {
        self.shared.tick().await
    }

    /// Remediate `service` immediately, skipping the threshold check.
    pub async fn trigger_failover(
        &self,
        service: &str,
        trigger: TriggerType,
    ) -> Result<FailoverEvent, ControllerError> {
        let _turn = self.shared.decisions.lock().await;
        let (plan, replicas) = {
            let state = self.shared.state.lock();
            let Some(status) = state.latest.get(service) else {
                return Err(ControllerError::UnknownService(service.to_owned()));
            };
            let failure = FailureEvent::new(service, trigger).with_detail("manual trigger");
            let plan = FailoverDecisionEngine::decide_strategy(&failure);
            let replicas = self.shared.replica_context(&plan, Some(status));
            (plan, replicas)
        };
        info!(service, trigger = %trigger, strategy = %plan.strategy, "manual failover requested");
        Ok(self.shared.remediate(plan, replicas).await)
    }

    /// Snapshot copied under the state lock.
    pub fn status(&self) -> SystemStatus {
        let monitoring_active = self.is_running();
        let now = Utc::now();
        let state = self.shared.state.lock();
        let (healthy_services, total_services) = state
            .last_poll
            .map(|poll| (poll.healthy, poll.total))
            .unwrap_or_default();
        SystemStatus {
            monitoring_active,
            services: state.latest.clone(),
            active_failovers: state
                .active_failovers
                .values()
                .filter(|event| event.is_active_at(now, FAILOVER_RETENTION))
                .cloned()
                .collect(),
            availability_percent: state.availability_ratio() * 100.0,
            healthy_services,
            total_services,
            consecutive_failures: state.engine.counters(),
            last_poll_at: state.last_poll.map(|poll| poll.at),
            last_emergency_plan: state.last_plan.clone(),
            config: (*self.shared.config).clone(),
        }
    }

    /// Recent observations of `service`, oldest first.
    pub fn history(&self, service: &str) -> Vec<ServiceStatus> {
        self.shared.state.lock().observations.history(service)
    }

    /// Recent failure events of `service`, oldest first.
    pub fn failure_history(&self, service: &str) -> Vec<FailureEvent> {
        self.shared.state.lock().engine.failure_history(service)
    }

    /// Last completed failovers, oldest first.
    pub fn recent_failovers(&self) -> Vec<FailoverEvent> {
        self.shared.state.lock().completed.to_vec()
    }

    pub fn consecutive_failures(&self, service: &str) -> u32 {
        self.shared.state.lock().engine.consecutive_failures(service)
    }
}

impl Shared {
    async fn tick(&self) -> TickReport {
        let _turn = self.decisions.lock().await;
        let batch = match self.monitor.poll_all().await {
            Ok(batch) => batch,
            Err(err) => {
                error!(error = %err, "service enumeration failed; skipping tick");
                if let Some(metrics) = &self.metrics {
                    metrics.inc_tick_skipped();
                }
                return TickReport {
                    skipped: true,
                    ..TickReport::default()
                };
            }
        };
        let now = Utc::now();
        let mut report = TickReport {
            polled: batch.len(),
            ..TickReport::default()
        };

        let pending = self.evaluate(&batch, now, &mut report);
        for (plan, replicas) in pending {
            let event = self.remediate(plan, replicas).await;
            report.failovers.push(event);
        }
        self.escalate(now, &mut report);
        self.publish(&batch, now);
        report
    }

    /// Merge the batch and decide, all under one lock hold. Returns the plans to execute.
    fn evaluate(
        &self,
        batch: &[ServiceStatus],
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Vec<(FailoverPlan, ReplicaContext)> {
        let mut state = self.state.lock();
        state.merge_poll(batch, now);
        state.prune_failovers(now);

        let mut pending = Vec::new();
        for status in batch {
            if let (Some(kind), Some(metrics)) = (status.error, &self.metrics) {
                metrics.inc_poll_error(&status.service, kind.as_str());
            }
            if status.is_healthy() {
                state.engine.record_healthy(&status.service);
                continue;
            }
            let trigger = TriggerType::classify(status, self.config.scale_up_cpu_threshold);
            let mut failure = FailureEvent::from_status(status, trigger);
            let fire = state.engine.should_trigger(&failure);
            failure.consecutive_failures = state.engine.consecutive_failures(&status.service);
            state.failures.push(failure.clone());
            if fire {
                let plan = FailoverDecisionEngine::decide_strategy(&failure);
                pending.push((plan.clone(), self.replica_context(&plan, Some(status))));
            } else {
                debug!(
                    service = %status.service,
                    trigger = %trigger,
                    consecutive_failures = failure.consecutive_failures,
                    "below failure threshold"
                );
            }
            report.failures.push(failure);
        }
        pending
    }

    /// Execute without holding the state lock; the in-flight record is visible to `status()`.
    async fn remediate(&self, plan: FailoverPlan, replicas: ReplicaContext) -> FailoverEvent {
        let in_flight = FailoverEvent::begin(&plan);
        self.state
            .lock()
            .active_failovers
            .insert(in_flight.id, in_flight.clone());

        let event = self.executor.run(in_flight, &plan, replicas).await;
        {
            let mut state = self.state.lock();
            state.engine.record_outcome(&event);
            state.active_failovers.insert(event.id, event.clone());
            state.completed.push(event.clone());
        }
        if let Some(metrics) = &self.metrics {
            metrics.observe_failover(FailoverOutcome {
                service: &event.service,
                strategy: event.strategy.as_str(),
                success: event.success,
                elapsed: event.elapsed(),
            });
        }
        info!(
            failover = %event.id,
            service = %event.service,
            strategy = %event.strategy,
            success = event.success,
            actions = event.actions.len(),
            "failover completed"
        );
        event
    }

    /// Cascade detection; a plan goes out at most once per cascade window.
    fn escalate(&self, now: DateTime<Utc>, report: &mut TickReport) {
        let plan = {
            let mut state = self.state.lock();
            let info = self.detector.detect_at(state.failures.iter(), now);
            let cascading = info.is_cascading;
            report.cascade = Some(info.clone());
            if !cascading {
                return;
            }
            let recently_issued = state
                .last_plan
                .as_ref()
                .is_some_and(|plan| elapsed_between(plan.generated_at, now) < CASCADE_WINDOW);
            if recently_issued {
                debug!(
                    services = info.affected_services,
                    "cascade persists; emergency plan already issued"
                );
                return;
            }
            let plan = self.detector.build_emergency_plan(&info);
            state.last_plan = Some(plan.clone());
            plan
        };
        if let Some(metrics) = &self.metrics {
            metrics.inc_cascade();
        }
        report.emergency_plan = Some(plan.clone());
        self.dispatch(plan);
    }

    fn dispatch(&self, plan: EmergencyResponsePlan) {
        let sink = Arc::clone(&self.sink);
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Err(err) = sink.notify(&plan).await {
                warn!(error = %format!("{err:#}"), "emergency plan notification failed");
                if let Some(metrics) = metrics {
                    metrics.inc_notification_failure();
                }
            }
        });
    }

    /// Gauges every tick; the fleet summary line once per monitoring interval.
    fn publish(&self, batch: &[ServiceStatus], now: DateTime<Utc>) {
        let mut state = self.state.lock();
        let ratio = state.availability_ratio();
        if let Some(metrics) = &self.metrics {
            metrics.set_availability(ratio);
            for status in batch {
                metrics.set_consecutive_failures(
                    &status.service,
                    state.engine.consecutive_failures(&status.service),
                );
            }
        }

        let due = state
            .last_summary_at
            .map_or(true, |at| elapsed_between(at, now) >= self.config.monitoring_interval);
        if !due {
            return;
        }
        state.last_summary_at = Some(now);
        let over_provisioned: Vec<&str> = batch
            .iter()
            .filter(|status| self.is_over_provisioned(status))
            .map(|status| status.service.as_str())
            .collect();
        info!(
            availability_percent = ratio * 100.0,
            services = batch.len(),
            active_failovers = state.active_failovers.len(),
            ?over_provisioned,
            "fleet summary"
        );
    }

    fn is_over_provisioned(&self, status: &ServiceStatus) -> bool {
        let bounds = self.config.replica_bounds_for(
            crate::decision::base_service_name(&status.service),
            &status.service,
        );
        status.lifecycle == LifecycleState::Running
            && status.resources.cpu_percent < self.config.scale_down_cpu_threshold
            && status.replicas.target > bounds.min_replicas
    }

    fn replica_context(&self, plan: &FailoverPlan, status: Option<&ServiceStatus>) -> ReplicaContext {
        let bounds = self
            .config
            .replica_bounds_for(&plan.base_service, &plan.service);
        let current_target = status
            .map(|status| status.replicas.target)
            .unwrap_or(bounds.min_replicas)
            .max(1);
        ReplicaContext {
            current_target,
            max_replicas: bounds.max_replicas,
        }
    }
}

async fn run_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(shared.config.health_check_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("monitoring loop received shutdown");
                    break;
                }
            }
            _ = ticker.tick() => {
                let report = shared.tick().await;
                debug!(
                    skipped = report.skipped,
                    polled = report.polled,
                    failures = report.failures.len(),
                    failovers = report.failovers.len(),
                    "monitoring tick complete"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::TracingNotificationSink;
    use warden_common::ServiceConfig;
    use warden_runtime::{GatewayCall, MockRuntimeGateway, StaticCatalog};

    fn controller(
        config: RedundancyConfig,
        gateway: &Arc<MockRuntimeGateway>,
    ) -> RedundancyController {
        let catalog = Arc::new(StaticCatalog::new(config.service_names()));
        RedundancyController::new(
            config,
            gateway.clone(),
            catalog,
            Arc::new(TracingNotificationSink),
            None,
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let gateway = Arc::new(MockRuntimeGateway::new());
        let err = RedundancyController::new(
            RedundancyConfig::default(),
            gateway,
            Arc::new(StaticCatalog::new(["a"])),
            Arc::new(TracingNotificationSink),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn status_before_first_poll_lists_configured_services() {
        let gateway = Arc::new(MockRuntimeGateway::new());
        let controller = controller(RedundancyConfig::with_services(["a", "b"]), &gateway);
        let status = controller.status();
        assert!(!status.monitoring_active);
        assert_eq!(status.availability_percent, 0.0);
        assert_eq!(status.services.len(), 2);
        assert!(status
            .services
            .values()
            .all(|service| service.health == HealthState::Unknown));
        assert!(status.last_poll_at.is_none());
    }

    #[tokio::test]
    async fn scale_up_uses_observed_target_and_bounds() {
        let mut config = RedundancyConfig::with_services(["api-primary"]);
        config.replicas.insert(
            "api".into(),
            ServiceConfig {
                min_replicas: 1,
                max_replicas: 4,
            },
        );
        let gateway = Arc::new(MockRuntimeGateway::new());
        gateway.set_status(
            ServiceStatus::new("api-primary", LifecycleState::Running, HealthState::Unhealthy)
                .with_cpu(97.0)
                .with_replicas(2, 2),
        );
        let controller = controller(config, &gateway);

        let report = controller.tick().await;
        assert_eq!(report.failovers.len(), 1);
        assert!(report.failovers[0].success);
        assert!(gateway
            .remediation_calls()
            .contains(&GatewayCall::Scale("api".into(), 3)));
    }

    #[tokio::test]
    async fn manual_trigger_runs_outside_threshold() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["db"]));
        let controller = controller(RedundancyConfig::with_services(["db"]), &gateway);
        let event = controller
            .trigger_failover("db", TriggerType::HealthCheckFailed)
            .await
            .unwrap();
        assert!(event.success);
        assert_eq!(gateway.remediation_calls(), vec![GatewayCall::Restart("db".into())]);
        assert_eq!(controller.recent_failovers().len(), 1);
        assert_eq!(controller.status().active_failovers.len(), 1);

        let err = controller
            .trigger_failover("nope", TriggerType::InstanceExit)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::UnknownService(name) if name == "nope"));
    }

    #[tokio::test]
    async fn history_accumulates_per_poll() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["a"]));
        let controller = controller(RedundancyConfig::with_services(["a"]), &gateway);
        controller.tick().await;
        controller.tick().await;
        assert_eq!(controller.history("a").len(), 2);
        assert_eq!(controller.status().availability_percent, 100.0);
    }
}
