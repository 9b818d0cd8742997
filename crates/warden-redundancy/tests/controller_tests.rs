//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "End-to-end controller behaviour against the mock runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use warden_common::config::AppConfig;
use warden_common::RedundancyConfig;
use warden_metrics::{new_registry, RedundancyMetrics};
use warden_redundancy::{
    CascadingFailureDetector, EmergencyResponsePlan, FailoverDecisionEngine, FailoverExecutor,
    FailureEvent, HealthMonitor, NotificationSink, RecoveryActionKind, RedundancyController,
    RemediationTimeouts, ReplicaContext, Strategy, TriggerType,
};
use warden_runtime::{
    CatalogError, GatewayCall, GatewayError, GatewayOperation, HealthState, LifecycleState,
    MockRuntimeGateway, ServiceCatalog, ServiceStatus, StaticCatalog,
};

/// Forwards plans to a channel, optionally failing every delivery.
struct ChannelSink {
    plans: mpsc::UnboundedSender<EmergencyResponsePlan>,
    fail: bool,
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn notify(&self, plan: &EmergencyResponsePlan) -> anyhow::Result<()> {
        let _ = self.plans.send(plan.clone());
        if self.fail {
            return Err(anyhow!("pager unreachable"));
        }
        Ok(())
    }
}

/// Catalog whose contents tests can swap between ticks.
struct SwitchableCatalog {
    services: Mutex<Result<Vec<String>, CatalogError>>,
}

impl SwitchableCatalog {
    fn new(services: &[&str]) -> Self {
        let catalog = Self {
            services: Mutex::new(Ok(Vec::new())),
        };
        catalog.set(services);
        catalog
    }

    fn set(&self, services: &[&str]) {
        *self.services.lock() = Ok(services.iter().map(|s| s.to_string()).collect());
    }

    fn break_down(&self) {
        *self.services.lock() = Err(CatalogError::Unavailable("registry offline".into()));
    }
}

#[async_trait]
impl ServiceCatalog for SwitchableCatalog {
    async fn services(&self) -> Result<Vec<String>, CatalogError> {
        self.services.lock().clone()
    }
}

struct Harness {
    controller: RedundancyController,
    gateway: Arc<MockRuntimeGateway>,
    plans: mpsc::UnboundedReceiver<EmergencyResponsePlan>,
}

fn config(services: &[&str], threshold: u32) -> RedundancyConfig {
    RedundancyConfig {
        failure_threshold: threshold,
        health_check_interval: Duration::from_secs(1),
        ..RedundancyConfig::with_services(services.iter().copied())
    }
}

fn harness(config: RedundancyConfig, gateway: MockRuntimeGateway, failing_sink: bool) -> Harness {
    let gateway = Arc::new(gateway);
    let (tx, plans) = mpsc::unbounded_channel();
    let catalog = Arc::new(StaticCatalog::new(config.service_names()));
    let controller = RedundancyController::new(
        config,
        gateway.clone(),
        catalog,
        Arc::new(ChannelSink {
            plans: tx,
            fail: failing_sink,
        }),
        None,
    )
    .unwrap();
    Harness {
        controller,
        gateway,
        plans,
    }
}

fn exited(service: &str) -> ServiceStatus {
    ServiceStatus::new(service, LifecycleState::Exited, HealthState::Unhealthy)
}

#[tokio::test]
async fn scenario_a_instance_exit_restarts_immediately() {
    let gateway = MockRuntimeGateway::new();
    gateway.set_status(exited("task-worker-primary"));
    let h = harness(config(&["task-worker-primary"], 3), gateway, false);

    let report = h.controller.tick().await;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].trigger, TriggerType::InstanceExit);
    assert_eq!(report.failovers.len(), 1);
    assert!(report.failovers[0].success);
    assert_eq!(
        h.gateway.remediation_calls(),
        vec![GatewayCall::Restart("task-worker-primary".into())]
    );
    assert_eq!(h.controller.consecutive_failures("task-worker-primary"), 0);
}

#[tokio::test]
async fn scenario_b_threshold_restart_on_third_observation() {
    let gateway = MockRuntimeGateway::new();
    gateway.set_health("pm-worker", HealthState::Unhealthy);
    let h = harness(config(&["pm-worker"], 3), gateway, false);

    for expected in 1..=2 {
        let report = h.controller.tick().await;
        assert!(report.failovers.is_empty(), "observation {expected}");
        assert_eq!(report.failures[0].trigger, TriggerType::HealthCheckFailed);
        assert_eq!(report.failures[0].consecutive_failures, expected);
        assert!(h.gateway.remediation_calls().is_empty());
    }

    let report = h.controller.tick().await;
    assert_eq!(report.failovers.len(), 1);
    assert_eq!(report.failovers[0].strategy, Strategy::Restart);
    assert_eq!(
        h.gateway.remediation_calls(),
        vec![GatewayCall::Restart("pm-worker".into())]
    );
    assert_eq!(h.controller.consecutive_failures("pm-worker"), 0);
}

#[tokio::test]
async fn scenario_c_partition_switches_to_backup() {
    let event = FailureEvent::new("pm-worker-primary", TriggerType::NetworkPartition);
    let plan = FailoverDecisionEngine::decide_strategy(&event);
    assert_eq!(plan.strategy, Strategy::SwitchToBackup);
    assert_eq!(plan.target, "pm-worker-backup");

    let gateway = Arc::new(MockRuntimeGateway::with_healthy(["pm-worker-backup"]));
    let executor = FailoverExecutor::new(gateway.clone(), RemediationTimeouts::default());
    let outcome = executor.execute(&plan, ReplicaContext::default()).await;
    assert!(outcome.success);
    assert_eq!(
        gateway.remediation_calls(),
        vec![
            GatewayCall::Stop("pm-worker-primary".into()),
            GatewayCall::Start("pm-worker-backup".into()),
        ]
    );
    let kinds: Vec<_> = outcome.actions.iter().map(|action| action.kind).collect();
    assert_eq!(
        kinds,
        [RecoveryActionKind::StopInstance, RecoveryActionKind::StartInstance]
    );
}

#[tokio::test]
async fn partitioned_inspect_drives_switch_through_the_controller() {
    let gateway = MockRuntimeGateway::with_healthy(["pm-worker-backup"]);
    gateway.fail(
        GatewayOperation::Inspect,
        "pm-worker-primary",
        GatewayError::Partitioned {
            service: "pm-worker-primary".into(),
            detail: "no route to host".into(),
        },
    );
    let h = harness(config(&["pm-worker-primary", "pm-worker-backup"], 1), gateway, false);

    let report = h.controller.tick().await;
    assert_eq!(report.failures[0].trigger, TriggerType::NetworkPartition);
    assert_eq!(report.failovers[0].target, "pm-worker-backup");
    assert_eq!(
        h.gateway.remediation_calls(),
        vec![
            GatewayCall::Stop("pm-worker-primary".into()),
            GatewayCall::Start("pm-worker-backup".into()),
        ]
    );
}

#[test]
fn scenario_d_cluster_of_failures_builds_full_plan() {
    let now = Utc::now();
    let events = [
        FailureEvent::new("api", TriggerType::InstanceExit).at(now - ChronoDuration::seconds(120)),
        FailureEvent::new("db", TriggerType::HealthCheckFailed).at(now - ChronoDuration::seconds(80)),
        FailureEvent::new("api", TriggerType::InstanceExit).at(now - ChronoDuration::seconds(30)),
        FailureEvent::new("cache", TriggerType::ResourceExhaustion).at(now),
    ];
    let detector = CascadingFailureDetector::new();
    let info = detector.detect_at(&events, now);
    assert!(info.is_cascading);
    assert_eq!(info.event_count, 4);
    assert_eq!(info.affected_services, 3);
    assert_eq!(info.time_span, Duration::from_secs(120));

    let plan = detector.build_emergency_plan(&info);
    assert_eq!(plan.actions.len(), 4);
    assert_eq!(plan.total_estimated_duration, Duration::from_secs(485));
    assert_eq!(plan.actions[0].services, ["api", "cache", "db"]);
}

#[tokio::test]
async fn p1_counter_tracks_streak_and_resets_on_health() {
    let gateway = MockRuntimeGateway::new();
    gateway.set_health("api", HealthState::Unhealthy);
    let h = harness(config(&["api"], 5), gateway, false);

    h.controller.tick().await;
    h.controller.tick().await;
    assert_eq!(h.controller.consecutive_failures("api"), 2);

    h.gateway.set_health("api", HealthState::Healthy);
    h.controller.tick().await;
    assert_eq!(h.controller.consecutive_failures("api"), 0);
    assert_eq!(h.controller.failure_history("api").len(), 2);
}

#[tokio::test]
async fn failed_remediation_keeps_counter_for_escalation() {
    let gateway = MockRuntimeGateway::new();
    gateway.set_status(exited("worker"));
    gateway.fail(
        GatewayOperation::Restart,
        "worker",
        GatewayError::transient("daemon busy"),
    );
    let h = harness(config(&["worker"], 3), gateway, false);

    let report = h.controller.tick().await;
    assert!(!report.failovers[0].success);
    assert_eq!(h.controller.consecutive_failures("worker"), 1);

    h.gateway.clear_failure(GatewayOperation::Restart, "worker");
    let report = h.controller.tick().await;
    assert!(report.failovers[0].success);
    assert_eq!(h.controller.consecutive_failures("worker"), 0);
}

#[tokio::test]
async fn p6_batch_survives_single_inspect_failure() {
    let names = ["a", "b", "c", "d", "e"];
    let gateway = Arc::new(MockRuntimeGateway::with_healthy(names));
    gateway.fail(GatewayOperation::Inspect, "c", GatewayError::transient("boom"));
    let monitor = HealthMonitor::new(
        gateway,
        Arc::new(StaticCatalog::new(names)),
        Duration::from_secs(5),
    );
    let batch = monitor.poll_all().await.unwrap();
    assert_eq!(batch.len(), names.len());
    for status in &batch {
        if status.service == "c" {
            assert_eq!(status.lifecycle, LifecycleState::Error);
            assert_eq!(status.health, HealthState::Unhealthy);
        } else {
            assert!(status.is_healthy(), "{}", status.service);
        }
    }
}

#[tokio::test]
async fn cascade_notifies_once_per_window() {
    let gateway = MockRuntimeGateway::new();
    for service in ["a", "b", "c"] {
        gateway.set_health(service, HealthState::Unhealthy);
    }
    let mut h = harness(config(&["a", "b", "c"], 10), gateway, false);

    let report = h.controller.tick().await;
    let cascade = report.cascade.unwrap();
    assert!(cascade.is_cascading);
    assert_eq!(cascade.affected_services, 3);
    assert!(report.emergency_plan.is_some());
    let delivered = h.plans.recv().await.unwrap();
    assert_eq!(delivered.affected_services, 3);

    let report = h.controller.tick().await;
    assert!(report.cascade.unwrap().is_cascading);
    assert!(report.emergency_plan.is_none());
    assert!(h.plans.try_recv().is_err());
    assert!(h.controller.status().last_emergency_plan.is_some());
}

#[tokio::test]
async fn sink_failure_does_not_fail_the_tick() {
    let gateway = MockRuntimeGateway::new();
    for service in ["a", "b", "c"] {
        gateway.set_health(service, HealthState::Unhealthy);
    }
    let registry = new_registry();
    let metrics = RedundancyMetrics::new(registry.clone()).unwrap();
    let gateway = Arc::new(gateway);
    let (tx, mut plans) = mpsc::unbounded_channel();
    let services = ["a", "b", "c"];
    let controller = RedundancyController::new(
        config(&services, 10),
        gateway,
        Arc::new(StaticCatalog::new(services)),
        Arc::new(ChannelSink {
            plans: tx,
            fail: true,
        }),
        Some(metrics),
    )
    .unwrap();

    let report = controller.tick().await;
    assert!(report.emergency_plan.is_some());
    assert!(plans.recv().await.is_some());
    // The controller keeps working after the failed delivery.
    let report = controller.tick().await;
    assert_eq!(report.polled, 3);
    assert!(registry
        .gather()
        .iter()
        .any(|family| family.get_name() == "warden_cascades_total"));
}

#[tokio::test]
async fn enumeration_error_skips_tick_and_degraded_poll_marks_unknown() {
    let gateway = Arc::new(MockRuntimeGateway::with_healthy(["a", "b"]));
    let catalog = Arc::new(SwitchableCatalog::new(&["a", "b"]));
    let (tx, _plans) = mpsc::unbounded_channel();
    let controller = RedundancyController::new(
        config(&["a", "b"], 3),
        gateway,
        catalog.clone(),
        Arc::new(ChannelSink {
            plans: tx,
            fail: false,
        }),
        None,
    )
    .unwrap();

    controller.tick().await;
    let first = controller.status();
    assert_eq!(first.availability_percent, 100.0);

    catalog.break_down();
    let report = controller.tick().await;
    assert!(report.skipped);
    assert_eq!(controller.status().last_poll_at, first.last_poll_at);

    catalog.set(&["a"]);
    controller.tick().await;
    let status = controller.status();
    assert_eq!(status.services["a"].health, HealthState::Healthy);
    assert_eq!(status.services["b"].health, HealthState::Unknown);
    assert_eq!(status.total_services, 1);
}

#[tokio::test(start_paused = true)]
async fn loop_runs_until_stopped_and_stop_is_idempotent() {
    let gateway = MockRuntimeGateway::new();
    gateway.set_status(exited("worker"));
    let h = harness(config(&["worker"], 3), gateway, false);

    h.controller.start().unwrap();
    h.controller.start().unwrap();
    assert!(h.controller.status().monitoring_active);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(h
        .gateway
        .remediation_calls()
        .contains(&GatewayCall::Restart("worker".into())));

    h.controller.stop().await;
    h.controller.stop().await;
    assert!(!h.controller.status().monitoring_active);

    let calls = h.gateway.calls().len();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.gateway.calls().len(), calls);
}

#[tokio::test(start_paused = true)]
async fn stop_lets_in_flight_remediation_finish() {
    let gateway = MockRuntimeGateway::new();
    gateway.set_status(exited("worker"));
    gateway.delay(GatewayOperation::Restart, Duration::from_secs(5));
    let h = harness(config(&["worker"], 3), gateway, false);

    h.controller.start().unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let in_flight = h.controller.status().active_failovers;
    assert_eq!(in_flight.len(), 1);
    assert!(!in_flight[0].is_completed());

    h.controller.stop().await;
    let completed = h.controller.recent_failovers();
    assert_eq!(completed.len(), 1);
    assert!(completed[0].success);
}

fn example_config() -> RedundancyConfig {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs/warden.example.toml");
    AppConfig::from_path(&path).unwrap().redundancy
}

#[tokio::test]
async fn bounds_only_entries_are_never_inspected_or_remediated() {
    let config = example_config();
    let instances = config.service_names();
    let gateway = MockRuntimeGateway::with_healthy(instances.iter().cloned());
    gateway.fail(
        GatewayOperation::Restart,
        "task-worker",
        GatewayError::not_found("task-worker"),
    );
    let mut h = harness(config, gateway, false);

    for _ in 0..3 {
        let report = h.controller.tick().await;
        assert_eq!(report.polled, instances.len());
        assert!(report.failures.is_empty());
        assert!(report.emergency_plan.is_none());
    }

    assert!(!h
        .gateway
        .calls()
        .contains(&GatewayCall::Inspect("task-worker".into())));
    assert!(h.gateway.remediation_calls().is_empty());
    assert!(h.plans.try_recv().is_err());
    let status = h.controller.status();
    assert!(!status.services.contains_key("task-worker"));
    assert_eq!(status.availability_percent, 100.0);
}

#[tokio::test]
async fn scale_up_honours_base_service_bounds_from_replica_table() {
    let config = example_config();
    let gateway = MockRuntimeGateway::with_healthy(config.service_names());
    gateway.set_status(
        ServiceStatus::new("task-worker-primary", LifecycleState::Running, HealthState::Unhealthy)
            .with_cpu(95.0)
            .with_replicas(5, 5),
    );
    let h = harness(config, gateway, false);

    let report = h.controller.tick().await;
    assert_eq!(report.failovers[0].strategy, Strategy::ScaleUp);
    assert!(report.failovers[0].success);
    assert_eq!(
        h.gateway.remediation_calls(),
        vec![GatewayCall::Scale("task-worker".into(), 6)]
    );

    h.gateway.clear_calls();
    h.gateway.set_status(
        ServiceStatus::new("task-worker-primary", LifecycleState::Running, HealthState::Unhealthy)
            .with_cpu(95.0)
            .with_replicas(6, 6),
    );
    let report = h.controller.tick().await;
    assert!(!report.failovers[0].success);
    assert!(h.gateway.remediation_calls().is_empty());
}

/// Catalog that panics on every enumeration, taking the loop task down with it.
struct PanickingCatalog;

#[async_trait]
impl ServiceCatalog for PanickingCatalog {
    async fn services(&self) -> Result<Vec<String>, CatalogError> {
        panic!("catalog backend crashed");
    }
}

#[tokio::test(start_paused = true)]
async fn crashed_loop_reports_monitoring_inactive_and_can_restart() {
    let (tx, _plans) = mpsc::unbounded_channel();
    let controller = RedundancyController::new(
        config(&["a"], 3),
        Arc::new(MockRuntimeGateway::with_healthy(["a"])),
        Arc::new(PanickingCatalog),
        Arc::new(ChannelSink {
            plans: tx,
            fail: false,
        }),
        None,
    )
    .unwrap();

    controller.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!controller.is_running());
    assert!(!controller.status().monitoring_active);

    controller.start().unwrap();
    assert!(controller.is_running());
    controller.stop().await;
    assert!(!controller.is_running());
}
