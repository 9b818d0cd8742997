//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Executes failover plans against the runtime gateway."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use warden_common::RedundancyConfig;
use warden_runtime::{with_timeout, GatewayError, GatewayOperation, RuntimeGateway};

use crate::failover::{FailoverEvent, FailoverPlan, RecoveryAction, RecoveryActionKind, Strategy};

/// Deadlines applied to remediation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationTimeouts {
    pub restart: Duration,
    pub scale: Duration,
    /// Applied to each of the stop and start calls of a switch-over.
    pub switch_call: Duration,
}

impl Default for RemediationTimeouts {
    fn default() -> Self {
        Self {
            restart: Duration::from_secs(60),
            scale: Duration::from_secs(120),
            switch_call: Duration::from_secs(30),
        }
    }
}

impl From<&RedundancyConfig> for RemediationTimeouts {
    fn from(config: &RedundancyConfig) -> Self {
        Self {
            restart: config.failover_timeout,
            scale: config.scale_timeout,
            switch_call: config.switch_call_timeout,
        }
    }
}

/// Replica bookkeeping a scale-up needs from the latest observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaContext {
    pub current_target: u32,
    pub max_replicas: u32,
}

impl Default for ReplicaContext {
    fn default() -> Self {
        Self {
            current_target: 1,
            max_replicas: u32::MAX,
        }
    }
}

/// Runs failover plans; never retries within one attempt.
#[derive(Clone)]
pub struct FailoverExecutor {
    gateway: Arc<dyn RuntimeGateway>,
    timeouts: RemediationTimeouts,
}

impl std::fmt::Debug for FailoverExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverExecutor")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl FailoverExecutor {
    pub fn new(gateway: Arc<dyn RuntimeGateway>, timeouts: RemediationTimeouts) -> Self {
        Self { gateway, timeouts }
    }

    pub fn timeouts(&self) -> RemediationTimeouts {
        self.timeouts
    }

    /// Execute `plan` and return the completed record.
    pub async fn execute(&self, plan: &FailoverPlan, replicas: ReplicaContext) -> FailoverEvent {
        self.run(FailoverEvent::begin(plan), plan, replicas).await
    }

    /// Drive an in-flight record created from `plan` to completion.
    pub async fn run(
        &self,
        mut event: FailoverEvent,
        plan: &FailoverPlan,
        replicas: ReplicaContext,
    ) -> FailoverEvent {
        info!(
            failover = %event.id,
            service = %plan.service,
            strategy = %plan.strategy,
            target = %plan.target,
            "executing failover"
        );
        let outcome = match plan.strategy {
            Strategy::Restart => self.restart(&mut event, plan).await,
            Strategy::ScaleUp => self.scale_up(&mut event, plan, replicas).await,
            Strategy::SwitchToBackup => self.switch_to_backup(&mut event, plan).await,
        };
        match outcome {
            Ok(()) => event.complete(true, None),
            Err(reason) => {
                warn!(
                    failover = %event.id,
                    service = %plan.service,
                    strategy = %plan.strategy,
                    error = %reason,
                    "failover attempt failed"
                );
                event.complete(false, Some(reason));
            }
        }
        event
    }

    async fn restart(&self, event: &mut FailoverEvent, plan: &FailoverPlan) -> Result<(), String> {
        with_timeout(
            GatewayOperation::Restart,
            self.timeouts.restart,
            self.gateway.restart(&plan.target),
        )
        .await
        .map_err(|err| err.to_string())?;
        event.record(RecoveryAction::new(
            RecoveryActionKind::RestartInstance,
            &plan.target,
        ));
        Ok(())
    }

    async fn scale_up(
        &self,
        event: &mut FailoverEvent,
        plan: &FailoverPlan,
        replicas: ReplicaContext,
    ) -> Result<(), String> {
        let current = replicas.current_target.max(1);
        if current >= replicas.max_replicas {
            return Err(format!(
                "{} already at max replicas ({})",
                plan.target, replicas.max_replicas
            ));
        }
        let desired = current
            .saturating_add(plan.scale_factor.max(1))
            .min(replicas.max_replicas);
        with_timeout(
            GatewayOperation::Scale,
            self.timeouts.scale,
            self.gateway.scale(&plan.target, desired),
        )
        .await
        .map_err(|err| err.to_string())?;
        event.record(RecoveryAction::scaled(&plan.target, desired));
        Ok(())
    }

    /// Stop the failing instance, then start its sibling. Each step is
    /// attempted regardless of the other; one success is enough.
    async fn switch_to_backup(
        &self,
        event: &mut FailoverEvent,
        plan: &FailoverPlan,
    ) -> Result<(), String> {
        let mut errors: Vec<GatewayError> = Vec::new();

        match with_timeout(
            GatewayOperation::Stop,
            self.timeouts.switch_call,
            self.gateway.stop(&plan.service),
        )
        .await
        {
            Ok(()) => event.record(RecoveryAction::new(
                RecoveryActionKind::StopInstance,
                &plan.service,
            )),
            Err(err) => {
                warn!(service = %plan.service, error = %err, "stopping failing instance failed");
                errors.push(err);
            }
        }

        match with_timeout(
            GatewayOperation::Start,
            self.timeouts.switch_call,
            self.gateway.start(&plan.target),
        )
        .await
        {
            Ok(()) => event.record(RecoveryAction::new(
                RecoveryActionKind::StartInstance,
                &plan.target,
            )),
            Err(err) => {
                warn!(backup = %plan.target, error = %err, "starting backup instance failed");
                errors.push(err);
            }
        }

        if event.actions.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(joined);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::FailoverDecisionEngine;
    use crate::failure::{FailureEvent, TriggerType};
    use warden_runtime::{GatewayCall, MockRuntimeGateway};

    fn executor(gateway: &Arc<MockRuntimeGateway>) -> FailoverExecutor {
        FailoverExecutor::new(gateway.clone(), RemediationTimeouts::default())
    }

    fn plan(service: &str, trigger: TriggerType) -> FailoverPlan {
        FailoverDecisionEngine::decide_strategy(&FailureEvent::new(service, trigger))
    }

    #[tokio::test]
    async fn restart_success_records_action() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["api"]));
        let event = executor(&gateway)
            .execute(&plan("api", TriggerType::InstanceExit), ReplicaContext::default())
            .await;
        assert!(event.success);
        assert_eq!(event.actions.len(), 1);
        assert_eq!(event.actions[0].kind, RecoveryActionKind::RestartInstance);
        assert_eq!(gateway.remediation_calls(), vec![GatewayCall::Restart("api".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_timeout_is_a_failed_event() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["api"]));
        gateway.delay(GatewayOperation::Restart, Duration::from_secs(600));
        let event = executor(&gateway)
            .execute(&plan("api", TriggerType::InstanceExit), ReplicaContext::default())
            .await;
        assert!(!event.success);
        assert!(event.actions.is_empty());
        assert!(event.error.as_ref().unwrap().contains("timed out"));
        assert!(event.is_completed());
    }

    #[tokio::test]
    async fn scale_up_adds_a_replica_within_bounds() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["api-primary"]));
        let event = executor(&gateway)
            .execute(
                &plan("api-primary", TriggerType::ResourceExhaustion),
                ReplicaContext {
                    current_target: 2,
                    max_replicas: 3,
                },
            )
            .await;
        assert!(event.success);
        assert_eq!(event.actions[0].replicas, Some(3));
        assert_eq!(gateway.remediation_calls(), vec![GatewayCall::Scale("api".into(), 3)]);
    }

    #[tokio::test]
    async fn scale_up_at_cap_fails_without_calling_gateway() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["api"]));
        let event = executor(&gateway)
            .execute(
                &plan("api", TriggerType::ResourceExhaustion),
                ReplicaContext {
                    current_target: 3,
                    max_replicas: 3,
                },
            )
            .await;
        assert!(!event.success);
        assert!(gateway.remediation_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn scale_timeout_is_a_failed_event() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["api-primary"]));
        gateway.delay(GatewayOperation::Scale, Duration::from_secs(600));
        let event = executor(&gateway)
            .execute(
                &plan("api-primary", TriggerType::ResourceExhaustion),
                ReplicaContext {
                    current_target: 1,
                    max_replicas: 4,
                },
            )
            .await;
        assert!(!event.success);
        assert!(event.actions.is_empty());
        let error = event.error.unwrap();
        assert!(error.contains("scale"), "{error}");
        assert!(error.contains("timed out"), "{error}");
        assert_eq!(gateway.remediation_calls(), vec![GatewayCall::Scale("api".into(), 2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stop_is_skipped_and_backup_still_starts() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy(["pm-worker-backup"]));
        gateway.delay(GatewayOperation::Stop, Duration::from_secs(600));
        let started = tokio::time::Instant::now();
        let event = executor(&gateway)
            .execute(
                &plan("pm-worker-primary", TriggerType::NetworkPartition),
                ReplicaContext::default(),
            )
            .await;
        assert!(event.success);
        assert_eq!(event.actions.len(), 1);
        assert_eq!(event.actions[0].kind, RecoveryActionKind::StartInstance);
        assert!(started.elapsed() < Duration::from_secs(600));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_stop_and_start_fail_the_switch() {
        let gateway = Arc::new(MockRuntimeGateway::new());
        gateway.delay(GatewayOperation::Stop, Duration::from_secs(600));
        gateway.delay(GatewayOperation::Start, Duration::from_secs(600));
        let event = executor(&gateway)
            .execute(
                &plan("pm-worker-primary", TriggerType::NetworkPartition),
                ReplicaContext::default(),
            )
            .await;
        assert!(!event.success);
        assert!(event.actions.is_empty());
        let error = event.error.unwrap();
        assert_eq!(error.matches("timed out").count(), 2, "{error}");
        assert_eq!(
            gateway.remediation_calls(),
            vec![
                GatewayCall::Stop("pm-worker-primary".into()),
                GatewayCall::Start("pm-worker-backup".into()),
            ]
        );
    }

    #[tokio::test]
    async fn switch_tolerates_one_failed_step() {
        let gateway = Arc::new(MockRuntimeGateway::with_healthy([
            "pm-worker-primary",
            "pm-worker-backup",
        ]));
        gateway.fail(
            GatewayOperation::Stop,
            "pm-worker-primary",
            GatewayError::Partitioned {
                service: "pm-worker-primary".into(),
                detail: "unreachable".into(),
            },
        );
        let event = executor(&gateway)
            .execute(
                &plan("pm-worker-primary", TriggerType::NetworkPartition),
                ReplicaContext::default(),
            )
            .await;
        assert!(event.success);
        assert_eq!(event.actions.len(), 1);
        assert_eq!(event.actions[0].kind, RecoveryActionKind::StartInstance);
        assert_eq!(
            gateway.remediation_calls(),
            vec![
                GatewayCall::Stop("pm-worker-primary".into()),
                GatewayCall::Start("pm-worker-backup".into()),
            ]
        );
    }

    #[tokio::test]
    async fn switch_fails_when_both_steps_fail() {
        let gateway = Arc::new(MockRuntimeGateway::new());
        gateway.fail(
            GatewayOperation::Stop,
            "db-primary",
            GatewayError::transient("daemon down"),
        );
        gateway.fail(
            GatewayOperation::Start,
            "db-backup",
            GatewayError::not_found("db-backup"),
        );
        let event = executor(&gateway)
            .execute(
                &plan("db-primary", TriggerType::NetworkPartition),
                ReplicaContext::default(),
            )
            .await;
        assert!(!event.success);
        let error = event.error.unwrap();
        assert!(error.contains("daemon down"));
        assert!(error.contains("db-backup"));
    }
}
