//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! In-memory [`RuntimeGateway`] used by tests. Statuses, failures and delays are
//! scripted per service; every call is recorded in order.
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{GatewayError, GatewayOperation};
use crate::gateway::RuntimeGateway;
use crate::status::{HealthState, LifecycleState, ServiceStatus};

/// A call observed by [`MockRuntimeGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    /// `inspect(service)`
    Inspect(String),
    /// `restart(service)`
    Restart(String),
    /// `scale(service, replicas)`
    Scale(String, u32),
    /// `stop(service)`
    Stop(String),
    /// `start(service)`
    Start(String),
}

#[derive(Debug, Default)]
struct MockState {
    statuses: HashMap<String, ServiceStatus>,
    failures: HashMap<(GatewayOperation, String), GatewayError>,
    delays: HashMap<GatewayOperation, Duration>,
    calls: Vec<GatewayCall>,
}

/// Scriptable gateway double.
///
/// Successful `restart`/`start`/`scale` calls flip the stored status back to
/// running and healthy; `stop` marks it exited.
#[derive(Debug, Default)]
pub struct MockRuntimeGateway {
    state: Mutex<MockState>,
}

impl MockRuntimeGateway {
    /// Empty gateway: every inspect fails with `NotFound` until a status is set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gateway reporting every listed service as running and healthy.
    pub fn with_healthy<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let gateway = Self::new();
        for service in services {
            gateway.set_status(ServiceStatus::healthy(service));
        }
        gateway
    }

    /// Replace the status returned by `inspect` for `status.service`.
    pub fn set_status(&self, status: ServiceStatus) {
        self.state
            .lock()
            .statuses
            .insert(status.service.clone(), status);
    }

    /// Shortcut for a running service with the given health.
    pub fn set_health(&self, service: &str, health: HealthState) {
        self.set_status(ServiceStatus::new(service, LifecycleState::Running, health));
    }

    /// Make `operation` on `service` fail with `error` until cleared.
    pub fn fail(&self, operation: GatewayOperation, service: &str, error: GatewayError) {
        self.state
            .lock()
            .failures
            .insert((operation, service.to_owned()), error);
    }

    /// Remove a scripted failure.
    pub fn clear_failure(&self, operation: GatewayOperation, service: &str) {
        self.state
            .lock()
            .failures
            .remove(&(operation, service.to_owned()));
    }

    /// Delay every `operation` call by `delay` before it resolves.
    pub fn delay(&self, operation: GatewayOperation, delay: Duration) {
        self.state.lock().delays.insert(operation, delay);
    }

    /// Calls observed so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state.lock().calls.clone()
    }

    /// Calls observed so far, excluding `inspect`.
    pub fn remediation_calls(&self) -> Vec<GatewayCall> {
        self.calls()
            .into_iter()
            .filter(|call| !matches!(call, GatewayCall::Inspect(_)))
            .collect()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    async fn enter(
        &self,
        operation: GatewayOperation,
        service: &str,
        call: GatewayCall,
    ) -> Result<(), GatewayError> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.calls.push(call);
            (
                state.delays.get(&operation).copied(),
                state.failures.get(&(operation, service.to_owned())).cloned(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn mark(&self, service: &str, lifecycle: LifecycleState, health: HealthState) {
        let mut state = self.state.lock();
        let status = state
            .statuses
            .entry(service.to_owned())
            .or_insert_with(|| ServiceStatus::new(service, lifecycle, health));
        status.lifecycle = lifecycle;
        status.health = health;
        status.error = None;
    }
}

#[async_trait]
impl RuntimeGateway for MockRuntimeGateway {
    async fn inspect(&self, service: &str) -> Result<ServiceStatus, GatewayError> {
        self.enter(
            GatewayOperation::Inspect,
            service,
            GatewayCall::Inspect(service.to_owned()),
        )
        .await?;
        let state = self.state.lock();
        state
            .statuses
            .get(service)
            .cloned()
            .map(|mut status| {
                status.observed_at = chrono::Utc::now();
                status
            })
            .ok_or_else(|| GatewayError::not_found(service))
    }

    async fn restart(&self, service: &str) -> Result<(), GatewayError> {
        self.enter(
            GatewayOperation::Restart,
            service,
            GatewayCall::Restart(service.to_owned()),
        )
        .await?;
        self.mark(service, LifecycleState::Running, HealthState::Healthy);
        Ok(())
    }

    async fn scale(&self, service: &str, replicas: u32) -> Result<(), GatewayError> {
        self.enter(
            GatewayOperation::Scale,
            service,
            GatewayCall::Scale(service.to_owned(), replicas),
        )
        .await?;
        let mut state = self.state.lock();
        for status in state.statuses.values_mut() {
            if status.service == service || status.service.starts_with(&format!("{service}-")) {
                status.replicas.target = replicas;
                status.replicas.running = replicas;
                status.lifecycle = LifecycleState::Running;
                status.health = HealthState::Healthy;
                status.resources.cpu_percent = 0.0;
                status.error = None;
            }
        }
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), GatewayError> {
        self.enter(
            GatewayOperation::Stop,
            service,
            GatewayCall::Stop(service.to_owned()),
        )
        .await?;
        self.mark(service, LifecycleState::Exited, HealthState::Unhealthy);
        Ok(())
    }

    async fn start(&self, service: &str) -> Result<(), GatewayError> {
        self.enter(
            GatewayOperation::Start,
            service,
            GatewayCall::Start(service.to_owned()),
        )
        .await?;
        self.mark(service, LifecycleState::Running, HealthState::Healthy);
        Ok(())
    }
}
