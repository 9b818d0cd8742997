//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Concurrent health polling and observation history."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use warden_common::time::within_window;
use warden_runtime::{
    with_timeout, CatalogError, GatewayError, GatewayOperation, RuntimeGateway, ServiceCatalog,
    ServiceStatus,
};

use crate::history::BoundedHistory;

/// Observations retained per service.
pub const OBSERVATION_HISTORY: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("failed to enumerate services: {0}")]
    Enumeration(#[from] CatalogError),
}

/// Polls every catalogued service through the gateway.
///
/// Holds no mutable state so a poll can run without any lock held; batches
/// are recorded into an [`ObservationLog`] by the caller.
#[derive(Clone)]
pub struct HealthMonitor {
    gateway: Arc<dyn RuntimeGateway>,
    catalog: Arc<dyn ServiceCatalog>,
    timeout: Duration,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(
        gateway: Arc<dyn RuntimeGateway>,
        catalog: Arc<dyn ServiceCatalog>,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            catalog,
            timeout,
        }
    }

    /// Inspect every service concurrently.
    ///
    /// The batch has one entry per catalogued service, in catalog order. A failed
    /// inspect yields an `error`/`unhealthy` status carrying the error; only a
    /// failure to enumerate the catalog aborts the poll.
    pub async fn poll_all(&self) -> Result<Vec<ServiceStatus>, MonitorError> {
        let services = self.catalog.services().await?;
        let permits = Arc::new(Semaphore::new(services.len().max(1)));

        let polls = services.iter().map(|service| {
            let permits = Arc::clone(&permits);
            async move {
                let _permit = permits.acquire().await.ok();
                self.inspect_one(service).await
            }
        });
        let batch = join_all(polls).await;
        debug!(
            services = batch.len(),
            healthy = batch.iter().filter(|status| status.is_healthy()).count(),
            "poll complete"
        );
        Ok(batch)
    }

    async fn inspect_one(&self, service: &str) -> ServiceStatus {
        let result: Result<ServiceStatus, GatewayError> = with_timeout(
            GatewayOperation::Inspect,
            self.timeout,
            self.gateway.inspect(service),
        )
        .await;
        match result {
            Ok(mut status) if status.service != service => {
                status.service = service.to_owned();
                status
            }
            Ok(status) => status,
            Err(err) => {
                warn!(service, error = %err, kind = err.kind().as_str(), "inspect failed");
                ServiceStatus::from_error(service, &err)
            }
        }
    }
}

/// Per-service ring buffers of recent observations, for diagnostics only.
#[derive(Debug, Clone)]
pub struct ObservationLog {
    capacity: usize,
    retention: Duration,
    services: HashMap<String, BoundedHistory<ServiceStatus>>,
}

impl ObservationLog {
    /// Keep at most [`OBSERVATION_HISTORY`] entries per service, none older than `retention`.
    pub fn new(retention: Duration) -> Self {
        Self::with_capacity(OBSERVATION_HISTORY, retention)
    }

    pub fn with_capacity(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity,
            retention,
            services: HashMap::new(),
        }
    }

    pub fn record(&mut self, batch: &[ServiceStatus], now: DateTime<Utc>) {
        for status in batch {
            self.services
                .entry(status.service.clone())
                .or_insert_with(|| BoundedHistory::new(self.capacity))
                .push(status.clone());
        }
        let retention = self.retention;
        for history in self.services.values_mut() {
            history.retain(|status| within_window(status.observed_at, now, retention));
        }
    }

    /// Copy of the observations kept for `service`, oldest first.
    pub fn history(&self, service: &str) -> Vec<ServiceStatus> {
        self.services
            .get(service)
            .map(BoundedHistory::to_vec)
            .unwrap_or_default()
    }
}
