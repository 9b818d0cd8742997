//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GatewayError, GatewayOperation};
use crate::status::ServiceStatus;

/// Per-instance operations the controller needs from the container runtime.
///
/// Implementations must be safe to cancel at any await point: callers bound every
/// call with [`with_timeout`] and drop the future once the deadline passes.
#[async_trait]
pub trait RuntimeGateway: Send + Sync {
    /// Read the current status of `service`.
    async fn inspect(&self, service: &str) -> Result<ServiceStatus, GatewayError>;

    /// Restart `service` in place.
    async fn restart(&self, service: &str) -> Result<(), GatewayError>;

    /// Set the replica count of `service`.
    async fn scale(&self, service: &str, replicas: u32) -> Result<(), GatewayError>;

    /// Stop `service`.
    async fn stop(&self, service: &str) -> Result<(), GatewayError>;

    /// Start `service`.
    async fn start(&self, service: &str) -> Result<(), GatewayError>;
}

/// Run a gateway call under a deadline; an elapsed deadline becomes [`GatewayError::Timeout`].
pub async fn with_timeout<T, F>(
    operation: GatewayOperation,
    timeout: Duration,
    call: F,
) -> Result<T, GatewayError>
where
    F: Future<Output = Result<T, GatewayError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Timeout { operation, timeout }),
    }
}
