//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operations exposed by a [`crate::RuntimeGateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayOperation {
    /// Read the current status of an instance.
    Inspect,
    /// Restart an instance in place.
    Restart,
    /// Change the replica count of a service.
    Scale,
    /// Stop an instance.
    Stop,
    /// Start an instance.
    Start,
}

impl GatewayOperation {
    /// Static label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayOperation::Inspect => "inspect",
            GatewayOperation::Restart => "restart",
            GatewayOperation::Scale => "scale",
            GatewayOperation::Stop => "stop",
            GatewayOperation::Start => "start",
        }
    }
}

impl fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure returned by runtime gateway calls.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The runtime does not know the named service or instance.
    #[error("service {service} not found")]
    NotFound {
        /// Name that was looked up.
        service: String,
    },
    /// The call failed for a reason expected to clear up on retry.
    #[error("transient runtime failure: {0}")]
    Transient(String),
    /// The call did not complete within the caller-supplied deadline.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that exceeded its deadline.
        operation: GatewayOperation,
        /// Deadline that was applied.
        timeout: Duration,
    },
    /// The instance is running but cannot be reached over its network.
    #[error("service {service} is partitioned: {detail}")]
    Partitioned {
        /// Affected service.
        service: String,
        /// Runtime-provided description.
        detail: String,
    },
}

impl GatewayError {
    /// Convenience constructor for [`GatewayError::NotFound`].
    pub fn not_found(service: impl Into<String>) -> Self {
        GatewayError::NotFound {
            service: service.into(),
        }
    }

    /// Convenience constructor for [`GatewayError::Transient`].
    pub fn transient(detail: impl Into<String>) -> Self {
        GatewayError::Transient(detail.into())
    }

    /// Classification of the error without its payload.
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::NotFound { .. } => GatewayErrorKind::NotFound,
            GatewayError::Transient(_) => GatewayErrorKind::Transient,
            GatewayError::Timeout { .. } => GatewayErrorKind::Timeout,
            GatewayError::Partitioned { .. } => GatewayErrorKind::Partitioned,
        }
    }
}

/// Payload-free classification of a [`GatewayError`], kept on degraded statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayErrorKind {
    /// See [`GatewayError::NotFound`].
    NotFound,
    /// See [`GatewayError::Transient`].
    Transient,
    /// See [`GatewayError::Timeout`].
    Timeout,
    /// See [`GatewayError::Partitioned`].
    Partitioned,
}

impl GatewayErrorKind {
    /// Static label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayErrorKind::NotFound => "not-found",
            GatewayErrorKind::Transient => "transient",
            GatewayErrorKind::Timeout => "timeout",
            GatewayErrorKind::Partitioned => "partitioned",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_render_operation_and_kind() {
        let err = GatewayError::Timeout {
            operation: GatewayOperation::Restart,
            timeout: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "restart timed out after 60s");
        assert_eq!(err.kind(), GatewayErrorKind::Timeout);
        assert_eq!(GatewayError::not_found("api").kind().as_str(), "not-found");
    }
}
