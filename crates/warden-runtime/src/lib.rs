//! ---
//! warden_section: "02-runtime-interfaces"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Runtime gateway abstraction and adapters."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Interfaces the redundancy controller consumes from the container runtime.
//!
//! The controller never talks to a runtime directly: it goes through
//! [`RuntimeGateway`] for per-instance operations and [`ServiceCatalog`] for the
//! list of instances to watch. [`DockerCliGateway`] is the production adapter;
//! the `mock` feature exposes an in-memory double for tests.
#![warn(missing_docs)]

pub mod catalog;
pub mod docker;
pub mod error;
pub mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod status;

pub use catalog::{CatalogError, ServiceCatalog, StaticCatalog};
pub use docker::DockerCliGateway;
pub use error::{GatewayError, GatewayErrorKind, GatewayOperation};
pub use gateway::{with_timeout, RuntimeGateway};
#[cfg(any(test, feature = "mock"))]
pub use mock::{GatewayCall, MockRuntimeGateway};
pub use status::{HealthState, LifecycleState, ReplicaCount, ResourceUsage, ServiceStatus};
