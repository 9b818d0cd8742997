//! ---
//! warden_section: "01-core-functionality"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Shared primitives and utilities for the controller runtime."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Shared primitives for the Fleet Warden workspace: configuration loading,
//! tracing setup, and timestamp helpers consumed by the controller and daemon.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    ApiConfig, AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, NotificationConfig,
    RedundancyConfig, RuntimeConfig, ServiceConfig,
};
pub use logging::{init_tracing, LogFormat};
