//! ---
//! warden_section: "03-metrics-logging"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Metrics collection and export utilities."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
//! Prometheus instrumentation for Fleet Warden.
//!
//! Every metric family registers against one [`SharedRegistry`] created by the
//! daemon; [`spawn_http_server`] exposes it for scraping.

pub mod controller;
pub mod daemon;
pub mod exporter;

pub use controller::{FailoverOutcome, RedundancyMetrics};
pub use daemon::DaemonMetrics;
pub use exporter::{metrics_router, new_registry, spawn_http_server, MetricsServer, SharedRegistry};

pub use prometheus;
