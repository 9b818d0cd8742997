//! ---
//! warden_section: "03-metrics-logging"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Process-level metrics of the warden daemon."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use prometheus::{Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts};

use crate::exporter::SharedRegistry;

/// Startup bookkeeping: how often the daemon started, how long the config took
/// to load, which build is running and since when.
#[derive(Clone)]
pub struct DaemonMetrics {
    registry: SharedRegistry,
    starts_total: IntCounter,
    config_load_seconds: Histogram,
    build_info: GaugeVec,
    start_time_seconds: Gauge,
}

impl DaemonMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "wardend_starts_total",
            "Times the warden daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "wardend_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(
                prometheus::exponential_buckets(0.001, 2.0, 16)
                    .context("failed to construct histogram buckets")?,
            ),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        let build_info = GaugeVec::new(
            Opts::new("wardend_build_info", "Version and profile of the running binary"),
            &["version", "profile"],
        )?;
        registry.register(Box::new(build_info.clone()))?;

        let start_time_seconds = Gauge::with_opts(Opts::new(
            "wardend_start_time_seconds",
            "Unix timestamp at which the daemon started",
        ))?;
        registry.register(Box::new(start_time_seconds.clone()))?;

        Ok(Self {
            registry,
            starts_total,
            config_load_seconds,
            build_info,
            start_time_seconds,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }

    pub fn set_build_info(&self, version: &str, profile: &str) {
        self.build_info
            .with_label_values(&[version, profile])
            .set(1.0);
    }

    pub fn set_start_time(&self, unix_seconds: f64) {
        self.start_time_seconds.set(unix_seconds);
    }
}

impl std::fmt::Debug for DaemonMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::new_registry;

    #[test]
    fn daemon_metrics_register_once() {
        let registry = new_registry();
        let metrics = DaemonMetrics::new(registry.clone()).unwrap();
        metrics.inc_start();
        metrics.set_build_info("0.1.0", "debug");
        let names: Vec<_> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"wardend_starts_total".to_owned()));
        assert!(names.contains(&"wardend_build_info".to_owned()));
        assert!(DaemonMetrics::new(registry).is_err());
    }
}
