//! ---
//! warden_section: "03-metrics-logging"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Prometheus instruments for the redundancy controller."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use prometheus::{Gauge, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts};

use crate::exporter::SharedRegistry;

/// Summary of a finished failover attempt, as far as metrics care.
#[derive(Debug, Clone, Copy)]
pub struct FailoverOutcome<'a> {
    pub service: &'a str,
    pub strategy: &'a str,
    pub success: bool,
    /// Start to completion; `None` when the attempt never completed.
    pub elapsed: Option<Duration>,
}

/// Metrics published by the redundancy controller.
#[derive(Clone)]
pub struct RedundancyMetrics {
    registry: SharedRegistry,
    failovers_total: IntCounterVec,
    failover_duration_seconds: HistogramVec,
    consecutive_failures: IntGaugeVec,
    availability_ratio: Gauge,
    cascades_total: IntCounter,
    poll_errors_total: IntCounterVec,
    ticks_skipped_total: IntCounter,
    notification_failures_total: IntCounter,
}

impl RedundancyMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let failovers_total = IntCounterVec::new(
            Opts::new(
                "warden_failovers_total",
                "Completed failover attempts by service, strategy and outcome",
            ),
            &["service", "strategy", "outcome"],
        )?;
        registry.register(Box::new(failovers_total.clone()))?;

        let failover_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "warden_failover_duration_seconds",
                "Wall time between starting and completing a failover attempt",
            )
            .buckets(prometheus::exponential_buckets(0.05, 2.0, 14)?),
            &["strategy"],
        )?;
        registry.register(Box::new(failover_duration_seconds.clone()))?;

        let consecutive_failures = IntGaugeVec::new(
            Opts::new(
                "warden_consecutive_failures",
                "Current consecutive unhealthy observations per service",
            ),
            &["service"],
        )?;
        registry.register(Box::new(consecutive_failures.clone()))?;

        let availability_ratio = Gauge::new(
            "warden_availability_ratio",
            "Healthy services divided by polled services in the latest poll",
        )?;
        registry.register(Box::new(availability_ratio.clone()))?;

        let cascades_total = IntCounter::new(
            "warden_cascades_total",
            "Emergency response plans issued for cascading failures",
        )?;
        registry.register(Box::new(cascades_total.clone()))?;

        let poll_errors_total = IntCounterVec::new(
            Opts::new(
                "warden_poll_errors_total",
                "Inspect calls that failed during health polling",
            ),
            &["service", "kind"],
        )?;
        registry.register(Box::new(poll_errors_total.clone()))?;

        let ticks_skipped_total = IntCounter::new(
            "warden_ticks_skipped_total",
            "Monitoring ticks skipped because the service catalog was unavailable",
        )?;
        registry.register(Box::new(ticks_skipped_total.clone()))?;

        let notification_failures_total = IntCounter::new(
            "warden_notification_failures_total",
            "Emergency plans the notification sink failed to deliver",
        )?;
        registry.register(Box::new(notification_failures_total.clone()))?;

        Ok(Self {
            registry,
            failovers_total,
            failover_duration_seconds,
            consecutive_failures,
            availability_ratio,
            cascades_total,
            poll_errors_total,
            ticks_skipped_total,
            notification_failures_total,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Count a finished failover and observe its duration.
    pub fn observe_failover(&self, outcome: FailoverOutcome<'_>) {
        let label = if outcome.success { "success" } else { "failure" };
        self.failovers_total
            .with_label_values(&[outcome.service, outcome.strategy, label])
            .inc();
        if let Some(elapsed) = outcome.elapsed {
            self.failover_duration_seconds
                .with_label_values(&[outcome.strategy])
                .observe(elapsed.as_secs_f64());
        }
    }

    pub fn set_consecutive_failures(&self, service: &str, count: u32) {
        self.consecutive_failures
            .with_label_values(&[service])
            .set(i64::from(count));
    }

    pub fn set_availability(&self, ratio: f64) {
        self.availability_ratio.set(ratio);
    }

    pub fn inc_cascade(&self) {
        self.cascades_total.inc();
    }

    pub fn inc_poll_error(&self, service: &str, kind: &str) {
        self.poll_errors_total
            .with_label_values(&[service, kind])
            .inc();
    }

    pub fn inc_tick_skipped(&self) {
        self.ticks_skipped_total.inc();
    }

    pub fn inc_notification_failure(&self) {
        self.notification_failures_total.inc();
    }
}

impl std::fmt::Debug for RedundancyMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundancyMetrics").finish_non_exhaustive()
    }
}
