//! ---
//! warden_section: "04-redundancy-self-healing"
//! warden_subsection: "module"
//! warden_type: "source"
//! warden_scope: "code"
//! warden_description: "Emergency plan notification sinks."
//! warden_version: "v0.0.0-prealpha"
//! warden_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{error, info};

use crate::cascade::EmergencyResponsePlan;

/// Receiver of emergency plans. Delivery errors are logged by the caller and dropped.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, plan: &EmergencyResponsePlan) -> Result<()>;
}

/// Emits the plan as structured log records.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, plan: &EmergencyResponsePlan) -> Result<()> {
        error!(
            severity = ?plan.severity,
            affected_services = plan.affected_services,
            total_estimated_secs = plan.total_estimated_duration.as_secs(),
            "emergency response plan issued"
        );
        for (step, action) in plan.actions.iter().enumerate() {
            info!(
                step = step + 1,
                kind = ?action.kind,
                priority = ?action.priority,
                estimated_secs = action.estimated_duration.as_secs(),
                services = ?action.services,
                "{}",
                action.description
            );
        }
        Ok(())
    }
}

/// POSTs the plan as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotificationSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotificationSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl NotificationSink for WebhookNotificationSink {
    async fn notify(&self, plan: &EmergencyResponsePlan) -> Result<()> {
        self.client
            .post(&self.url)
            .json(plan)
            .send()
            .await
            .with_context(|| format!("failed to deliver emergency plan to {}", self.url))?
            .error_for_status()
            .context("webhook rejected emergency plan")?;
        info!(url = %self.url, "emergency plan delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::CascadingFailureDetector;
    use crate::failure::{FailureEvent, TriggerType};

    fn plan() -> EmergencyResponsePlan {
        let events: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|service| FailureEvent::new(service, TriggerType::InstanceExit))
            .collect();
        let detector = CascadingFailureDetector::new();
        detector.build_emergency_plan(&detector.detect(&events))
    }

    #[tokio::test]
    async fn tracing_sink_accepts_plans() {
        TracingNotificationSink.notify(&plan()).await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_webhook_reports_error() {
        let sink =
            WebhookNotificationSink::new("http://127.0.0.1:9/hook", Duration::from_millis(500))
                .unwrap();
        assert_eq!(sink.url(), "http://127.0.0.1:9/hook");
        assert!(sink.notify(&plan()).await.is_err());
    }
}
