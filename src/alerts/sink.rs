//! Alert sinks

use async_trait::async_trait;
use serde_json::json;
use tracing::{error, info, warn};

use super::dispatch::{Alert, AlertSeverity};

/// Destination for escalated alerts.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert. Delivery failures are the sink's problem; callers
    /// never block the request path on them.
    async fn send(&self, alert: &Alert);
}

/// Sink that writes alerts to the structured log. The default when no
/// webhook is configured.
#[derive(Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn send(&self, alert: &Alert) {
        match alert.severity {
            AlertSeverity::Info => {
                info!(kind = %alert.kind, message = %alert.message, "alert")
            }
            AlertSeverity::Warning => {
                warn!(kind = %alert.kind, message = %alert.message, "alert")
            }
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(kind = %alert.kind, severity = ?alert.severity, message = %alert.message, "alert")
            }
        }
    }
}

/// Sink that POSTs alerts to an operator webhook.
pub struct WebhookAlertSink {
    http: reqwest::Client,
    url: String,
}

impl WebhookAlertSink {
    /// Create a webhook sink.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &Alert) {
        let body = json!({
            "severity": alert.severity,
            "kind": alert.kind,
            "message": alert.message,
            "occurrences": alert.occurrences,
            "timestamp": alert.timestamp,
        });
        if let Err(e) = self.http.post(&self.url).json(&body).send().await {
            warn!(error = %e, "alert webhook delivery failed");
        }
    }
}
