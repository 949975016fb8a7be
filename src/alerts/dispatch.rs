//! Alert dispatch with frequency suppression
//!
//! Errors and criticals always escalate. Infos and warnings are suppressed
//! until their error kind has recurred often enough within a sliding
//! one-hour window to warrant operator attention.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::sink::AlertSink;

/// Suppression window for low-severity alerts.
const SUPPRESSION_WINDOW: Duration = Duration::from_secs(3_600);

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One escalated alert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub severity: AlertSeverity,
    /// Error kind or subsystem tag (e.g. "llm_timeout", "cost_spike").
    pub kind: String,
    pub message: String,
    /// Occurrences of this kind within the current window.
    pub occurrences: usize,
    pub timestamp: DateTime<Utc>,
}

/// Dispatcher applying per-kind frequency thresholds before a sink.
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
    thresholds: HashMap<String, usize>,
    default_threshold: usize,
    occurrences: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl AlertDispatcher {
    /// Create a dispatcher with the standard per-kind thresholds.
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        let thresholds = HashMap::from([
            ("llm_rate_limit".to_string(), 10),
            ("llm_timeout".to_string(), 20),
            ("llm_server_error".to_string(), 5),
            ("llm_auth_error".to_string(), 1),
            ("llm_context_length_exceeded".to_string(), 5),
        ]);
        Self {
            sink,
            thresholds,
            default_threshold: 15,
            occurrences: Mutex::new(HashMap::new()),
        }
    }

    /// Report an event. Errors and criticals escalate immediately; lower
    /// severities escalate once their kind's hourly threshold is reached.
    /// Returns true when the sink was invoked.
    pub async fn report(
        &self,
        severity: AlertSeverity,
        kind: &str,
        message: impl Into<String>,
    ) -> bool {
        let count = self.bump(kind);

        let escalate = match severity {
            AlertSeverity::Error | AlertSeverity::Critical => true,
            AlertSeverity::Info | AlertSeverity::Warning => {
                let threshold = self
                    .thresholds
                    .get(kind)
                    .copied()
                    .unwrap_or(self.default_threshold);
                count >= threshold
            }
        };

        if escalate {
            let alert = Alert {
                severity,
                kind: kind.to_string(),
                message: message.into(),
                occurrences: count,
                timestamp: Utc::now(),
            };
            self.sink.send(&alert).await;
        }
        escalate
    }

    /// Occurrences of `kind` within the current window.
    pub fn occurrences(&self, kind: &str) -> usize {
        let now = Instant::now();
        let occurrences = self.occurrences.lock();
        occurrences
            .get(kind)
            .map(|window| {
                window
                    .iter()
                    .filter(|t| now.duration_since(**t) < SUPPRESSION_WINDOW)
                    .count()
            })
            .unwrap_or(0)
    }

    fn bump(&self, kind: &str) -> usize {
        let now = Instant::now();
        let mut occurrences = self.occurrences.lock();
        let window = occurrences.entry(kind.to_string()).or_default();
        while let Some(oldest) = window.front() {
            if now.duration_since(*oldest) >= SUPPRESSION_WINDOW {
                window.pop_front();
            } else {
                break;
            }
        }
        window.push_back(now);
        window.len()
    }
}
