//! Cost spike detection
//!
//! Compares today's spend to the trailing daily average and raises an alert
//! through the dispatcher when today exceeds `factor` times the average. A
//! cron-scheduled sweep runs the check every six hours.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDispatcher, AlertSeverity};

use super::usage::UsageTracker;

/// Default sweep schedule: every six hours on the hour.
pub const SWEEP_SCHEDULE: &str = "0 0 */6 * * *";

/// Minimum days of history before spikes are judged.
const MIN_HISTORY_DAYS: usize = 2;

/// Spike detection outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpikeReport {
    pub spike_detected: bool,
    pub today_cost: f64,
    pub trailing_average: f64,
    pub factor: f64,
    pub history_days: usize,
}

/// Detector comparing today's cost to the trailing history.
pub struct SpikeDetector {
    tracker: Arc<UsageTracker>,
    factor: f64,
}

impl SpikeDetector {
    /// Create a detector; `factor` defaults to 2.0.
    pub fn new(tracker: Arc<UsageTracker>, factor: f64) -> Self {
        Self { tracker, factor }
    }

    /// Run one spike check.
    pub fn check(&self) -> SpikeReport {
        let today = Utc::now().date_naive();
        let history = self.tracker.history_before(today);
        let today_cost = self.tracker.daily(today).cost;

        let history_days = history.len();
        let trailing_average = if history_days > 0 {
            history.iter().map(|(_, cost)| cost).sum::<f64>() / history_days as f64
        } else {
            0.0
        };

        let spike_detected = history_days >= MIN_HISTORY_DAYS
            && trailing_average > 0.0
            && today_cost > self.factor * trailing_average;

        SpikeReport {
            spike_detected,
            today_cost,
            trailing_average,
            factor: self.factor,
            history_days,
        }
    }
}

/// Scheduled sweep that alerts on detected spikes.
pub struct SpikeSweep {
    detector: SpikeDetector,
    alerts: Arc<AlertDispatcher>,
    schedule: Schedule,
}

impl SpikeSweep {
    /// Create a sweep on the default six-hour schedule.
    pub fn new(detector: SpikeDetector, alerts: Arc<AlertDispatcher>) -> Self {
        let schedule = Schedule::from_str(SWEEP_SCHEDULE).expect("sweep schedule is valid");
        Self {
            detector,
            alerts,
            schedule,
        }
    }

    /// Run until the shutdown signal flips. Spawn with `tokio::spawn`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(schedule = SWEEP_SCHEDULE, "cost spike sweep started");
        loop {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                warn!("spike sweep schedule produced no next occurrence, stopping");
                return;
            };
            let wait = (next - Utc::now())
                .to_std()
                .unwrap_or_else(|_| std::time::Duration::from_secs(1));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("cost spike sweep stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One sweep iteration.
    pub async fn sweep_once(&self) {
        let report = self.detector.check();
        if report.spike_detected {
            self.alerts
                .report(
                    AlertSeverity::Warning,
                    "cost_spike",
                    format!(
                        "daily LLM cost ${:.4} exceeds {}x trailing average ${:.4}",
                        report.today_cost, report.factor, report.trailing_average
                    ),
                )
                .await;
        } else {
            debug!(
                today = report.today_cost,
                average = report.trailing_average,
                "cost sweep clean"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::usage::UsageRecord;
    use chrono::Duration;

    fn record(days_ago: i64, cost: f64) -> UsageRecord {
        UsageRecord {
            timestamp: Utc::now() - Duration::days(days_ago),
            model: "test-model".to_string(),
            prompt_tokens: 10,
            completion_tokens: 5,
            cost,
            latency_ms: 100,
        }
    }

    #[test]
    fn test_no_spike_without_history() {
        let tracker = Arc::new(UsageTracker::new(None));
        tracker.record(record(0, 100.0));
        let report = SpikeDetector::new(tracker, 2.0).check();
        assert!(!report.spike_detected);
        assert_eq!(report.history_days, 0);
    }

    #[test]
    fn test_spike_detected_above_factor() {
        let tracker = Arc::new(UsageTracker::new(None));
        tracker.record(record(2, 0.10));
        tracker.record(record(1, 0.10));
        tracker.record(record(0, 0.50));
        let report = SpikeDetector::new(tracker, 2.0).check();
        assert!(report.spike_detected);
        assert!((report.trailing_average - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_no_spike_below_factor() {
        let tracker = Arc::new(UsageTracker::new(None));
        tracker.record(record(2, 0.10));
        tracker.record(record(1, 0.10));
        tracker.record(record(0, 0.15));
        let report = SpikeDetector::new(tracker, 2.0).check();
        assert!(!report.spike_detected);
    }
}
