//! LLM usage tracking
//!
//! Every model call appends a record to a JSONL log (when a path is
//! configured) and rolls into in-memory daily and monthly aggregates used by
//! the spike detector and the metrics endpoint.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One model call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
    pub latency_ms: u64,
}

/// Aggregate over one day or month.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageSummaryWindow {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

impl UsageSummaryWindow {
    fn add(&mut self, record: &UsageRecord) {
        self.calls += 1;
        self.prompt_tokens += record.prompt_tokens;
        self.completion_tokens += record.completion_tokens;
        self.cost += record.cost;
    }
}

#[derive(Default)]
struct Aggregates {
    daily: BTreeMap<NaiveDate, UsageSummaryWindow>,
    monthly: BTreeMap<String, UsageSummaryWindow>,
}

/// Append-only usage tracker.
pub struct UsageTracker {
    log_path: Option<PathBuf>,
    aggregates: Mutex<Aggregates>,
}

impl UsageTracker {
    /// Create a tracker. With `log_path` set, records are appended as JSON
    /// lines; without it, only in-memory aggregates are kept.
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self {
            log_path,
            aggregates: Mutex::new(Aggregates::default()),
        }
    }

    /// Record one call.
    pub fn record(&self, record: UsageRecord) {
        {
            let mut aggregates = self.aggregates.lock();
            let day = record.timestamp.date_naive();
            aggregates.daily.entry(day).or_default().add(&record);
            let month = record.timestamp.format("%Y-%m").to_string();
            aggregates.monthly.entry(month).or_default().add(&record);
        }

        if let Some(path) = &self.log_path {
            if let Err(e) = append_line(path, &record) {
                warn!(error = %e, "usage log append failed");
            }
        }
    }

    /// Aggregate for one day.
    pub fn daily(&self, day: NaiveDate) -> UsageSummaryWindow {
        self.aggregates
            .lock()
            .daily
            .get(&day)
            .copied()
            .unwrap_or_default()
    }

    /// Aggregate for today.
    pub fn today(&self) -> UsageSummaryWindow {
        self.daily(Utc::now().date_naive())
    }

    /// Daily cost history strictly before `day`, oldest first.
    pub fn history_before(&self, day: NaiveDate) -> Vec<(NaiveDate, f64)> {
        self.aggregates
            .lock()
            .daily
            .iter()
            .filter(|(d, _)| **d < day)
            .map(|(d, w)| (*d, w.cost))
            .collect()
    }

    /// Aggregate for the current month.
    pub fn this_month(&self) -> UsageSummaryWindow {
        let month = Utc::now().format("%Y-%m").to_string();
        self.aggregates
            .lock()
            .monthly
            .get(&month)
            .copied()
            .unwrap_or_default()
    }

    /// Total cost across all recorded days.
    pub fn total_cost(&self) -> f64 {
        self.aggregates
            .lock()
            .daily
            .values()
            .map(|w| w.cost)
            .sum()
    }
}

fn append_line(path: &PathBuf, record: &UsageRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let line = serde_json::to_string(record).map_err(std::io::Error::other)?;
    writeln!(file, "{line}")
}
