//! Append-only ambiguity record
//!
//! Every AMBIGUOUS or UNCLEAR outcome is appended as one JSON line for
//! offline analysis of where the gate falls short. Queries are truncated so
//! the record never holds unbounded user text.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::matching::Candidate;

/// Maximum stored query length.
const QUERY_TRUNCATION: usize = 200;

/// One recorded outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmbiguityRecord {
    pub timestamp: DateTime<Utc>,
    /// Gate outcome tag ("AMBIGUOUS" or "UNCLEAR").
    pub outcome: String,
    /// Truncated query text.
    pub query: String,
    /// Top candidates with scores, strongest first.
    pub candidates: Vec<(String, f64)>,
}

/// Append-only JSONL writer; logs through tracing when no path is set.
pub struct AmbiguityLog {
    file: Mutex<Option<File>>,
}

impl AmbiguityLog {
    /// Log to `path`, creating parent directories as needed.
    pub fn new(path: Option<PathBuf>) -> Self {
        let file = path.and_then(|path| {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            match OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ambiguity log unavailable");
                    None
                }
            }
        });
        Self {
            file: Mutex::new(file),
        }
    }

    /// Append one outcome.
    pub fn record(&self, outcome: &str, query: &str, candidates: &[Candidate]) {
        let record = AmbiguityRecord {
            timestamp: Utc::now(),
            outcome: outcome.to_string(),
            query: query.chars().take(QUERY_TRUNCATION).collect(),
            candidates: candidates
                .iter()
                .take(3)
                .map(|c| (c.code.to_string(), c.score))
                .collect(),
        };

        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => {
                if let Ok(line) = serde_json::to_string(&record) {
                    if let Err(e) = writeln!(file, "{line}") {
                        warn!(error = %e, "ambiguity record append failed");
                    }
                }
            }
            None => {
                info!(
                    outcome = %record.outcome,
                    query = %record.query,
                    "ambiguous classification outcome"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchSource;
    use crate::taxonomy::ActionCode;

    #[test]
    fn test_records_append_as_jsonl() {
        let dir = std::env::temp_dir().join(format!("shopintent-amblog-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("ambiguity.jsonl");

        let log = AmbiguityLog::new(Some(path.clone()));
        let candidates = vec![Candidate::new(
            ActionCode::from("VIEW_CART"),
            0.61,
            MatchSource::Blended,
        )];
        log.record("AMBIGUOUS", "show cart or track order", &candidates);
        log.record("UNCLEAR", "hmm", &[]);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: AmbiguityRecord = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first.outcome, "AMBIGUOUS");
        assert_eq!(first.candidates[0].0, "VIEW_CART");
    }

    #[test]
    fn test_query_truncated() {
        let log = AmbiguityLog::new(None);
        // no panic on long input; truncation happens inside record()
        log.record("UNCLEAR", &"x".repeat(1_000), &[]);
    }
}
