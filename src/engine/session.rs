//! Bounded session context window
//!
//! Keeps the last few turns per session id so LLM escalations can see the
//! immediate conversation. Nothing else is retained; this is not dialog
//! state.

use std::collections::VecDeque;

use dashmap::DashMap;

/// Turns retained per session.
const WINDOW: usize = 8;

/// In-memory per-session ring of recent queries.
#[derive(Default)]
pub struct SessionWindow {
    sessions: DashMap<String, VecDeque<String>>,
}

impl SessionWindow {
    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one turn for `session_id`.
    pub fn record(&self, session_id: &str, query: &str) {
        let mut window = self.sessions.entry(session_id.to_string()).or_default();
        if window.len() >= WINDOW {
            window.pop_front();
        }
        window.push_back(query.to_string());
    }

    /// Snapshot of the recent turns, oldest first.
    pub fn snapshot(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .get(session_id)
            .map(|window| window.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop one session.
    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }
}
