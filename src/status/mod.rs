//! Per-request status tracking
//!
//! This module provides:
//! - The `RequestStatus` lifecycle record polled by clients
//! - Atomic whole-record updates with monotonic state transitions
//! - TTL expiry (1 h from last update) with expired reads as "not found"
//! - Transparent degradation to an in-process map

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::engine::ClassificationResult;
use crate::store::{KvStore, MemoryStore, StoreError};

/// Default status TTL: one hour from the last update.
pub const DEFAULT_STATUS_TTL_SECS: u64 = 3_600;

/// Status errors
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("Unknown request id: {0}")]
    NotFound(String),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: RequestState, to: RequestState },

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Result type for status operations
pub type StatusResult<T> = Result<T, StatusError>;

/// Lifecycle state of an escalated request. States only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RequestState {
    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Processing => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    /// True when moving to `next` goes strictly forward.
    pub fn can_transition_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

/// LLM token/cost usage attached to a completed status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// One request's lifecycle record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    pub request_id: String,
    pub state: RequestState,
    /// Non-technical progress or failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Final result, present once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ClassificationResult>,
    /// LLM usage, present once the model was called.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageSummary>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl RequestStatus {
    /// Fresh QUEUED record.
    pub fn queued(request_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            request_id: request_id.into(),
            state: RequestState::Queued,
            message: Some("Your request is queued for deeper analysis".to_string()),
            result: None,
            usage: None,
            created_at: now,
            updated_at: now,
            ttl_secs: DEFAULT_STATUS_TTL_SECS,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let age = (now - self.updated_at).num_seconds();
        age < 0 || age as u64 >= self.ttl_secs
    }
}

/// Status store over the shared key-value store.
pub struct StatusStore {
    primary: Arc<dyn KvStore>,
    local: Arc<MemoryStore>,
    key_prefix: String,
    ttl_secs: u64,
    degraded: AtomicBool,
}

impl StatusStore {
    /// Create a store with the given key prefix and TTL.
    pub fn new(primary: Arc<dyn KvStore>, key_prefix: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            primary,
            local: Arc::new(MemoryStore::new()),
            key_prefix: key_prefix.into(),
            ttl_secs,
            degraded: AtomicBool::new(false),
        }
    }

    /// True when operating on the in-process fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Write a record, stamping `updated_at` and the configured TTL.
    pub async fn set(&self, mut status: RequestStatus) -> StatusResult<()> {
        status.updated_at = Utc::now();
        status.ttl_secs = self.ttl_secs;
        let raw = serde_json::to_string(&status)?;
        self.write(&self.key(&status.request_id), &raw).await;
        Ok(())
    }

    /// Read a record. Expired records read as absent.
    pub async fn get(&self, request_id: &str) -> StatusResult<Option<RequestStatus>> {
        let key = self.key(request_id);
        let Some(raw) = self.read(&key).await else {
            return Ok(None);
        };
        let status: RequestStatus = serde_json::from_str(&raw)?;
        if status.is_expired(Utc::now()) {
            self.remove(&key).await;
            return Ok(None);
        }
        Ok(Some(status))
    }

    /// Advance a record to `state`, attaching the optional fields. The whole
    /// record is rewritten so readers never see a partial update; backwards
    /// transitions are rejected.
    pub async fn update(
        &self,
        request_id: &str,
        state: RequestState,
        message: Option<String>,
        result: Option<ClassificationResult>,
        usage: Option<UsageSummary>,
    ) -> StatusResult<RequestStatus> {
        let mut status = self
            .get(request_id)
            .await?
            .ok_or_else(|| StatusError::NotFound(request_id.to_string()))?;

        if !status.state.can_transition_to(state) {
            return Err(StatusError::InvalidTransition {
                from: status.state,
                to: state,
            });
        }

        status.state = state;
        if message.is_some() {
            status.message = message;
        }
        if result.is_some() {
            status.result = result;
        }
        if usage.is_some() {
            status.usage = usage;
        }
        self.set(status.clone()).await?;
        Ok(status)
    }

    fn key(&self, request_id: &str) -> String {
        format!("{}:status:{request_id}", self.key_prefix)
    }

    async fn write(&self, key: &str, raw: &str) {
        if !self.is_degraded() {
            match self.primary.set_ex(key, raw, self.ttl_secs).await {
                Ok(()) => return,
                Err(e) => self.mark_degraded(&e),
            }
        }
        let _ = self.local.set_ex(key, raw, self.ttl_secs).await;
    }

    async fn read(&self, key: &str) -> Option<String> {
        if !self.is_degraded() {
            match self.primary.get(key).await {
                Ok(value) => return value,
                Err(e) => self.mark_degraded(&e),
            }
        }
        self.local.get(key).await.ok().flatten()
    }

    async fn remove(&self, key: &str) {
        if !self.is_degraded() {
            let _ = self.primary.delete(key).await;
        }
        let _ = self.local.delete(key).await;
    }

    fn mark_degraded(&self, error: &StoreError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(error = %error, "status store unreachable, degrading to in-process map");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ClassificationStatus;
    use crate::matching::MatchSource;
    use crate::taxonomy::ActionCode;

    fn store() -> StatusStore {
        StatusStore::new(Arc::new(MemoryStore::new()), "test", DEFAULT_STATUS_TTL_SECS)
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = store();
        store.set(RequestStatus::queued("req-1")).await.unwrap();
        let status = store.get("req-1").await.unwrap().unwrap();
        assert_eq!(status.state, RequestState::Queued);
    }

    #[tokio::test]
    async fn test_unknown_id_reads_none() {
        assert!(store().get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_monotonic_transitions() {
        let store = store();
        store.set(RequestStatus::queued("req-1")).await.unwrap();

        store
            .update("req-1", RequestState::Processing, None, None, None)
            .await
            .unwrap();
        let back = store
            .update("req-1", RequestState::Queued, None, None, None)
            .await;
        assert!(matches!(back, Err(StatusError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_completed_carries_result_and_usage() {
        let store = store();
        store.set(RequestStatus::queued("req-1")).await.unwrap();

        let result = ClassificationResult::new(
            ActionCode::from("SEARCH_PRODUCT"),
            0.9,
            ClassificationStatus::LlmClassification,
            MatchSource::Fallback,
        );
        let usage = UsageSummary {
            prompt_tokens: 120,
            completion_tokens: 30,
            cost: 0.0004,
        };
        store
            .update(
                "req-1",
                RequestState::Completed,
                Some("done".to_string()),
                Some(result),
                Some(usage),
            )
            .await
            .unwrap();

        let status = store.get("req-1").await.unwrap().unwrap();
        assert_eq!(status.state, RequestState::Completed);
        assert!(status.result.is_some());
        assert_eq!(status.usage.unwrap().prompt_tokens, 120);
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let store = store();
        store.set(RequestStatus::queued("req-1")).await.unwrap();
        store
            .update("req-1", RequestState::Failed, None, None, None)
            .await
            .unwrap();
        let again = store
            .update("req-1", RequestState::Completed, None, None, None)
            .await;
        assert!(again.is_err());
    }
}
