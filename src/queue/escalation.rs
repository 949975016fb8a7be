//! Priority escalation queue
//!
//! Ready messages are ordered by (priority, created_at, sequence) in a
//! BTreeMap so the head is always the highest-priority oldest message and a
//! dequeue is an atomic lease: exactly one worker holds a message until it
//! acknowledges, nacks, or its visibility window lapses. Message bodies are
//! persisted through the key-value store; the dead-letter queue is a store
//! list.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::matching::Candidate;
use crate::store::{KvStore, StoreError};

/// Queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Message not leased: {0}")]
    NotLeased(String),
}

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Message priority; lower numbers drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueuePriority {
    High,
    Normal,
    Low,
}

impl QueuePriority {
    /// Numeric rank used for ordering: HIGH=1, NORMAL=5, LOW=10.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 1,
            Self::Normal => 5,
            Self::Low => 10,
        }
    }
}

/// Payload carried by an escalation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuePayload {
    /// The original user query.
    pub query: String,
    /// Best rule-based candidate, offered to the LLM as a hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_based_hint: Option<Candidate>,
    /// Recent session turns captured at enqueue time.
    #[serde(default)]
    pub context_snapshot: Vec<String>,
}

/// One queued escalation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub request_id: String,
    pub created_at: DateTime<Utc>,
    pub priority: QueuePriority,
    pub payload: QueuePayload,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Store key prefix; message bodies live under
    /// `<prefix>:queue:ambiguous:` and the dead-letter list at
    /// `<prefix>:queue:dead`.
    pub key_prefix: String,
    /// Failures allowed before a message moves to the dead-letter queue.
    pub max_retries: u32,
    /// Base retry delay; attempt n waits `retry_delay * 2^(n-1)`.
    pub retry_delay: Duration,
    /// Message body TTL in the store.
    pub message_ttl_secs: u64,
    /// Lease visibility window before an unacknowledged message re-queues.
    pub visibility_timeout: Duration,
    /// Dead-letter queue retention cap.
    pub dead_letter_cap: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key_prefix: "shopintent".to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            message_ttl_secs: 86_400,
            visibility_timeout: Duration::from_secs(60),
            dead_letter_cap: 1_000,
        }
    }
}

/// Outcome of a nack.
#[derive(Debug, Clone, PartialEq)]
pub enum NackOutcome {
    /// Message re-queued after the given delay.
    Retrying { delay: Duration, attempt: u32 },
    /// Retry budget exhausted; message moved to the dead-letter queue.
    Dead,
}

/// Queue depth snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    pub ready: usize,
    pub delayed: usize,
    pub leased: usize,
    pub dead: usize,
}

/// Strict ordering key: priority rank, then arrival time, then an
/// enqueue sequence to break equal timestamps deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    rank: u8,
    created_at_nanos: i64,
    seq: u64,
}

struct Leased {
    deadline: DateTime<Utc>,
    key: OrderKey,
    message: QueueMessage,
}

#[derive(Default)]
struct QueueInner {
    ready: BTreeMap<OrderKey, QueueMessage>,
    delayed: Vec<(DateTime<Utc>, OrderKey, QueueMessage)>,
    leased: HashMap<String, Leased>,
}

/// Priority queue of escalation messages.
pub struct EscalationQueue {
    config: QueueConfig,
    store: Arc<dyn KvStore>,
    inner: parking_lot::Mutex<QueueInner>,
    notify: Notify,
    seq: AtomicU64,
}

impl EscalationQueue {
    /// Create a queue over the given store.
    pub fn new(config: QueueConfig, store: Arc<dyn KvStore>) -> Self {
        Self {
            config,
            store,
            inner: parking_lot::Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue a payload, assigning a fresh request id. The message body is
    /// persisted before it becomes visible to workers.
    pub async fn enqueue(
        &self,
        payload: QueuePayload,
        priority: QueuePriority,
    ) -> QueueResult<String> {
        let message = QueueMessage {
            request_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            priority,
            payload,
            attempt_count: 0,
            last_error: None,
        };
        let request_id = message.request_id.clone();
        self.persist(&message).await?;
        self.insert_ready(message);
        Ok(request_id)
    }

    /// Lease the highest-priority oldest ready message, waiting up to
    /// `timeout` for one to arrive. Returns `None` on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> Option<QueueMessage> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_lease() {
                return Some(message);
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            // Wake early on enqueue; cap the wait so delayed promotions and
            // lease expiries are observed without a dedicated timer task.
            let _ = tokio::time::timeout(
                remaining.min(Duration::from_millis(200)),
                self.notify.notified(),
            )
            .await;
        }
    }

    /// Acknowledge a leased message, removing it permanently.
    pub async fn acknowledge(&self, message: &QueueMessage) -> QueueResult<()> {
        let removed = self.inner.lock().leased.remove(&message.request_id);
        if removed.is_none() {
            return Err(QueueError::NotLeased(message.request_id.clone()));
        }
        self.store.delete(&self.message_key(&message.request_id)).await?;
        Ok(())
    }

    /// Report a failed attempt. Re-queues with exponential backoff until the
    /// retry budget is spent, then moves the message to the dead-letter
    /// queue.
    pub async fn nack(&self, message: &QueueMessage, error: &str) -> QueueResult<NackOutcome> {
        let leased = self.inner.lock().leased.remove(&message.request_id);
        let Some(leased) = leased else {
            return Err(QueueError::NotLeased(message.request_id.clone()));
        };

        let mut updated = leased.message;
        updated.attempt_count += 1;
        updated.last_error = Some(error.to_string());

        if updated.attempt_count > self.config.max_retries {
            warn!(
                request_id = %updated.request_id,
                attempts = updated.attempt_count,
                "retry budget exhausted, dead-lettering"
            );
            self.push_dead(&updated).await?;
            self.store.delete(&self.message_key(&updated.request_id)).await?;
            return Ok(NackOutcome::Dead);
        }

        let attempt = updated.attempt_count;
        let delay = self.config.retry_delay * 2u32.saturating_pow(attempt - 1);
        debug!(request_id = %updated.request_id, attempt, ?delay, "re-queueing after failure");

        self.persist(&updated).await?;
        let due = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        {
            let mut inner = self.inner.lock();
            let key = leased.key;
            inner.delayed.push((due, key, updated));
        }
        Ok(NackOutcome::Retrying { delay, attempt })
    }

    /// Read the dead-letter queue, newest first.
    pub async fn dead_letter(&self) -> QueueResult<Vec<QueueMessage>> {
        let raw = self
            .store
            .list_range(&self.dead_key(), 0, -1)
            .await?;
        let mut messages = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str(&item) {
                Ok(message) => messages.push(message),
                Err(e) => warn!(error = %e, "undecodable dead-letter entry skipped"),
            }
        }
        Ok(messages)
    }

    /// Queue depth snapshot.
    pub async fn stats(&self) -> QueueStats {
        let (ready, delayed, leased) = {
            let inner = self.inner.lock();
            (inner.ready.len(), inner.delayed.len(), inner.leased.len())
        };
        let dead = self.store.list_len(&self.dead_key()).await.unwrap_or(0);
        QueueStats {
            ready,
            delayed,
            leased,
            dead,
        }
    }

    fn insert_ready(&self, message: QueueMessage) {
        let key = OrderKey {
            rank: message.priority.rank(),
            created_at_nanos: message.created_at.timestamp_nanos_opt().unwrap_or_default(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        self.inner.lock().ready.insert(key, message);
        self.notify.notify_one();
    }

    /// Promote due delayed messages and expired leases, then atomically
    /// lease the head of the ready ordering.
    fn try_lease(&self) -> Option<QueueMessage> {
        let now = Utc::now();
        let mut inner = self.inner.lock();

        let mut index = 0;
        while index < inner.delayed.len() {
            if inner.delayed[index].0 <= now {
                let (_, key, message) = inner.delayed.swap_remove(index);
                inner.ready.insert(key, message);
            } else {
                index += 1;
            }
        }

        let expired: Vec<String> = inner
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(lease) = inner.leased.remove(&id) {
                warn!(request_id = %id, "lease expired, re-queueing message");
                inner.ready.insert(lease.key, lease.message);
            }
        }

        let (key, message) = inner.ready.pop_first()?;
        let deadline = now
            + chrono::Duration::from_std(self.config.visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::zero());
        inner.leased.insert(
            message.request_id.clone(),
            Leased {
                deadline,
                key,
                message: message.clone(),
            },
        );
        Some(message)
    }

    async fn persist(&self, message: &QueueMessage) -> QueueResult<()> {
        let raw = serde_json::to_string(message)?;
        self.store
            .set_ex(
                &self.message_key(&message.request_id),
                &raw,
                self.config.message_ttl_secs,
            )
            .await?;
        Ok(())
    }

    async fn push_dead(&self, message: &QueueMessage) -> QueueResult<()> {
        let raw = serde_json::to_string(message)?;
        let key = self.dead_key();
        self.store.list_push(&key, &raw).await?;
        self.store
            .list_trim(&key, 0, self.config.dead_letter_cap as i64 - 1)
            .await?;
        Ok(())
    }

    fn message_key(&self, request_id: &str) -> String {
        format!("{}:queue:ambiguous:{request_id}", self.config.key_prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}:queue:dead", self.config.key_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn payload(query: &str) -> QueuePayload {
        QueuePayload {
            query: query.to_string(),
            rule_based_hint: None,
            context_snapshot: Vec::new(),
        }
    }

    fn queue() -> EscalationQueue {
        EscalationQueue::new(QueueConfig::default(), Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_enqueue_dequeue_roundtrip() {
        let queue = queue();
        let id = queue
            .enqueue(payload("find shoes"), QueuePriority::Normal)
            .await
            .unwrap();
        let message = queue.dequeue(Duration::from_millis(50)).await.unwrap();
        assert_eq!(message.request_id, id);
        assert_eq!(message.payload.query, "find shoes");
        queue.acknowledge(&message).await.unwrap();
        assert!(queue.dequeue(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_fifo_within_priority() {
        let queue = queue();
        let first = queue
            .enqueue(payload("first"), QueuePriority::Normal)
            .await
            .unwrap();
        let second = queue
            .enqueue(payload("second"), QueuePriority::Normal)
            .await
            .unwrap();

        let a = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        let b = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        assert_eq!(a.request_id, first);
        assert_eq!(b.request_id, second);
    }

    #[tokio::test]
    async fn test_high_drains_before_normal_before_low() {
        let queue = queue();
        queue.enqueue(payload("low"), QueuePriority::Low).await.unwrap();
        queue.enqueue(payload("normal"), QueuePriority::Normal).await.unwrap();
        queue.enqueue(payload("high"), QueuePriority::High).await.unwrap();

        let order: Vec<String> = [
            queue.dequeue(Duration::from_millis(10)).await.unwrap(),
            queue.dequeue(Duration::from_millis(10)).await.unwrap(),
            queue.dequeue(Duration::from_millis(10)).await.unwrap(),
        ]
        .into_iter()
        .map(|m| m.payload.query)
        .collect();
        assert_eq!(order, vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_dequeue_timeout_returns_none() {
        let queue = queue();
        assert!(queue.dequeue(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_nack_applies_exponential_backoff() {
        let queue = queue();
        queue.enqueue(payload("q"), QueuePriority::Normal).await.unwrap();
        let message = queue.dequeue(Duration::from_millis(10)).await.unwrap();

        let outcome = queue.nack(&message, "timeout").await.unwrap();
        match outcome {
            NackOutcome::Retrying { delay, attempt } => {
                assert_eq!(attempt, 1);
                assert_eq!(delay, Duration::from_millis(500));
            }
            NackOutcome::Dead => panic!("first failure must retry"),
        }
        // Delayed, not yet visible.
        assert!(queue.dequeue(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_retry_ceiling_dead_letters() {
        let config = QueueConfig {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let queue = EscalationQueue::new(config, Arc::new(MemoryStore::new()));
        queue.enqueue(payload("q"), QueuePriority::High).await.unwrap();

        let mut processed = 0;
        loop {
            let Some(message) = queue.dequeue(Duration::from_millis(300)).await else {
                panic!("message lost before dead-letter");
            };
            processed += 1;
            match queue.nack(&message, "boom").await.unwrap() {
                NackOutcome::Retrying { .. } => continue,
                NackOutcome::Dead => break,
            }
        }
        // max_retries + 1 processing attempts
        assert_eq!(processed, 3);

        let dead = queue.dead_letter().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].last_error.as_deref(), Some("boom"));
        assert_eq!(dead[0].attempt_count, 3);
    }

    #[tokio::test]
    async fn test_lease_is_exclusive() {
        let queue = queue();
        queue.enqueue(payload("q"), QueuePriority::Normal).await.unwrap();
        let _leased = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        // Leased message is invisible to a second consumer.
        assert!(queue.dequeue(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_lease_requeues() {
        let config = QueueConfig {
            visibility_timeout: Duration::from_millis(1),
            ..Default::default()
        };
        let queue = EscalationQueue::new(config, Arc::new(MemoryStore::new()));
        queue.enqueue(payload("q"), QueuePriority::Normal).await.unwrap();

        let first = queue.dequeue(Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = queue.dequeue(Duration::from_millis(300)).await.unwrap();
        assert_eq!(first.request_id, second.request_id);
    }

    #[tokio::test]
    async fn test_stats() {
        let queue = queue();
        queue.enqueue(payload("a"), QueuePriority::Normal).await.unwrap();
        queue.enqueue(payload("b"), QueuePriority::Normal).await.unwrap();
        let _leased = queue.dequeue(Duration::from_millis(10)).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(stats.ready, 1);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.dead, 0);
    }
}
