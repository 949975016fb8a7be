//! Escalation queue and worker pool
//!
//! This module provides:
//! - A priority queue of LLM escalation messages with strict
//!   FIFO-within-priority ordering and HIGH before NORMAL before LOW draining
//! - Atomic lease semantics with a visibility window for crashed workers
//! - Bounded retries with exponential backoff and a dead-letter queue
//! - A stateless worker pool with graceful shutdown

mod escalation;
mod processor;
mod worker;

pub use escalation::{
    EscalationQueue, NackOutcome, QueueConfig, QueueError, QueueMessage, QueuePayload,
    QueuePriority, QueueResult, QueueStats,
};
pub use processor::{EscalationProcessor, ProcessorError};
pub use worker::{QueueProcessor, WorkerPool, WorkerPoolConfig};
