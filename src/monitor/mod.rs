//! Cost monitoring and rate limiting
//!
//! This module provides:
//! - A sliding-window rate limiter gating all LLM calls process-wide
//! - A usage tracker appending per-call records to a persistent log with
//!   in-memory daily and monthly aggregates
//! - A spike detector comparing today's spend to the trailing average
//! - A cron-scheduled sweep that alerts when a spike is detected

mod rate_limit;
mod spike;
mod usage;

pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use spike::{SpikeDetector, SpikeReport, SpikeSweep};
pub use usage::{UsageRecord, UsageSummaryWindow, UsageTracker};
