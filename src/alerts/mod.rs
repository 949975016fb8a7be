//! Alerting and fallback management
//!
//! This module provides:
//! - Alert sinks (webhook, tracing) with severity levels
//! - Frequency-based suppression of warnings within a sliding hour window
//! - The fallback manager that turns LLM failures into safe user responses

mod dispatch;
mod fallback;
mod sink;

pub use dispatch::{Alert, AlertDispatcher, AlertSeverity};
pub use fallback::FallbackManager;
pub use sink::{AlertSink, TracingAlertSink, WebhookAlertSink};
