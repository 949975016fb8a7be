//! Escalation message processing
//!
//! One leased message flows: status → PROCESSING, response-cache lookup,
//! LLM call under the active variant, entity merge, cache store, status →
//! COMPLETED. LLM failures produce a user-safe fallback instead of an error
//! status; only rate-limit pressure re-queues the message for a later
//! attempt.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alerts::{AlertDispatcher, AlertSeverity, FallbackManager};
use crate::cache::ResponseCache;
use crate::config::ConfigManager;
use crate::engine::{ClassificationResult, ClassificationStatus};
use crate::entities::EntityExtractor;
use crate::llm::{LlmClient, LlmError, LlmErrorKind};
use crate::matching::{EmbeddingMatcher, MatchSource};
use crate::status::{RequestState, StatusError, StatusStore, UsageSummary};
use crate::taxonomy::ActionCode;

use super::escalation::QueueMessage;
use super::worker::QueueProcessor;

/// Processor errors; returned to the worker for a nack.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProcessorError {
    pub message: String,
    pub retry_later: bool,
}

impl ProcessorError {
    fn retry(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retry_later: true,
        }
    }
}

/// Stateless escalation processor shared by all workers.
pub struct EscalationProcessor {
    status: Arc<StatusStore>,
    cache: Arc<ResponseCache>,
    llm: Arc<LlmClient>,
    embeddings: Arc<EmbeddingMatcher>,
    extractor: EntityExtractor,
    alerts: Arc<AlertDispatcher>,
    fallback: Arc<FallbackManager>,
    config: Arc<ConfigManager>,
}

impl EscalationProcessor {
    /// Create a processor.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: Arc<StatusStore>,
        cache: Arc<ResponseCache>,
        llm: Arc<LlmClient>,
        embeddings: Arc<EmbeddingMatcher>,
        alerts: Arc<AlertDispatcher>,
        fallback: Arc<FallbackManager>,
        config: Arc<ConfigManager>,
    ) -> Self {
        Self {
            status,
            cache,
            llm,
            embeddings,
            extractor: EntityExtractor::new(),
            alerts,
            fallback,
            config,
        }
    }

    async fn advance(&self, request_id: &str, state: RequestState) {
        match self
            .status
            .update(request_id, state, None, None, None)
            .await
        {
            Ok(_) => {}
            // A retried message is already PROCESSING; that is not a fault.
            Err(StatusError::InvalidTransition { .. }) => {}
            Err(e) => warn!(request_id, error = %e, "status transition failed"),
        }
    }

    async fn complete(
        &self,
        request_id: &str,
        result: ClassificationResult,
        usage: Option<UsageSummary>,
    ) {
        if let Err(e) = self
            .status
            .update(
                request_id,
                RequestState::Completed,
                Some("Classification complete".to_string()),
                Some(result),
                usage,
            )
            .await
        {
            warn!(request_id, error = %e, "could not record completion");
        }
    }

    /// Build the final result from a successful LLM response.
    fn result_from_llm(
        &self,
        query: &str,
        llm: &crate::llm::LlmResult,
    ) -> ClassificationResult {
        let entities = self.extractor.merge(query, llm.entities.clone());
        match &llm.action_code {
            Some(code) => ClassificationResult::new(
                code.clone(),
                llm.confidence,
                ClassificationStatus::LlmClassification,
                MatchSource::Fallback,
            )
            .with_entities(entities),
            None => {
                // Out-of-taxonomy code reads as an unclear outcome.
                let mut result = ClassificationResult::new(
                    ActionCode::from("UNCLEAR"),
                    llm.confidence.min(0.3),
                    ClassificationStatus::Unclear,
                    MatchSource::Fallback,
                )
                .with_entities(entities);
                result.requires_clarification = Some(true);
                result
            }
        }
    }

    async fn alert_for(&self, error: &LlmError, request_id: &str) {
        let kind = error.kind();
        let severity = match kind {
            LlmErrorKind::AuthError => AlertSeverity::Critical,
            _ => AlertSeverity::Warning,
        };
        self.alerts
            .report(
                severity,
                kind.alert_kind(),
                format!("request {request_id}: {error}"),
            )
            .await;
    }
}

#[async_trait::async_trait]
impl QueueProcessor for EscalationProcessor {
    async fn process(&self, message: &QueueMessage) -> Result<(), ProcessorError> {
        let request_id = &message.request_id;
        let query = &message.payload.query;
        self.advance(request_id, RequestState::Processing).await;

        let embedding = self.embeddings.embed(query);
        let embedding_slice = embedding.as_deref().map(|v| v.as_slice());

        // Another request may have answered this query while it sat queued.
        if let Some(cached) = self.cache.get(query, embedding_slice).await {
            debug!(request_id, "escalation answered from response cache");
            self.complete(request_id, cached, None).await;
            return Ok(());
        }

        let variant = self.config.active();
        match self
            .llm
            .classify(query, &message.payload.context_snapshot, &variant.llm_model)
            .await
        {
            Ok(llm_result) => {
                let result = self.result_from_llm(query, &llm_result);
                self.cache.set(query, embedding_slice, &result).await;
                let usage = UsageSummary {
                    prompt_tokens: llm_result.usage.prompt_tokens,
                    completion_tokens: llm_result.usage.completion_tokens,
                    cost: llm_result.usage.cost,
                };
                info!(
                    request_id,
                    code = %result.action_code,
                    latency_ms = llm_result.latency_ms,
                    "escalation classified"
                );
                self.complete(request_id, result, Some(usage)).await;
                Ok(())
            }
            Err(error) => {
                self.alert_for(&error, request_id).await;
                let kind = error.kind();

                // Rate-limit pressure clears on its own; put the message
                // back instead of burning the fallback.
                if kind == LlmErrorKind::RateLimit {
                    return Err(ProcessorError::retry(format!(
                        "rate limited: {error}"
                    )));
                }

                warn!(request_id, kind = ?kind, "LLM path failed, serving fallback");
                let result = self
                    .fallback
                    .after_llm_failure(query, embedding_slice, kind.is_retryable())
                    .await;
                self.complete(request_id, result, None).await;
                Ok(())
            }
        }
    }

    async fn on_dead(&self, message: &QueueMessage, error: &str) {
        let request_id = &message.request_id;
        if let Err(e) = self
            .status
            .update(
                request_id,
                RequestState::Failed,
                Some("We couldn't finish analyzing your request. Please try again.".to_string()),
                None,
                None,
            )
            .await
        {
            warn!(request_id, error = %e, "could not record dead-letter failure");
        }
        self.alerts
            .report(
                AlertSeverity::Error,
                "all_retries_failed",
                format!("request {request_id} dead-lettered: {error}"),
            )
            .await;
    }
}
