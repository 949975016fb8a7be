//! LLM client implementation

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::entities::Entities;
use crate::monitor::{RateLimiter, UsageRecord, UsageTracker};
use crate::taxonomy::{ActionCode, IntentCatalog};

use super::prompt::PromptLibrary;

/// Rough prompt-size heuristic: four characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Classified failure kinds; each carries its own retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmErrorKind {
    Timeout,
    RateLimit,
    ServerError,
    AuthError,
    ContextLengthExceeded,
    BudgetExceeded,
    Unknown,
}

impl LlmErrorKind {
    /// Whether another attempt may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit | Self::ServerError | Self::Unknown
        )
    }

    /// Alert kind tag for the dispatcher.
    pub fn alert_kind(self) -> &'static str {
        match self {
            Self::Timeout => "llm_timeout",
            Self::RateLimit => "llm_rate_limit",
            Self::ServerError => "llm_server_error",
            Self::AuthError => "llm_auth_error",
            Self::ContextLengthExceeded => "llm_context_length_exceeded",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Unknown => "llm_unknown_error",
        }
    }
}

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("LLM call failed ({kind:?}): {message}")]
    Call { kind: LlmErrorKind, message: String },

    #[error("All {attempts} attempts failed ({kind:?}): {message}")]
    RetriesExhausted {
        kind: LlmErrorKind,
        attempts: u32,
        message: String,
    },

    #[error("Projected cost ${projected:.5} exceeds per-request budget ${budget:.5}")]
    BudgetExceeded { projected: f64, budget: f64 },

    #[error("Unparseable model response: {0}")]
    ParseError(String),
}

impl LlmError {
    /// The classified kind of this error.
    pub fn kind(&self) -> LlmErrorKind {
        match self {
            Self::Call { kind, .. } | Self::RetriesExhausted { kind, .. } => *kind,
            Self::BudgetExceeded { .. } => LlmErrorKind::BudgetExceeded,
            Self::ParseError(_) => LlmErrorKind::Unknown,
        }
    }
}

/// One prepared backend request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_message: String,
    pub max_completion_tokens: u64,
}

/// Raw backend response before parsing.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Token and cost usage of one successful call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

/// Parsed classification from the model.
#[derive(Debug, Clone)]
pub struct LlmResult {
    /// Validated code; `None` when the model's code is outside the taxonomy.
    pub action_code: Option<ActionCode>,
    /// The code string as the model produced it.
    pub raw_action_code: String,
    /// Clamped to [0, 1].
    pub confidence: f64,
    pub entities: Option<Entities>,
    pub reasoning: Option<String>,
    pub usage: LlmUsage,
    pub latency_ms: u64,
}

/// Single-attempt backend. The client adds retries, timeout, and budget
/// enforcement around it.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Place one model call.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Per-model pricing in dollars per 1K tokens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelPrice {
    pub prompt_per_1k: f64,
    pub completion_per_1k: f64,
}

/// Price table keyed by model id.
#[derive(Debug, Clone)]
pub struct PriceTable {
    prices: HashMap<String, ModelPrice>,
    default_price: ModelPrice,
}

impl PriceTable {
    /// Table covering the supported models.
    pub fn new() -> Self {
        let prices = HashMap::from([
            (
                "gpt-4o-mini".to_string(),
                ModelPrice {
                    prompt_per_1k: 0.00015,
                    completion_per_1k: 0.0006,
                },
            ),
            (
                "gpt-4o".to_string(),
                ModelPrice {
                    prompt_per_1k: 0.0025,
                    completion_per_1k: 0.01,
                },
            ),
            (
                "claude-3-5-haiku".to_string(),
                ModelPrice {
                    prompt_per_1k: 0.0008,
                    completion_per_1k: 0.004,
                },
            ),
        ]);
        Self {
            prices,
            default_price: ModelPrice {
                prompt_per_1k: 0.001,
                completion_per_1k: 0.003,
            },
        }
    }

    /// Price for `model`, falling back to the default band.
    pub fn price(&self, model: &str) -> ModelPrice {
        self.prices.get(model).copied().unwrap_or(self.default_price)
    }

    /// Dollar cost of one call.
    pub fn cost(&self, model: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let price = self.price(model);
        prompt_tokens as f64 / 1_000.0 * price.prompt_per_1k
            + completion_tokens as f64 / 1_000.0 * price.completion_per_1k
    }
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff policy: `base * 2^(attempt-1)` plus up to `jitter` relative
/// noise.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            jitter: 0.10,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1));
        let noise = 1.0 + rand::thread_rng().gen_range(0.0..=self.jitter);
        base.mul_f64(noise)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Hard per-call timeout.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
    /// Per-request cost ceiling in dollars.
    pub max_cost_per_request: f64,
    /// Completion budget used for cost projection and the backend request.
    pub max_completion_tokens: u64,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            max_cost_per_request: 0.01,
            max_completion_tokens: 256,
        }
    }
}

/// HTTP backend speaking a chat-completions wire format.
pub struct HttpLlmBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpLlmBackend {
    /// Create a backend for the given endpoint and key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for HttpLlmBackend {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_completion_tokens,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": request.system_prompt},
                {"role": "user", "content": request.user_message},
            ],
        });

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() {
                    LlmErrorKind::Timeout
                } else {
                    LlmErrorKind::Unknown
                };
                LlmError::Call {
                    kind,
                    message: e.to_string(),
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::Call {
            kind: LlmErrorKind::Unknown,
            message: e.to_string(),
        })?;

        if !status.is_success() {
            let kind = classify_http_failure(status.as_u16(), &text);
            return Err(LlmError::Call {
                kind,
                message: format!("HTTP {status}"),
            });
        }

        let value: Value = serde_json::from_str(&text)
            .map_err(|e| LlmError::ParseError(e.to_string()))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let prompt_tokens = value["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let completion_tokens = value["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        Ok(LlmResponse {
            content,
            prompt_tokens,
            completion_tokens,
        })
    }
}

fn classify_http_failure(status: u16, body: &str) -> LlmErrorKind {
    match status {
        401 | 403 => LlmErrorKind::AuthError,
        429 => LlmErrorKind::RateLimit,
        500..=599 => LlmErrorKind::ServerError,
        _ if body.contains("context_length") || body.contains("context length") => {
            LlmErrorKind::ContextLengthExceeded
        }
        _ => LlmErrorKind::Unknown,
    }
}

/// Resilient classification client over an [`LlmBackend`].
pub struct LlmClient {
    backend: Arc<dyn LlmBackend>,
    config: LlmClientConfig,
    prices: PriceTable,
    prompts: PromptLibrary,
    catalog: Arc<IntentCatalog>,
    rate_limiter: Arc<RateLimiter>,
    usage: Arc<UsageTracker>,
}

impl LlmClient {
    /// Create a client.
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        config: LlmClientConfig,
        catalog: Arc<IntentCatalog>,
        rate_limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
    ) -> Self {
        Self {
            backend,
            config,
            prices: PriceTable::new(),
            prompts: PromptLibrary::new(),
            catalog,
            rate_limiter,
            usage,
        }
    }

    /// Classify `query` with `model`, attaching recent session `context`.
    ///
    /// The budget projection runs before any network traffic, and each
    /// individual attempt passes the process-wide rate limiter before its
    /// call is placed. Retryable failures back off exponentially with
    /// jitter up to the attempt cap.
    pub async fn classify(
        &self,
        query: &str,
        context: &[String],
        model: &str,
    ) -> Result<LlmResult, LlmError> {
        let request = LlmRequest {
            model: model.to_string(),
            system_prompt: self.prompts.system_prompt(model, &self.catalog),
            user_message: self.prompts.user_message(query, context),
            max_completion_tokens: self.config.max_completion_tokens,
        };

        self.check_budget(&request)?;

        let started = Instant::now();
        let mut last: Option<(LlmErrorKind, String)> = None;

        for attempt in 1..=self.config.retry.max_attempts {
            // Every attempt is its own provider call, so every attempt goes
            // through the process-wide gate. A denial consumes the attempt
            // and backs off like any other retryable failure.
            let error = if !self.rate_limiter.allow() {
                (
                    LlmErrorKind::RateLimit,
                    "process-wide call window exhausted".to_string(),
                )
            } else {
                let outcome = tokio::time::timeout(
                    self.config.call_timeout,
                    self.backend.complete(&request),
                )
                .await;

                match outcome {
                    Ok(Ok(response)) => {
                        return self.finish(query, model, response, started);
                    }
                    Ok(Err(e)) => {
                        let kind = e.kind();
                        (kind, e.to_string())
                    }
                    Err(_) => (
                        LlmErrorKind::Timeout,
                        format!("call exceeded {:?}", self.config.call_timeout),
                    ),
                }
            };

            warn!(
                attempt,
                kind = ?error.0,
                model,
                "LLM attempt failed"
            );
            let retryable = error.0.is_retryable();
            last = Some(error);

            if !retryable || attempt == self.config.retry.max_attempts {
                break;
            }
            tokio::time::sleep(self.config.retry.delay_after(attempt)).await;
        }

        let (kind, message) = last.unwrap_or((LlmErrorKind::Unknown, "no attempt ran".into()));
        Err(LlmError::RetriesExhausted {
            kind,
            attempts: self.config.retry.max_attempts,
            message,
        })
    }

    /// Reject calls whose projected cost exceeds the per-request ceiling.
    fn check_budget(&self, request: &LlmRequest) -> Result<(), LlmError> {
        let projected_prompt_tokens =
            ((request.system_prompt.len() + request.user_message.len()) / CHARS_PER_TOKEN) as u64;
        let projected = self.prices.cost(
            &request.model,
            projected_prompt_tokens,
            request.max_completion_tokens,
        );
        if projected > self.config.max_cost_per_request {
            return Err(LlmError::BudgetExceeded {
                projected,
                budget: self.config.max_cost_per_request,
            });
        }
        Ok(())
    }

    fn finish(
        &self,
        query: &str,
        model: &str,
        response: LlmResponse,
        started: Instant,
    ) -> Result<LlmResult, LlmError> {
        let latency_ms = started.elapsed().as_millis() as u64;
        let cost = self
            .prices
            .cost(model, response.prompt_tokens, response.completion_tokens);
        let usage = LlmUsage {
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            cost,
        };

        self.usage.record(UsageRecord {
            timestamp: Utc::now(),
            model: model.to_string(),
            prompt_tokens: response.prompt_tokens,
            completion_tokens: response.completion_tokens,
            cost,
            latency_ms,
        });

        let parsed = parse_content(&response.content)?;
        let raw_code = parsed.action_code;
        let action = ActionCode::new(raw_code.clone());
        let action_code = if self.catalog.contains(&action) {
            Some(action)
        } else {
            debug!(code = %raw_code, query, "model produced out-of-taxonomy code");
            None
        };

        Ok(LlmResult {
            action_code,
            raw_action_code: raw_code,
            confidence: parsed.confidence.clamp(0.0, 1.0),
            entities: parsed.entities,
            reasoning: parsed.reasoning,
            usage,
            latency_ms,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ParsedContent {
    action_code: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    entities: Option<Entities>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Parse the model's JSON, tolerating markdown code fences.
fn parse_content(content: &str) -> Result<ParsedContent, LlmError> {
    let trimmed = content.trim();
    let stripped = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|s| s.trim_end_matches("```").trim())
        .unwrap_or(trimmed);
    serde_json::from_str(stripped).map_err(|e| LlmError::ParseError(e.to_string()))
}
