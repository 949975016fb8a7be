//! Startup settings from the environment
//!
//! Read once at process start. Connection strings, thresholds, and knobs use
//! the `SHOPINTENT_` prefix; unset variables fall back to shipped defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::variant::ConfigVariant;

/// Process-wide settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// HTTP bind address.
    pub http_addr: String,
    /// Redis connection string; in-process store when unset.
    pub redis_url: Option<String>,
    /// External vector store connection string; in-process index when unset.
    pub vector_store_url: Option<String>,
    /// LLM endpoint; the LLM path is disabled when unset.
    pub llm_endpoint: Option<String>,
    /// LLM API key.
    pub llm_api_key: String,
    /// Queue retry budget.
    pub max_retries: u32,
    /// Base queue retry delay.
    pub retry_delay: Duration,
    /// Queue message TTL in seconds.
    pub message_ttl_secs: u64,
    /// Default variant thresholds.
    pub priority_threshold: f64,
    pub confidence_threshold: f64,
    pub gap_threshold: f64,
    pub kw_weight: f64,
    pub emb_weight: f64,
    /// Semantic cache similarity floor.
    pub llm_cache_similarity_threshold: f64,
    /// Response cache TTL in seconds.
    pub llm_cache_ttl_secs: u64,
    /// Per-request LLM cost ceiling in dollars.
    pub max_cost_per_request: f64,
    /// LLM calls per minute.
    pub rate_limit_max_calls: usize,
    /// Operator alert webhook.
    pub escalation_webhook_url: Option<String>,
    /// Rules file for variants; baked-in baseline when unset.
    pub config_path: Option<PathBuf>,
    /// Intent definition file; seed taxonomy when unset.
    pub intent_file: Option<PathBuf>,
    /// Keyword dictionary files.
    pub keyword_files: Vec<PathBuf>,
    /// JSONL usage log destination.
    pub usage_log_path: Option<PathBuf>,
    /// Append-only ambiguity record destination.
    pub ambiguity_log_path: Option<PathBuf>,
    /// Worker pool size.
    pub workers: usize,
    /// Default model when no variant overrides it.
    pub llm_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            redis_url: None,
            vector_store_url: None,
            llm_endpoint: None,
            llm_api_key: String::new(),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            message_ttl_secs: 86_400,
            priority_threshold: 0.85,
            confidence_threshold: 0.6,
            gap_threshold: 0.15,
            kw_weight: 0.6,
            emb_weight: 0.4,
            llm_cache_similarity_threshold: 0.95,
            llm_cache_ttl_secs: 86_400,
            max_cost_per_request: 0.01,
            rate_limit_max_calls: 60,
            escalation_webhook_url: None,
            config_path: None,
            intent_file: None,
            keyword_files: Vec::new(),
            usage_log_path: None,
            ambiguity_log_path: None,
            workers: 4,
            llm_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl Settings {
    /// Read settings from the environment.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            http_addr: var("SHOPINTENT_HTTP_ADDR").unwrap_or(defaults.http_addr),
            redis_url: var("SHOPINTENT_REDIS_URL"),
            vector_store_url: var("SHOPINTENT_VECTOR_STORE_URL"),
            llm_endpoint: var("SHOPINTENT_LLM_ENDPOINT"),
            llm_api_key: var("SHOPINTENT_LLM_API_KEY").unwrap_or_default(),
            max_retries: parse_var("SHOPINTENT_MAX_RETRIES", defaults.max_retries),
            retry_delay: Duration::from_secs_f64(parse_var(
                "SHOPINTENT_RETRY_DELAY",
                defaults.retry_delay.as_secs_f64(),
            )),
            message_ttl_secs: parse_var("SHOPINTENT_MESSAGE_TTL", defaults.message_ttl_secs),
            priority_threshold: parse_var(
                "SHOPINTENT_PRIORITY_THRESHOLD",
                defaults.priority_threshold,
            ),
            confidence_threshold: parse_var(
                "SHOPINTENT_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            ),
            gap_threshold: parse_var("SHOPINTENT_GAP_THRESHOLD", defaults.gap_threshold),
            kw_weight: parse_var("SHOPINTENT_KW_WEIGHT", defaults.kw_weight),
            emb_weight: parse_var("SHOPINTENT_EMB_WEIGHT", defaults.emb_weight),
            llm_cache_similarity_threshold: parse_var(
                "SHOPINTENT_LLM_CACHE_SIMILARITY_THRESHOLD",
                defaults.llm_cache_similarity_threshold,
            ),
            llm_cache_ttl_secs: parse_var("SHOPINTENT_LLM_CACHE_TTL", defaults.llm_cache_ttl_secs),
            max_cost_per_request: parse_var(
                "SHOPINTENT_MAX_COST_PER_REQUEST",
                defaults.max_cost_per_request,
            ),
            rate_limit_max_calls: parse_var(
                "SHOPINTENT_RATE_LIMIT_MAX_CALLS",
                defaults.rate_limit_max_calls,
            ),
            escalation_webhook_url: var("SHOPINTENT_ESCALATION_WEBHOOK_URL"),
            config_path: var("SHOPINTENT_CONFIG_PATH").map(PathBuf::from),
            intent_file: var("SHOPINTENT_INTENT_FILE").map(PathBuf::from),
            keyword_files: var("SHOPINTENT_KEYWORD_FILES")
                .map(|raw| raw.split(',').map(PathBuf::from).collect())
                .unwrap_or_default(),
            usage_log_path: var("SHOPINTENT_USAGE_LOG").map(PathBuf::from),
            ambiguity_log_path: var("SHOPINTENT_AMBIGUITY_LOG").map(PathBuf::from),
            workers: parse_var("SHOPINTENT_WORKERS", defaults.workers),
            llm_model: var("SHOPINTENT_LLM_MODEL").unwrap_or(defaults.llm_model),
        }
    }

    /// Default variant assembled from the environment thresholds, used when
    /// no rules file is configured.
    pub fn default_variant(&self) -> ConfigVariant {
        ConfigVariant {
            name: "baseline".to_string(),
            kw_weight: self.kw_weight,
            emb_weight: self.emb_weight,
            priority_threshold: self.priority_threshold,
            confidence_threshold: self.confidence_threshold,
            gap_threshold: self.gap_threshold,
            use_embedding: true,
            use_llm: self.llm_endpoint.is_some(),
            llm_model: self.llm_model.clone(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    var(name)
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}
