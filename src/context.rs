//! Application context
//!
//! All shared components are constructed here at startup and owned by one
//! root object; request handlers and workers borrow through `Arc`. Teardown
//! is deterministic: the HTTP server stops accepting, the worker pool drains
//! its in-flight messages, and background sweeps observe the shutdown
//! signal.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::alerts::{AlertDispatcher, AlertSink, FallbackManager, TracingAlertSink, WebhookAlertSink};
use crate::cache::{CacheConfig, ResponseCache};
use crate::config::{ConfigManager, ConfigWatcher, Settings};
use crate::engine::{AmbiguityLog, DecisionEngine, SessionWindow};
use crate::llm::{
    HttpLlmBackend, LlmBackend, LlmClient, LlmClientConfig, LlmError, LlmErrorKind, LlmRequest,
    LlmResponse,
};
use crate::matching::{EmbeddingMatcher, KeywordMatcher};
use crate::monitor::{RateLimiter, RateLimiterConfig, SpikeDetector, SpikeSweep, UsageTracker};
use crate::queue::{
    EscalationProcessor, EscalationQueue, QueueConfig, WorkerPool, WorkerPoolConfig,
};
use crate::status::{StatusStore, DEFAULT_STATUS_TTL_SECS};
use crate::store::{InMemoryVectorIndex, KvStore, MemoryStore, RedisStore};
use crate::taxonomy::{load_intent_file, load_keyword_file, seed_catalog, seed_keywords};
use crate::text::Normalizer;

/// Bootstrap errors, mapped to process exit codes.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Exit code 1: configuration or data files failed validation.
    #[error("Startup validation failed: {0}")]
    Validation(String),

    /// Exit code 2: a required dependency is unavailable.
    #[error("Fatal dependency unavailable: {0}")]
    Dependency(String),
}

impl BootstrapError {
    /// The CLI exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 1,
            Self::Dependency(_) => 2,
        }
    }
}

/// Backend used when no LLM endpoint is configured. Variants normally keep
/// `use_llm` off in that case; a stray call fails cleanly and the worker
/// serves its fallback.
struct DisabledLlmBackend;

#[async_trait]
impl LlmBackend for DisabledLlmBackend {
    async fn complete(&self, _request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        Err(LlmError::Call {
            kind: LlmErrorKind::Unknown,
            message: "no LLM endpoint configured".to_string(),
        })
    }
}

/// Root object owning every shared component.
pub struct AppContext {
    /// Startup settings snapshot.
    pub settings: Settings,
    /// Active-variant registry.
    pub config: Arc<ConfigManager>,
    /// The classification pipeline.
    pub engine: Arc<DecisionEngine>,
    /// Embedding matcher, exposed for health checks.
    pub embeddings: Arc<EmbeddingMatcher>,
    /// Two-tier response cache.
    pub cache: Arc<ResponseCache>,
    /// Escalation queue.
    pub queue: Arc<EscalationQueue>,
    /// Per-request status store.
    pub status: Arc<StatusStore>,
    /// LLM usage aggregates.
    pub usage: Arc<UsageTracker>,
    /// Process-wide LLM call gate.
    pub rate_limiter: Arc<RateLimiter>,
    /// Alert dispatcher.
    pub alerts: Arc<AlertDispatcher>,
    pool: Arc<WorkerPool>,
    shutdown: watch::Sender<bool>,
}

impl AppContext {
    /// Construct and wire every component from settings.
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>, BootstrapError> {
        // Taxonomy and keyword dictionaries are immutable once built.
        let catalog = Arc::new(match &settings.intent_file {
            Some(path) => load_intent_file(path)
                .map_err(|e| BootstrapError::Validation(e.to_string()))?,
            None => seed_catalog(),
        });
        info!(intents = catalog.len(), "taxonomy loaded");

        let mut keywords = std::collections::BTreeMap::new();
        for path in &settings.keyword_files {
            match load_keyword_file(path, &catalog) {
                Ok(entries) => keywords.extend(entries),
                // A malformed dictionary never takes the service down.
                Err(e) => warn!(path = %path.display(), error = %e, "keyword file skipped"),
            }
        }
        if keywords.is_empty() {
            if !settings.keyword_files.is_empty() {
                warn!("no usable keyword files, using the built-in dictionary");
            }
            keywords = seed_keywords();
        }

        let normalizer = Arc::new(Normalizer::default());
        let keyword = Arc::new(KeywordMatcher::new(&keywords, Arc::clone(&normalizer)));
        info!(patterns = keyword.pattern_count(), "keyword index compiled");

        let embeddings = Arc::new(EmbeddingMatcher::with_default_encoder(Arc::clone(&catalog)));

        // Config: rules file when present, env-derived baseline otherwise.
        let config = Arc::new(match &settings.config_path {
            Some(path) => ConfigManager::from_file(path)
                .map_err(|e| BootstrapError::Validation(e.to_string()))?,
            None => ConfigManager::with_variant(settings.default_variant())
                .map_err(|e| BootstrapError::Validation(e.to_string()))?,
        });
        if settings.config_path.is_some() {
            if let Err(e) = ConfigWatcher::spawn(Arc::clone(&config)) {
                warn!(error = %e, "config watcher unavailable, hot reload disabled");
            }
        }

        // Shared key-value store: Redis when configured and reachable,
        // in-process otherwise.
        let store: Arc<dyn KvStore> = match &settings.redis_url {
            Some(url) => match RedisStore::connect(url).await {
                Ok(store) => {
                    info!("connected to redis store");
                    Arc::new(store)
                }
                Err(e) => {
                    warn!(error = %e, "redis unreachable, using in-process store");
                    Arc::new(MemoryStore::new())
                }
            },
            None => Arc::new(MemoryStore::new()),
        };

        let cache = Arc::new(ResponseCache::new(
            CacheConfig {
                ttl_secs: settings.llm_cache_ttl_secs,
                similarity_threshold: settings.llm_cache_similarity_threshold,
                ..CacheConfig::default()
            },
            Arc::clone(&store),
            Arc::new(InMemoryVectorIndex::new()),
        ));

        let sink: Arc<dyn AlertSink> = match &settings.escalation_webhook_url {
            Some(url) => Arc::new(WebhookAlertSink::new(url.clone())),
            None => Arc::new(TracingAlertSink),
        };
        let alerts = Arc::new(AlertDispatcher::new(sink));

        let usage = Arc::new(UsageTracker::new(settings.usage_log_path.clone()));
        let rate_limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            max_calls: settings.rate_limit_max_calls,
            window_secs: 60,
        }));

        let backend: Arc<dyn LlmBackend> = match &settings.llm_endpoint {
            Some(endpoint) => Arc::new(HttpLlmBackend::new(
                endpoint.clone(),
                settings.llm_api_key.clone(),
            )),
            None => Arc::new(DisabledLlmBackend),
        };
        let llm = Arc::new(LlmClient::new(
            backend,
            LlmClientConfig {
                max_cost_per_request: settings.max_cost_per_request,
                ..LlmClientConfig::default()
            },
            Arc::clone(&catalog),
            Arc::clone(&rate_limiter),
            Arc::clone(&usage),
        ));

        let queue = Arc::new(EscalationQueue::new(
            QueueConfig {
                max_retries: settings.max_retries,
                retry_delay: settings.retry_delay,
                message_ttl_secs: settings.message_ttl_secs,
                ..QueueConfig::default()
            },
            Arc::clone(&store),
        ));
        let status = Arc::new(StatusStore::new(
            Arc::clone(&store),
            "shopintent",
            DEFAULT_STATUS_TTL_SECS,
        ));
        let fallback = Arc::new(FallbackManager::new(Arc::clone(&cache)));

        let processor = Arc::new(EscalationProcessor::new(
            Arc::clone(&status),
            Arc::clone(&cache),
            llm,
            Arc::clone(&embeddings),
            Arc::clone(&alerts),
            Arc::clone(&fallback),
            Arc::clone(&config),
        ));
        let pool = Arc::new(WorkerPool::new(
            Arc::clone(&queue),
            processor,
            WorkerPoolConfig {
                workers: settings.workers.max(1),
                ..WorkerPoolConfig::default()
            },
        ));

        let engine = Arc::new(DecisionEngine::new(
            Arc::clone(&catalog),
            keyword,
            Arc::clone(&embeddings),
            Arc::clone(&config),
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&status),
            fallback,
            Arc::new(AmbiguityLog::new(settings.ambiguity_log_path.clone())),
            Arc::new(SessionWindow::new()),
        ));

        let (shutdown, _) = watch::channel(false);
        let sweep = SpikeSweep::new(
            SpikeDetector::new(Arc::clone(&usage), 2.0),
            Arc::clone(&alerts),
        );
        tokio::spawn(sweep.run(shutdown.subscribe()));

        pool.start();

        Ok(Arc::new(Self {
            settings,
            config,
            engine,
            embeddings,
            cache,
            queue,
            status,
            usage,
            rate_limiter,
            alerts,
            pool,
            shutdown,
        }))
    }

    /// Serve HTTP until SIGINT, then drain workers and background tasks.
    pub async fn serve(self: &Arc<Self>) -> Result<(), BootstrapError> {
        let listener = tokio::net::TcpListener::bind(&self.settings.http_addr)
            .await
            .map_err(|e| {
                BootstrapError::Dependency(format!("cannot bind {}: {e}", self.settings.http_addr))
            })?;
        info!(addr = %self.settings.http_addr, "listening");

        let router = crate::api::create_router(Arc::clone(self));
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown signal received");
            })
            .await
            .map_err(|e| BootstrapError::Dependency(e.to_string()))?;

        self.stop().await;
        Ok(())
    }

    /// Drain workers and stop background tasks.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        self.pool.shutdown().await;
        info!("context stopped");
    }
}
