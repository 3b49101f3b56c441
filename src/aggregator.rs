//! # Multi-Source Aggregator
//!
//! Fans a food query out to every configured source concurrently and merges
//! what comes back. Each source is rate limited according to the class it
//! declares, bounded by a timeout, and isolated: a failing source contributes
//! an empty list and a failure status, never an error for the whole call.
//!
//! Results are memoized in a `ResultCache` keyed by the canonical query.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ResultCache};
use crate::config::AggregatorConfig;
use crate::errors::LookupError;
use crate::food_model::FoodCandidate;
use crate::rate_limiter::{RateLimiterStats, RateLimiters};
use crate::sources::{FoodSource, SourceOperation};

/// Outcome of one source for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SourceStatus {
    /// At least one candidate
    Found,
    /// The source answered but knows nothing about the query
    NoData,
    /// Network failure, timeout, throttling or server error
    TransientFailure(String),
    /// Anything retrying would not fix
    PermanentFailure(String),
}

impl SourceStatus {
    fn from_outcome(outcome: &Result<Vec<FoodCandidate>, LookupError>) -> Self {
        match outcome {
            Ok(candidates) if candidates.is_empty() => SourceStatus::NoData,
            Ok(_) => SourceStatus::Found,
            Err(err) if err.is_transient() => SourceStatus::TransientFailure(err.to_string()),
            Err(err) => SourceStatus::PermanentFailure(err.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SourceStatus::TransientFailure(_) | SourceStatus::PermanentFailure(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: String,
    pub candidates: Vec<FoodCandidate>,
    pub status: SourceStatus,
}

/// Merged answer of every configured source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Canonical form of the query
    pub query: String,
    /// One entry per configured source, in configuration order
    pub sources: Vec<SourceResult>,
    /// Whether a model-backed lookup can be offered when nothing matches
    pub fallback_available: bool,
    pub fetched_at: DateTime<Utc>,
}

impl AggregateResult {
    /// Result for the named source
    pub fn source(&self, name: &str) -> Option<&SourceResult> {
        self.sources.iter().find(|result| result.source == name)
    }

    /// All candidates across sources, in source order
    pub fn candidates(&self) -> impl Iterator<Item = &FoodCandidate> {
        self.sources.iter().flat_map(|result| result.candidates.iter())
    }

    pub fn total_candidates(&self) -> usize {
        self.sources.iter().map(|result| result.candidates.len()).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchOptions {
    /// Candidates requested from each source; `None` uses the configured default
    pub page_size: Option<usize>,
}

/// Values held by the aggregator's cache
#[derive(Debug, Clone)]
pub enum CachedLookup {
    Search(AggregateResult),
    Product(FoodCandidate),
}

pub struct MultiSourceAggregator {
    sources: Vec<Arc<dyn FoodSource>>,
    code_source: Option<Arc<dyn FoodSource>>,
    cache: Arc<ResultCache<CachedLookup>>,
    limiters: Arc<RateLimiters>,
    config: AggregatorConfig,
    fallback_available: bool,
}

impl MultiSourceAggregator {
    /// Create an aggregator over `sources`
    ///
    /// The first source that supports code lookups serves `get_by_code`.
    pub fn new(
        sources: Vec<Arc<dyn FoodSource>>,
        cache: Arc<ResultCache<CachedLookup>>,
        limiters: Arc<RateLimiters>,
        config: AggregatorConfig,
    ) -> Self {
        let code_source = sources.iter().find(|source| source.supports_code()).cloned();
        Self {
            sources,
            code_source,
            cache,
            limiters,
            config,
            fallback_available: false,
        }
    }

    pub fn with_fallback_available(mut self, available: bool) -> Self {
        self.fallback_available = available;
        self
    }

    /// Override the source used for code lookups
    pub fn with_code_source(mut self, source: Arc<dyn FoodSource>) -> Self {
        self.code_source = Some(source);
        self
    }

    fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.config.source_timeout_secs)
    }

    /// Trim, collapse inner whitespace and lowercase
    pub fn canonicalize_query(query: &str) -> String {
        query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }

    /// Query every source and merge the results
    pub async fn search(&self, query: &str, options: &SearchOptions) -> AggregateResult {
        let canonical = Self::canonicalize_query(query);
        let page_size = options
            .page_size
            .filter(|size| *size > 0)
            .unwrap_or(self.config.default_page_size);

        if canonical.is_empty() {
            debug!("Empty query, skipping sources");
            return self.assemble(
                canonical,
                self.sources
                    .iter()
                    .map(|source| SourceResult {
                        source: source.name().to_string(),
                        candidates: Vec::new(),
                        status: SourceStatus::NoData,
                    })
                    .collect(),
            );
        }

        let cache_key = format!("search:{canonical}:{page_size}");
        if let Some(CachedLookup::Search(cached)) = self.cache.get(&cache_key) {
            debug!(query = %canonical, "Search served from cache");
            return cached;
        }

        let lookups = self
            .sources
            .iter()
            .map(|source| self.search_source(source.as_ref(), &canonical, page_size));
        let results = join_all(lookups).await;

        let result = self.assemble(canonical, results);
        let transient = result
            .sources
            .iter()
            .any(|source| matches!(source.status, SourceStatus::TransientFailure(_)));
        if transient {
            debug!(query = %result.query, "Not caching result with transient failures");
        } else {
            self.cache.put(cache_key, CachedLookup::Search(result.clone()));
        }

        info!(
            query = %result.query,
            sources = result.sources.len(),
            candidates = result.total_candidates(),
            "Aggregate search completed"
        );
        result
    }

    fn assemble(&self, query: String, sources: Vec<SourceResult>) -> AggregateResult {
        AggregateResult {
            query,
            sources,
            fallback_available: self.fallback_available,
            fetched_at: Utc::now(),
        }
    }

    async fn search_source(&self, source: &dyn FoodSource, query: &str, page_size: usize) -> SourceResult {
        let name = source.name();
        let outcome = match self.admit(source, SourceOperation::Search).await {
            Ok(()) => self.bounded(name, source.search(query, page_size)).await,
            Err(err) => Err(err),
        };

        let status = SourceStatus::from_outcome(&outcome);
        let candidates = match outcome {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(source = %name, query = %query, error = %err, "Source search failed");
                Vec::new()
            }
        };

        SourceResult {
            source: name.to_string(),
            candidates,
            status,
        }
    }

    /// Wait for the rate window the source declares for `operation`
    async fn admit(&self, source: &dyn FoodSource, operation: SourceOperation) -> Result<(), LookupError> {
        let Some(class) = source.rate_class(operation) else {
            return Ok(());
        };
        if self.limiters.acquire(class, true).await {
            Ok(())
        } else {
            Err(LookupError::Configuration(format!(
                "{} rate limit allows no requests",
                class.as_str()
            )))
        }
    }

    async fn bounded<T, F>(&self, name: &str, call: F) -> Result<T, LookupError>
    where
        F: std::future::Future<Output = Result<T, LookupError>>,
    {
        let timeout = self.source_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LookupError::Timeout(format!(
                "{name} did not answer within {}s",
                timeout.as_secs()
            ))),
        }
    }

    /// Look up a product by barcode using the code source
    ///
    /// Failures are logged and reported as `None`. Only found products are
    /// cached.
    pub async fn get_by_code(&self, code: &str) -> Option<FoodCandidate> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }
        let Some(source) = &self.code_source else {
            warn!(code = %code, "No source supports code lookups");
            return None;
        };

        let cache_key = format!("code:{code}");
        if let Some(CachedLookup::Product(cached)) = self.cache.get(&cache_key) {
            debug!(code = %code, "Product served from cache");
            return Some(cached);
        }

        let outcome = match self.admit(source.as_ref(), SourceOperation::Code).await {
            Ok(()) => self.bounded(source.name(), source.get_by_code(code)).await,
            Err(err) => Err(err),
        };

        match outcome {
            Ok(Some(candidate)) => {
                info!(code = %code, source = %source.name(), "Product found");
                self.cache.put(cache_key, CachedLookup::Product(candidate.clone()));
                Some(candidate)
            }
            Ok(None) => {
                debug!(code = %code, source = %source.name(), "Product not found");
                None
            }
            Err(err) => {
                warn!(code = %code, source = %source.name(), error = %err, "Product lookup failed");
                None
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn rate_limit_stats(&self) -> BTreeMap<&'static str, RateLimiterStats> {
        self.limiters.all_stats()
    }
}
