//! # Aggregator Tests
//!
//! End-to-end behaviour of the multi-source aggregator against in-memory
//! sources: fault isolation, caching, timeouts and rate limit accounting.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nutrition_lookup::aggregator::{CachedLookup, MultiSourceAggregator, SearchOptions, SourceStatus};
use nutrition_lookup::cache::ResultCache;
use nutrition_lookup::config::{AggregatorConfig, RateLimitConfig};
use nutrition_lookup::errors::LookupError;
use nutrition_lookup::food_model::{FoodCandidate, SourceTag};
use nutrition_lookup::rate_limiter::{RateClass, RateLimiters};
use nutrition_lookup::sources::{FoodSource, SourceOperation};

enum Behaviour {
    Candidates(Vec<&'static str>),
    Fail(fn() -> LookupError),
    Hang,
}

struct FakeSource {
    name: &'static str,
    behaviour: Behaviour,
    rate_class: Option<RateClass>,
    calls: AtomicUsize,
}

impl FakeSource {
    fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            name,
            behaviour,
            rate_class: Some(RateClass::Search),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FoodSource for FakeSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn tag(&self) -> SourceTag {
        SourceTag::OpenFoodFacts
    }

    fn rate_class(&self, operation: SourceOperation) -> Option<RateClass> {
        match operation {
            SourceOperation::Search => self.rate_class,
            SourceOperation::Code => Some(RateClass::Product),
        }
    }

    async fn search(&self, _query: &str, page_size: usize) -> Result<Vec<FoodCandidate>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            Behaviour::Candidates(names) => Ok(names
                .iter()
                .take(page_size)
                .map(|name| FoodCandidate::new(*name, 100.0, "g", SourceTag::OpenFoodFacts))
                .collect()),
            Behaviour::Fail(error) => Err(error()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }

    fn supports_code(&self) -> bool {
        true
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<FoodCandidate>, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if code == "9300601000000" {
            Ok(Some(FoodCandidate::new("Bega Peanut Butter", 16.0, "g", SourceTag::OpenFoodFacts)))
        } else {
            Ok(None)
        }
    }
}

fn aggregator_with(sources: Vec<Arc<dyn FoodSource>>, ttl: Duration) -> MultiSourceAggregator {
    MultiSourceAggregator::new(
        sources,
        Arc::new(ResultCache::<CachedLookup>::new(ttl, 100)),
        Arc::new(RateLimiters::default()),
        AggregatorConfig::default(),
    )
}

fn connection_reset() -> LookupError {
    LookupError::Transport("connection reset".to_string())
}

fn bad_request() -> LookupError {
    LookupError::UpstreamStatus {
        service: "Open Food Facts".to_string(),
        status: 400,
        detail: "bad query".to_string(),
    }
}

#[tokio::test]
async fn test_failing_source_is_isolated() {
    let broken = FakeSource::new("broken", Behaviour::Fail(connection_reset));
    let healthy = FakeSource::new("healthy", Behaviour::Candidates(vec!["Peanut Butter", "Peanut Paste"]));
    let aggregator = aggregator_with(vec![broken.clone(), healthy.clone()], Duration::from_secs(3600));

    let result = aggregator.search("peanut butter", &SearchOptions::default()).await;

    assert_eq!(result.sources.len(), 2);
    let broken_result = result.source("broken").unwrap();
    assert!(broken_result.candidates.is_empty());
    assert!(matches!(broken_result.status, SourceStatus::TransientFailure(_)));

    let healthy_result = result.source("healthy").unwrap();
    assert_eq!(healthy_result.status, SourceStatus::Found);
    assert_eq!(healthy_result.candidates.len(), 2);
    assert_eq!(result.total_candidates(), 2);
}

#[tokio::test]
async fn test_permanent_failure_and_no_data() {
    let rejected = FakeSource::new("rejected", Behaviour::Fail(bad_request));
    let empty = FakeSource::new("empty", Behaviour::Candidates(Vec::new()));
    let aggregator = aggregator_with(vec![rejected, empty], Duration::from_secs(3600));

    let result = aggregator.search("unknown thing", &SearchOptions::default()).await;

    assert!(matches!(
        result.source("rejected").unwrap().status,
        SourceStatus::PermanentFailure(_)
    ));
    assert_eq!(result.source("empty").unwrap().status, SourceStatus::NoData);
    assert!(!result.fallback_available);
}

#[tokio::test]
async fn test_repeat_search_is_cached() {
    let source = FakeSource::new("off", Behaviour::Candidates(vec!["Weet-Bix"]));
    let aggregator = aggregator_with(vec![source.clone()], Duration::from_secs(3600));

    let first = aggregator.search("Weet-Bix", &SearchOptions::default()).await;
    let second = aggregator.search("  weet-bix ", &SearchOptions::default()).await;

    assert_eq!(source.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(aggregator.cache_stats().valid_entries, 1);

    aggregator.clear_cache();
    aggregator.search("weet-bix", &SearchOptions::default()).await;
    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_page_size_is_part_of_the_cache_key() {
    let source = FakeSource::new("off", Behaviour::Candidates(vec!["A", "B", "C"]));
    let aggregator = aggregator_with(vec![source.clone()], Duration::from_secs(3600));

    let small = aggregator.search("abc", &SearchOptions { page_size: Some(1) }).await;
    let large = aggregator.search("abc", &SearchOptions { page_size: Some(3) }).await;

    assert_eq!(small.total_candidates(), 1);
    assert_eq!(large.total_candidates(), 3);
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cached_search_expires() {
    let source = FakeSource::new("off", Behaviour::Candidates(vec!["Milk"]));
    let aggregator = aggregator_with(vec![source.clone()], Duration::from_secs(60));

    aggregator.search("milk", &SearchOptions::default()).await;
    tokio::time::advance(Duration::from_secs(61)).await;
    aggregator.search("milk", &SearchOptions::default()).await;

    assert_eq!(source.calls(), 2);
}

#[tokio::test]
async fn test_transient_failures_are_not_cached() {
    let broken = FakeSource::new("broken", Behaviour::Fail(connection_reset));
    let aggregator = aggregator_with(vec![broken.clone()], Duration::from_secs(3600));

    aggregator.search("bread", &SearchOptions::default()).await;
    aggregator.search("bread", &SearchOptions::default()).await;

    assert_eq!(broken.calls(), 2);
}

#[tokio::test]
async fn test_empty_query_makes_no_calls() {
    let source = FakeSource::new("off", Behaviour::Candidates(vec!["Anything"]));
    let aggregator = aggregator_with(vec![source.clone()], Duration::from_secs(3600));

    let result = aggregator.search("   ", &SearchOptions::default()).await;

    assert_eq!(source.calls(), 0);
    assert_eq!(result.query, "");
    assert_eq!(result.source("off").unwrap().status, SourceStatus::NoData);
    assert!(aggregator.cache_stats().total_entries == 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_source_times_out() {
    let slow = FakeSource::new("slow", Behaviour::Hang);
    let fast = FakeSource::new("fast", Behaviour::Candidates(vec!["Banana"]));
    let aggregator = aggregator_with(vec![slow, fast], Duration::from_secs(3600));

    let result = aggregator.search("banana", &SearchOptions::default()).await;

    assert!(matches!(
        result.source("slow").unwrap().status,
        SourceStatus::TransientFailure(_)
    ));
    assert_eq!(result.source("fast").unwrap().status, SourceStatus::Found);
}

#[tokio::test]
async fn test_search_consumes_declared_rate_class() {
    let source = FakeSource::new("off", Behaviour::Candidates(vec!["Oats"]));
    let aggregator = aggregator_with(vec![source], Duration::from_secs(3600));

    aggregator.search("oats", &SearchOptions::default()).await;
    aggregator.search("rolled oats", &SearchOptions::default()).await;

    let stats = aggregator.rate_limit_stats();
    assert_eq!(stats["search"].current_count, 2);
    assert_eq!(stats["search"].max_requests, 10);
    assert_eq!(stats["product"].current_count, 0);
}

#[tokio::test]
async fn test_zero_capacity_limiter_is_a_permanent_failure() {
    let source = FakeSource::new("off", Behaviour::Candidates(vec!["Oats"]));
    let limits = RateLimitConfig {
        search_per_window: 0,
        ..Default::default()
    };
    let aggregator = MultiSourceAggregator::new(
        vec![source.clone()],
        Arc::new(ResultCache::new(Duration::from_secs(3600), 10)),
        Arc::new(RateLimiters::new(&limits)),
        AggregatorConfig::default(),
    );

    let result = aggregator.search("oats", &SearchOptions::default()).await;

    assert_eq!(source.calls(), 0);
    assert!(matches!(
        result.source("off").unwrap().status,
        SourceStatus::PermanentFailure(_)
    ));
}

#[tokio::test]
async fn test_code_lookup_caches_found_products_only() {
    let source = FakeSource::new("off", Behaviour::Candidates(Vec::new()));
    let aggregator = aggregator_with(vec![source.clone()], Duration::from_secs(3600))
        .with_fallback_available(true);

    let found = aggregator.get_by_code("9300601000000").await.unwrap();
    assert_eq!(found.name, "Bega Peanut Butter");
    aggregator.get_by_code("9300601000000").await;
    assert_eq!(source.calls(), 1);

    assert!(aggregator.get_by_code("0000000000000").await.is_none());
    assert!(aggregator.get_by_code("0000000000000").await.is_none());
    assert_eq!(source.calls(), 3);

    assert_eq!(aggregator.rate_limit_stats()["product"].current_count, 3);
}
