//! # Lookup Configuration Module
//!
//! This module defines configuration structures for the lookup pipeline,
//! including provider credentials, rate ceilings, cache bounds and
//! data source endpoints.

use std::env;
use std::time::Duration;
use tracing::warn;

// Constants for provider configuration
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_RESPONSES_URL: &str = "https://api.openai.com/v1/responses";
pub const DEFAULT_PRIMARY_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_FALLBACK_MODELS: &str = "gpt-4.1,gpt-4o-mini";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o";
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;

// Constants for Open Food Facts
pub const DEFAULT_OFF_BASE_URL: &str = "https://world.openfoodfacts.org";
pub const DEFAULT_OFF_USER_AGENT: &str = "NutritionLookup/0.1 (nutrition_lookup crate)";
pub const DEFAULT_OFF_COUNTRY: &str = "australia";

/// Text generation provider settings
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Bearer token; `None` disables every model-backed path
    pub api_key: Option<String>,
    /// Base endpoint, either a chat completions or a responses URL
    pub base_url: String,
    /// First model tried for every request
    pub primary_model: String,
    /// Ordered alternatives tried when a model is unavailable
    pub fallback_models: Vec<String>,
    /// Model used for image analysis
    pub vision_model: String,
    /// Model tried first for name suggestions
    pub autosuggest_model: Option<String>,
    /// Model identifier prefixes that require the responses request shape
    pub responses_model_prefixes: Vec<String>,
    /// Model identifier prefixes that reject `temperature` on the responses shape
    pub no_temperature_prefixes: Vec<String>,
    /// Fixed timeout for every provider call in seconds
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_PROVIDER_BASE_URL.to_string(),
            primary_model: DEFAULT_PRIMARY_MODEL.to_string(),
            fallback_models: parse_model_list(DEFAULT_FALLBACK_MODELS),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            autosuggest_model: Some(DEFAULT_PRIMARY_MODEL.to_string()),
            responses_model_prefixes: vec!["gpt-5".to_string()],
            no_temperature_prefixes: vec!["gpt-5".to_string()],
            timeout_secs: DEFAULT_PROVIDER_TIMEOUT_SECS,
        }
    }
}

impl ProviderConfig {
    /// Whether an API key is present
    pub fn is_configured(&self) -> bool {
        self.api_key.as_deref().is_some_and(|key| !key.trim().is_empty())
    }

    /// Primary model followed by the fallbacks, without duplicates
    pub fn candidate_models(&self) -> Vec<String> {
        let mut models = vec![self.primary_model.clone()];
        for model in &self.fallback_models {
            if !models.contains(model) {
                models.push(model.clone());
            }
        }
        models.retain(|m| !m.trim().is_empty());
        models
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Caller-side ceilings for the public product database
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Product reads per window
    pub product_per_window: usize,
    /// Keyword searches per window
    pub search_per_window: usize,
    /// Facet/aggregate queries per window
    pub facet_per_window: usize,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            product_per_window: 100,
            search_per_window: 10,
            facet_per_window: 2,
            window_secs: 60,
        }
    }
}

/// Result cache bounds
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time-to-live for every entry in seconds
    pub ttl_secs: u64,
    /// Maximum number of entries before least-recently-used eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 24 * 60 * 60, // 24 hours
            max_entries: 1024,
        }
    }
}

/// Open Food Facts endpoint settings
#[derive(Debug, Clone)]
pub struct OpenFoodFactsConfig {
    pub base_url: String,
    /// Sent on every request as the database asks
    pub user_agent: String,
    /// Country tag used to filter searches, `None` searches worldwide
    pub country: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OpenFoodFactsConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OFF_BASE_URL.to_string(),
            user_agent: DEFAULT_OFF_USER_AGENT.to_string(),
            country: Some(DEFAULT_OFF_COUNTRY.to_string()),
            timeout_secs: 10,
        }
    }
}

/// Aggregation behaviour
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Results requested from each source when the caller gives no page size
    pub default_page_size: usize,
    /// Upper bound for a single source call in seconds
    pub source_timeout_secs: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            source_timeout_secs: 20,
        }
    }
}

/// Complete configuration for the lookup pipeline
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub rate_limits: RateLimitConfig,
    pub cache: CacheConfig,
    pub open_food_facts: OpenFoodFactsConfig,
    pub aggregator: AggregatorConfig,
}

impl AppConfig {
    /// Build configuration from the process environment
    ///
    /// Loads a `.env` file first if one exists. Unset variables keep their
    /// defaults; unparseable numbers are logged and ignored.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = AppConfig::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        config.provider.api_key = get("OPENAI_API_KEY");
        if let Some(url) = get("OPENAI_BASE_URL") {
            config.provider.base_url = url;
        }
        if let Some(model) = get("OPENAI_MODEL") {
            config.provider.primary_model = model;
        }
        if let Some(models) = get("OPENAI_FALLBACK_MODELS") {
            config.provider.fallback_models = parse_model_list(&models);
        }
        if let Some(model) = get("OPENAI_VISION_MODEL") {
            config.provider.vision_model = model;
        }
        if let Some(model) = get("OPENAI_AUTOSUGGEST_MODEL") {
            config.provider.autosuggest_model = Some(model);
        }
        config.provider.timeout_secs = parse_number(
            get("OPENAI_TIMEOUT_SECS"),
            "OPENAI_TIMEOUT_SECS",
            config.provider.timeout_secs,
        );

        if let Some(url) = get("OFF_BASE_URL") {
            config.open_food_facts.base_url = url;
        }
        if let Some(agent) = get("OFF_USER_AGENT") {
            config.open_food_facts.user_agent = agent;
        }
        if let Some(country) = lookup("OFF_COUNTRY") {
            let country = country.trim().to_lowercase();
            config.open_food_facts.country = (!country.is_empty()).then_some(country);
        }

        let ttl_hours = parse_number(
            get("CACHE_TTL_HOURS"),
            "CACHE_TTL_HOURS",
            config.cache.ttl_secs / 3600,
        );
        config.cache.ttl_secs = ttl_hours * 3600;
        config.cache.max_entries = parse_number(
            get("CACHE_MAX_ENTRIES"),
            "CACHE_MAX_ENTRIES",
            config.cache.max_entries,
        );

        config
    }
}

/// Split a comma separated model list, dropping blanks
pub fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T>(value: Option<String>, key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    match value {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key = key, value = %raw, "Ignoring unparseable configuration value");
            default
        }),
        None => default,
    }
}
