//! # Nutrition Lookup
//!
//! Nutrition data lookup for a meal logging backend. Queries the Open Food
//! Facts product database and a text generation provider concurrently,
//! caches and rate limits the results, and converts logged quantities into
//! servings.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod errors;
pub mod food_model;
pub mod llm;
pub mod meal_text;
pub mod rate_limiter;
pub mod serving_conversion;
pub mod sources;
pub mod units;

pub use aggregator::{AggregateResult, MultiSourceAggregator, SearchOptions, SourceResult, SourceStatus};
pub use errors::LookupError;
pub use food_model::{ConfidenceTag, FoodCandidate, Nutrients, SourceTag};
