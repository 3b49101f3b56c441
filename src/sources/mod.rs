//! Data sources the aggregator can fan out to.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::LookupError;
use crate::food_model::{FoodCandidate, SourceTag};
use crate::rate_limiter::RateClass;

pub mod model_lookup;
pub mod openfoodfacts;

pub use model_lookup::{normalize_serving_size, ModelFoodLookup, ModelTextSource};
pub use openfoodfacts::{parse_product, OpenFoodFactsClient};

/// Kind of call made against a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOperation {
    Search,
    Code,
}

/// A food data source
///
/// Implementations report failures as `LookupError`; the aggregator decides
/// whether a failure is transient and keeps the other sources running.
#[async_trait]
pub trait FoodSource: Send + Sync {
    /// Stable identifier used in aggregate results and logs
    fn name(&self) -> &'static str;

    fn tag(&self) -> SourceTag;

    /// Rate window the aggregator must acquire before `operation`
    fn rate_class(&self, operation: SourceOperation) -> Option<RateClass>;

    async fn search(&self, query: &str, page_size: usize) -> Result<Vec<FoodCandidate>, LookupError>;

    /// Whether `get_by_code` is backed by real product data
    fn supports_code(&self) -> bool {
        false
    }

    async fn get_by_code(&self, _code: &str) -> Result<Option<FoodCandidate>, LookupError> {
        Ok(None)
    }
}

/// Number from a JSON number or numeric string
pub(crate) fn json_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

/// Trimmed, non-empty string value
pub(crate) fn json_text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_number() {
        assert_eq!(json_number(Some(&json!(12.5))), Some(12.5));
        assert_eq!(json_number(Some(&json!(" 7 "))), Some(7.0));
        assert_eq!(json_number(Some(&json!("seven"))), None);
        assert_eq!(json_number(Some(&json!(null))), None);
        assert_eq!(json_number(None), None);
    }

    #[test]
    fn test_json_text() {
        assert_eq!(json_text(Some(&json!("  Bega "))), Some("Bega".to_string()));
        assert_eq!(json_text(Some(&json!("   "))), None);
        assert_eq!(json_text(Some(&json!(3))), None);
    }
}
