//! # Serving Conversion Module
//!
//! Converts an entered quantity and unit into a number of servings of a food.
//! Mass and volume units convert exactly through their base unit; matching
//! count units divide directly. Anything else is estimated by the model
//! dispatcher when a provider is configured.
//!
//! ## Usage
//!
//! ```rust
//! use nutrition_lookup::serving_conversion::{try_convert, ConversionRequest};
//!
//! let request = ConversionRequest::new("Peanut butter", 16.0, "g", 48.0, "grams");
//! let result = try_convert(&request).unwrap();
//!
//! assert_eq!(result.servings, 3.0);
//! assert_eq!(result.unit, "g");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::LookupError;
use crate::llm::{dispatch_structured, ChatMessage, ModelDispatcher, ModelRequest};
use crate::units::{classify_unit, format_number, normalize_unit, to_base_unit, UnitKind, SERVING_UNIT};

const NO_PROVIDER_MESSAGE: &str =
    "Unable to convert units without AI enabled. Use the serving unit instead.";

const CONVERSION_SYSTEM_PROMPT: &str = r#"You are a nutrition assistant. Convert a meal entry amount into number of servings.

Return ONLY a JSON object with:
{
  "Servings": float,
  "ConversionDetail": "concise explanation with assumptions, no em dashes"
}

Rules:
- Use metric where possible.
- If this is an estimate, start ConversionDetail with "AI estimate.".
- Include the serving size and the final servings in the detail.
- When converting between named units, include the assumed unit conversion."#;

const CONVERSION_FORMATTER: &str = "You are a formatter. Return ONLY a JSON object with the fields \
     \"Servings\" (number) and \"ConversionDetail\" (string). No extra text.";

const CONVERSION_TEMPERATURE: f64 = 0.2;
const CONVERSION_MAX_OUTPUT_TOKENS: u32 = 200;

/// An entered amount of a food with a known serving size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRequest {
    pub food_name: String,
    pub serving_quantity: f64,
    pub serving_unit: String,
    pub entry_quantity: f64,
    pub entry_unit: String,
}

impl ConversionRequest {
    pub fn new(
        food_name: &str,
        serving_quantity: f64,
        serving_unit: &str,
        entry_quantity: f64,
        entry_unit: &str,
    ) -> Self {
        Self {
            food_name: food_name.trim().to_string(),
            serving_quantity,
            serving_unit: serving_unit.to_string(),
            entry_quantity,
            entry_unit: entry_unit.to_string(),
        }
    }

    fn validate(&self) -> Result<(), LookupError> {
        if !self.serving_quantity.is_finite() || self.serving_quantity <= 0.0 {
            return Err(LookupError::InvalidInput(
                "Serving quantity must be greater than zero".to_string(),
            ));
        }
        if !self.entry_quantity.is_finite() || self.entry_quantity <= 0.0 {
            return Err(LookupError::InvalidInput(
                "Entry quantity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// How a conversion was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionMethod {
    /// Exact arithmetic on known unit factors
    Deterministic,
    /// Estimated by a language model
    ModelEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Number of servings, always greater than zero
    pub servings: f64,
    /// Explanation shown to the user; `None` when nothing was converted
    pub detail: Option<String>,
    /// Normalized entry unit
    pub unit: String,
    pub method: ConversionMethod,
}

/// Convert without any model help
///
/// Returns `None` when the units cannot be reconciled exactly: different
/// categories, different count units or an unknown unit.
pub fn try_convert(request: &ConversionRequest) -> Option<ConversionResult> {
    let entry_unit = normalize_unit(&request.entry_unit);
    let serving_unit = normalize_unit(&request.serving_unit);

    if entry_unit == SERVING_UNIT {
        return Some(ConversionResult {
            servings: request.entry_quantity,
            detail: None,
            unit: entry_unit,
            method: ConversionMethod::Deterministic,
        });
    }

    if !request.serving_quantity.is_finite() || request.serving_quantity <= 0.0 {
        return None;
    }

    if entry_unit == serving_unit {
        let servings = request.entry_quantity / request.serving_quantity;
        let detail = format!(
            "Converted {} {} against {} {} serving. Logged {} servings.",
            format_number(request.entry_quantity),
            entry_unit,
            format_number(request.serving_quantity),
            serving_unit,
            format_number(servings)
        );
        return Some(deterministic(servings, detail, entry_unit));
    }

    let entry_kind = classify_unit(&entry_unit);
    let serving_kind = classify_unit(&serving_unit);

    match (entry_kind, serving_kind) {
        (UnitKind::Mass, UnitKind::Mass) | (UnitKind::Volume, UnitKind::Volume) => {
            let (entry_base, base_unit) = to_base_unit(request.entry_quantity, &entry_unit);
            let (serving_base, _) = to_base_unit(request.serving_quantity, &serving_unit);
            let servings = entry_base / serving_base;
            let detail = format!(
                "Converted {} {} to {} {}. Serving size is {} {}. Logged {} servings.",
                format_number(request.entry_quantity),
                entry_unit,
                format_number(entry_base),
                base_unit,
                format_number(request.serving_quantity),
                serving_unit,
                format_number(servings)
            );
            Some(deterministic(servings, detail, entry_unit))
        }
        _ => None,
    }
}

fn deterministic(servings: f64, detail: String, unit: String) -> ConversionResult {
    ConversionResult {
        servings,
        detail: Some(detail),
        unit,
        method: ConversionMethod::Deterministic,
    }
}

/// Conversion with a model-assisted fallback
pub struct ConversionEngine {
    dispatcher: Option<Arc<ModelDispatcher>>,
}

impl ConversionEngine {
    pub fn new(dispatcher: Option<Arc<ModelDispatcher>>) -> Self {
        Self { dispatcher }
    }

    /// Engine that only performs exact conversions
    pub fn deterministic_only() -> Self {
        Self { dispatcher: None }
    }

    /// Convert an entry into servings
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for non-positive or non-finite quantities
    /// - `ConversionImpossible` when no exact conversion exists and the model
    ///   is unavailable or its answer is unusable
    /// - dispatcher errors such as `Timeout` or `ProviderRequest` unchanged
    pub async fn convert_to_servings(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, LookupError> {
        request.validate()?;

        if let Some(result) = try_convert(request) {
            debug!(
                food = %request.food_name,
                servings = result.servings,
                unit = %result.unit,
                "Converted entry deterministically"
            );
            return Ok(result);
        }

        let dispatcher = match &self.dispatcher {
            Some(dispatcher) if dispatcher.is_configured() => dispatcher,
            _ => return Err(LookupError::ConversionImpossible(NO_PROVIDER_MESSAGE.to_string())),
        };

        let user_prompt = format!(
            "Food: {}. Serving size: {} {}. Entry: {} {}. Convert to servings.",
            request.food_name,
            format_number(request.serving_quantity),
            request.serving_unit.trim(),
            format_number(request.entry_quantity),
            request.entry_unit.trim()
        );
        let model_request = ModelRequest::new(vec![
            ChatMessage::system(CONVERSION_SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ])
        .with_temperature(CONVERSION_TEMPERATURE)
        .with_max_output_tokens(CONVERSION_MAX_OUTPUT_TOKENS);

        let estimate = dispatch_structured(dispatcher, &model_request, CONVERSION_FORMATTER, parse_estimate)
            .await
            .map_err(|err| match err {
                LookupError::MalformedResponse(detail) => LookupError::ConversionImpossible(format!(
                    "Invalid AI conversion response: {detail}"
                )),
                other => other,
            })?;

        let (servings, detail) = estimate.value;
        info!(
            food = %request.food_name,
            servings = servings,
            model = %estimate.model_used,
            "Converted entry with model estimate"
        );

        Ok(ConversionResult {
            servings,
            detail: Some(detail),
            unit: normalize_unit(&request.entry_unit),
            method: ConversionMethod::ModelEstimate,
        })
    }
}

fn parse_estimate(value: Value) -> Result<(f64, String), LookupError> {
    let object = value
        .as_object()
        .ok_or_else(|| LookupError::MalformedResponse("expected a JSON object".to_string()))?;

    let servings = match object.get("Servings") {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| LookupError::MalformedResponse("Servings is missing or not a number".to_string()))?;

    if !servings.is_finite() || servings <= 0.0 {
        return Err(LookupError::MalformedResponse(format!(
            "Servings must be positive, got {servings}"
        )));
    }

    let detail = match object.get("ConversionDetail") {
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Null) | None => {
            return Err(LookupError::MalformedResponse(
                "ConversionDetail is missing".to_string(),
            ))
        }
        Some(other) => other.to_string(),
    };

    Ok((servings, detail))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::llm::transport::scripted::{chat_reply, ScriptedTransport};

    fn engine_with(transport: Arc<ScriptedTransport>) -> ConversionEngine {
        let config = ProviderConfig {
            api_key: Some("sk-test".to_string()),
            primary_model: "gpt-4o-mini".to_string(),
            fallback_models: Vec::new(),
            ..Default::default()
        };
        ConversionEngine::new(Some(Arc::new(ModelDispatcher::new(config, transport))))
    }

    #[test]
    fn test_same_unit_divides_exactly() {
        let result = try_convert(&ConversionRequest::new("Peanut butter", 16.0, "g", 48.0, "g")).unwrap();
        assert_eq!(result.servings, 3.0);
        assert_eq!(
            result.detail.as_deref(),
            Some("Converted 48 g against 16 g serving. Logged 3 servings.")
        );
    }

    #[test]
    fn test_mass_conversion_through_base_unit() {
        let result = try_convert(&ConversionRequest::new("Rice", 100.0, "g", 0.5, "kg")).unwrap();
        assert_eq!(result.servings, 5.0);
        assert_eq!(result.unit, "kg");
        assert_eq!(
            result.detail.as_deref(),
            Some("Converted 0.5 kg to 500 g. Serving size is 100 g. Logged 5 servings.")
        );
    }

    #[test]
    fn test_volume_conversion() {
        let result = try_convert(&ConversionRequest::new("Olive oil", 15.0, "mL", 2.0, "tablespoons")).unwrap();
        assert_eq!(result.servings, 2.0);
        assert_eq!(result.unit, "tbsp");
    }

    #[test]
    fn test_serving_entry_passes_through() {
        let result = try_convert(&ConversionRequest::new("Lasagne", 350.0, "g", 1.5, "")).unwrap();
        assert_eq!(result.servings, 1.5);
        assert_eq!(result.detail, None);
        assert_eq!(result.unit, "serving");
    }

    #[test]
    fn test_matching_count_units() {
        let result = try_convert(&ConversionRequest::new("Crackers", 2.0, "biscuits", 6.0, "biscuit")).unwrap();
        assert_eq!(result.servings, 3.0);
    }

    #[test]
    fn test_mismatched_categories_are_indeterminate() {
        assert!(try_convert(&ConversionRequest::new("Apple", 1.0, "piece", 1.0, "cup")).is_none());
        assert!(try_convert(&ConversionRequest::new("Egg", 1.0, "egg", 2.0, "slice")).is_none());
        assert!(try_convert(&ConversionRequest::new("Milk", 250.0, "mL", 100.0, "g")).is_none());
        assert!(try_convert(&ConversionRequest::new("Garlic", 1.0, "clove", 2.0, "g")).is_none());
    }

    #[tokio::test]
    async fn test_invalid_quantities_rejected() {
        let engine = ConversionEngine::deterministic_only();

        let zero_serving = ConversionRequest::new("Oats", 0.0, "g", 40.0, "g");
        assert!(matches!(
            engine.convert_to_servings(&zero_serving).await,
            Err(LookupError::InvalidInput(_))
        ));

        let negative_entry = ConversionRequest::new("Oats", 40.0, "g", -1.0, "g");
        assert!(matches!(
            engine.convert_to_servings(&negative_entry).await,
            Err(LookupError::InvalidInput(_))
        ));

        let nan_entry = ConversionRequest::new("Oats", 40.0, "g", f64::NAN, "g");
        assert!(matches!(
            engine.convert_to_servings(&nan_entry).await,
            Err(LookupError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_no_provider_gives_guidance() {
        let engine = ConversionEngine::deterministic_only();
        let request = ConversionRequest::new("Apple", 1.0, "piece", 1.0, "cup");

        let err = engine.convert_to_servings(&request).await.unwrap_err();

        match err {
            LookupError::ConversionImpossible(message) => {
                assert!(message.contains("Use the serving unit instead"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deterministic_path_makes_no_model_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let engine = engine_with(transport.clone());

        let result = engine
            .convert_to_servings(&ConversionRequest::new("Peanut butter", 16.0, "g", 48.0, "g"))
            .await
            .unwrap();

        assert_eq!(result.servings, 3.0);
        assert_eq!(result.method, ConversionMethod::Deterministic);
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_model_estimate() {
        let transport = Arc::new(ScriptedTransport::new(vec![chat_reply(
            "gpt-4o-mini",
            "```json\n{\"Servings\": \"1.2\", \"ConversionDetail\": \" AI estimate. One cup of diced apple is about 1.2 apples. \"}\n```",
        )]));
        let engine = engine_with(transport.clone());

        let result = engine
            .convert_to_servings(&ConversionRequest::new("Apple", 1.0, "piece", 1.0, "cups"))
            .await
            .unwrap();

        assert_eq!(result.servings, 1.2);
        assert_eq!(result.unit, "cup");
        assert_eq!(result.method, ConversionMethod::ModelEstimate);
        assert_eq!(
            result.detail.as_deref(),
            Some("AI estimate. One cup of diced apple is about 1.2 apples.")
        );

        let payload = transport.payload(0);
        assert_eq!(payload["temperature"], 0.2);
        assert_eq!(payload["max_tokens"], 200);
        assert_eq!(
            payload["messages"][1]["content"],
            "Food: Apple. Serving size: 1 piece. Entry: 1 cups. Convert to servings."
        );
    }

    #[tokio::test]
    async fn test_unusable_estimate_is_conversion_impossible() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            chat_reply("gpt-4o-mini", "{\"Servings\": 0, \"ConversionDetail\": \"none\"}"),
            chat_reply("gpt-4o-mini", "{\"Servings\": -2, \"ConversionDetail\": \"none\"}"),
        ]));
        let engine = engine_with(transport.clone());

        let err = engine
            .convert_to_servings(&ConversionRequest::new("Apple", 1.0, "piece", 1.0, "cup"))
            .await
            .unwrap_err();

        assert!(matches!(err, LookupError::ConversionImpossible(_)));
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn test_parse_estimate_requires_detail() {
        let missing = serde_json::json!({"Servings": 2});
        assert!(parse_estimate(missing).is_err());

        let numeric_detail = serde_json::json!({"Servings": 2, "ConversionDetail": 5});
        assert_eq!(parse_estimate(numeric_detail).unwrap(), (2.0, "5".to_string()));
    }
}
