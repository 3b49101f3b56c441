//! # Meal Text Module
//!
//! Turns a free text meal entry ("two slices of toast and half a cup of
//! milk") into structured items through the model dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::LookupError;
use crate::llm::{dispatch_structured_with_limit, ChatMessage, ModelDispatcher, ModelRequest};
use crate::sources::json_number;
use crate::units::{normalize_unit, SERVING_UNIT};

/// Units a parsed item may carry
pub const ALLOWED_UNITS: &[&str] = &[
    "serving", "g", "kg", "oz", "lb", "mL", "L", "tsp", "tbsp", "cup", "piece", "slice", "biscuit",
    "handful",
];

const MAX_KNOWN_FOODS: usize = 200;

const MEAL_SYSTEM_PROMPT: &str = r#"You are a nutrition assistant. Parse a free text meal entry into structured items.

Return ONLY a JSON array of objects with:
[
  {
    "FoodName": "string",
    "Quantity": float,
    "Unit": "serving|g|kg|oz|lb|mL|L|tsp|tbsp|cup|piece|slice|biscuit|handful"
  }
]

Rules:
- Convert fractions to decimals (half to 0.5).
- If quantity is missing, use 1.
- Prefer metric units (g or mL) when possible.
- Use "serving" ONLY for named menu items or combo meals and include size in FoodName.
- Do not include extra text. Do not include markdown."#;

const MEAL_FORMATTER: &str = "Return ONLY the JSON array of items. No extra text.";

const MEAL_TEMPERATURE: f64 = 0.2;
const MEAL_MAX_OUTPUT_TOKENS: u32 = 500;
const MEAL_FORMATTER_MAX_OUTPUT_TOKENS: u32 = 300;

/// One food of a parsed meal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MealItem {
    pub food_name: String,
    pub quantity: f64,
    pub unit: String,
}

pub struct MealTextParser {
    dispatcher: Arc<ModelDispatcher>,
}

impl MealTextParser {
    pub fn new(dispatcher: Arc<ModelDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Parse `text` into meal items, preferring names from `known_foods`
    ///
    /// # Errors
    ///
    /// - `InvalidInput` when `text` is blank
    /// - `Configuration` when no provider key is set
    /// - `MalformedResponse` when the model returns no usable item
    pub async fn parse(&self, text: &str, known_foods: &[String]) -> Result<Vec<MealItem>, LookupError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LookupError::InvalidInput("Meal text is required.".to_string()));
        }
        if !self.dispatcher.is_configured() {
            return Err(LookupError::Configuration(
                "OpenAI API key not configured.".to_string(),
            ));
        }

        let request = ModelRequest::new(vec![
            ChatMessage::system(system_prompt(known_foods)),
            ChatMessage::user(format!("Parse this meal entry:\n{text}")),
        ])
        .with_temperature(MEAL_TEMPERATURE)
        .with_max_output_tokens(MEAL_MAX_OUTPUT_TOKENS);

        let parsed = dispatch_structured_with_limit(
            &self.dispatcher,
            &request,
            MEAL_FORMATTER,
            MEAL_FORMATTER_MAX_OUTPUT_TOKENS,
            expect_array,
        )
        .await?;

        let items: Vec<MealItem> = parsed.value.iter().filter_map(clean_item).collect();
        if items.is_empty() {
            return Err(LookupError::MalformedResponse(
                "No items parsed from AI response.".to_string(),
            ));
        }

        info!(items = items.len(), model = %parsed.model_used, "Parsed meal text");
        Ok(items)
    }
}

fn system_prompt(known_foods: &[String]) -> String {
    let known: Vec<&str> = known_foods
        .iter()
        .map(|food| food.trim())
        .filter(|food| !food.is_empty())
        .take(MAX_KNOWN_FOODS)
        .collect();

    if known.is_empty() {
        return MEAL_SYSTEM_PROMPT.to_string();
    }

    let list = known
        .iter()
        .map(|food| format!("- {food}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{MEAL_SYSTEM_PROMPT}\n\nKnown foods to prefer when matching names:\n{list}")
}

fn expect_array(value: Value) -> Result<Vec<Value>, LookupError> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(LookupError::MalformedResponse(
            "expected a JSON array of items".to_string(),
        )),
    }
}

fn clean_item(item: &Value) -> Option<MealItem> {
    let name = match item.get("FoodName")? {
        Value::String(text) => text.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if name.is_empty() {
        debug!("Dropping meal item without a name");
        return None;
    }

    let quantity = json_number(item.get("Quantity")).unwrap_or(1.0);
    if quantity <= 0.0 {
        debug!(food = %name, quantity = quantity, "Dropping meal item with non-positive quantity");
        return None;
    }

    let raw_unit = item.get("Unit").and_then(Value::as_str).unwrap_or(SERVING_UNIT);
    let normalized = normalize_unit(raw_unit);
    let unit = if ALLOWED_UNITS.contains(&normalized.as_str()) {
        normalized
    } else {
        SERVING_UNIT.to_string()
    };

    Some(MealItem {
        food_name: name,
        quantity,
        unit,
    })
}
