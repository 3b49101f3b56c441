//! # Model-backed Food Lookup
//!
//! Nutrition estimates from the text generation provider: by name, by name
//! with several size options, from a photo, and from a barcode. Every call
//! goes through the dispatcher's structured-output recovery.
//!
//! Estimates never invent values: a nutrient the model leaves out or sets to
//! null stays absent on the candidate.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::ImageFormat;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};

use super::{json_number, json_text, FoodSource, SourceOperation};
use crate::errors::LookupError;
use crate::food_model::{ConfidenceTag, FoodCandidate, Nutrients, SourceMetadata, SourceTag};
use crate::llm::{
    dispatch_structured, dispatch_structured_with_limit, ChatMessage, ContentPart, ModelDispatcher,
    ModelRequest,
};
use crate::rate_limiter::RateClass;
use crate::units::{normalize_unit, SERVING_UNIT};

/// Largest image accepted for vision lookups
pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

/// Upper bound on name suggestions per call
pub const MAX_SUGGESTIONS: usize = 5;

const MAX_SIZE_OPTIONS: usize = 3;

static COMPACT_SERVING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+\.?\d*)\s*([a-zA-Z]+)$").expect("Compact serving pattern should be valid")
});

const FIELD_LIST: &str = r#""FoodName": "standardized food name",
  "ServingQuantity": 1.0,
  "ServingUnit": "unit (e.g., g, mL, cup, slice, piece)",
  "CaloriesPerServing": integer,
  "ProteinPerServing": float (grams),
  "FibrePerServing": float (grams) or null,
  "CarbsPerServing": float (grams) or null,
  "FatPerServing": float (grams) or null,
  "SaturatedFatPerServing": float (grams) or null,
  "SugarPerServing": float (grams) or null,
  "SodiumPerServing": float (mg) or null,
  "Confidence": "High" or "Medium" or "Low""#;

const SERVING_RULES: &str = r#"Serving size rules:
- Prefer measurable units when possible: use grams (g) for solids and milliliters (mL) for liquids.
- Avoid vague units like "serving" for basics such as milk, yogurt, rice, cereal, or vegetables.
- Use "serving" ONLY for named menu items or combo meals, and include the size in FoodName (e.g., "Large Tropical Whopper Meal").
- For discrete items, use clear units like piece, slice, egg, can, bar."#;

const TEXT_FORMATTER: &str =
    "You are a formatter. Return ONLY a JSON object with the required fields. No extra text.";
const OPTIONS_FORMATTER: &str =
    "You are a formatter. Return ONLY a JSON array of 1-3 objects with the required fields. No extra text.";
const IMAGE_FORMATTER: &str =
    "You are a formatter. Return ONLY a JSON array of objects with the required fields. No extra text.";
const BARCODE_FORMATTER: &str =
    "You are a formatter. Return ONLY a JSON object with the required fields, or null. No extra text.";
const SUGGESTION_FORMATTER: &str =
    "You are a formatter. Return ONLY a JSON array of strings. No extra text.";

const SUGGESTION_PROMPT: &str = r#"You are a food search assistant specialising in Australian foods and brands.

Input will be a single, messy line describing ONE meal/order (combined), possibly with typos and informal wording.

Task:
- Infer the best matching Australian food entry for the entire line as one combined order (do not split into individual ingredients/items).
- Prefer Australian brands and menus (eg Hungry Jack's AU, Macca's AU, KFC AU, Sanitarium, Arnott's).
- Be robust to spelling mistakes.
- Preserve key qualifiers when present (eg Large/Medium/Small, lite/skim, flavour, meal/combo, shake, sundae).
- Do not invent specific products. If an exact branded match is unclear, return a generic combined description that is still plausible in Australia.

Output:
Return ONLY a JSON array of strings, ordered by relevance, max 5.
- If size is specified, return exactly 1 suggestion reflecting that size.
- If size is NOT specified and size variants commonly exist, return 2-3 suggestions varying only by size (eg Small/Medium/Large), keeping all other details the same.
No explanations. No extra fields."#;

fn text_prompt() -> String {
    format!(
        "You are a nutrition database assistant. When given a food name, return accurate \
         nutritional information in JSON format.\n\n\
         Return ONLY a JSON object with these exact fields:\n{{\n  {FIELD_LIST}\n}}\n\n\
         {SERVING_RULES}\n\n\
         Use standard serving sizes. Be precise with nutritional values based on USDA or \
         Australian food databases."
    )
}

fn options_prompt() -> String {
    format!(
        "You are a nutrition database assistant. When given a food name, return multiple size \
         options in JSON format.\n\n\
         Return ONLY a JSON array of 1 to 3 objects with these exact fields:\n[\n  {{\n  {FIELD_LIST}\n  }}\n]\n\n\
         {SERVING_RULES}\n\n\
         When size variants exist for menu items or branded meals, include small, medium, and \
         large entries. Otherwise return the most common measurable serving sizes."
    )
}

fn image_prompt() -> String {
    format!(
        "You are a nutrition assistant that analyzes food images. Identify all visible \
         foods/ingredients and estimate their quantities and nutritional values.\n\n\
         Return ONLY a JSON array of objects with these exact fields:\n[\n  {{\n  {FIELD_LIST}\n  }}\n]\n\n\
         {SERVING_RULES}\n\n\
         Provide reasonable estimates based on portion size visible in the image."
    )
}

fn barcode_prompt() -> String {
    format!(
        "You are a nutrition database assistant. When given a product barcode (EAN or UPC), \
         identify the packaged product and return its nutritional information per serving.\n\n\
         Return ONLY a JSON object with these exact fields:\n{{\n  {FIELD_LIST}\n}}\n\n\
         {SERVING_RULES}\n\n\
         If you do not recognise the barcode, return null. Do not guess a product."
    )
}

/// Canonicalize a model supplied serving
///
/// A quantity of exactly 1 with a compact unit such as `"30g"` becomes
/// `(30, "g")`. Blank units mean one serving; `portion(s)` is a serving;
/// other units go through the shared unit normalization.
///
/// ```rust
/// use nutrition_lookup::sources::normalize_serving_size;
///
/// assert_eq!(normalize_serving_size(1.0, "30g"), (30.0, "g".to_string()));
/// assert_eq!(normalize_serving_size(2.0, "Portions"), (2.0, "serving".to_string()));
/// assert_eq!(normalize_serving_size(1.0, ""), (1.0, "serving".to_string()));
/// ```
pub fn normalize_serving_size(quantity: f64, unit: &str) -> (f64, String) {
    let mut quantity = quantity;
    let mut unit = unit.trim().to_string();
    if unit.is_empty() {
        return (quantity, SERVING_UNIT.to_string());
    }

    if quantity == 1.0 {
        if let Some(captures) = COMPACT_SERVING.captures(&unit) {
            if let Ok(parsed) = captures[1].parse::<f64>() {
                quantity = parsed;
                unit = captures[2].to_string();
            }
        }
    }

    match unit.to_lowercase().as_str() {
        "portion" | "portions" => (quantity, SERVING_UNIT.to_string()),
        _ => (quantity, normalize_unit(&unit)),
    }
}

/// Build a candidate from one model item
fn candidate_from_item(
    item: &Value,
    fallback_name: &str,
    source: SourceTag,
    model: &str,
) -> Option<FoodCandidate> {
    let object = item.as_object()?;

    let name = json_text(object.get("FoodName")).unwrap_or_else(|| fallback_name.trim().to_string());
    let raw_quantity = json_number(object.get("ServingQuantity"))
        .filter(|q| *q > 0.0)
        .unwrap_or(1.0);
    let raw_unit = json_text(object.get("ServingUnit")).unwrap_or_default();
    let (quantity, unit) = normalize_serving_size(raw_quantity, &raw_unit);

    let nutrients = Nutrients {
        calories: json_number(object.get("CaloriesPerServing")).map(f64::round),
        protein: json_number(object.get("ProteinPerServing")),
        fat: json_number(object.get("FatPerServing")),
        saturated_fat: json_number(object.get("SaturatedFatPerServing")),
        carbohydrate: json_number(object.get("CarbsPerServing")),
        sugar: json_number(object.get("SugarPerServing")),
        fibre: json_number(object.get("FibrePerServing")),
        sodium: json_number(object.get("SodiumPerServing")),
    };

    let confidence = json_text(object.get("Confidence"))
        .map(|raw| ConfidenceTag::parse(&raw))
        .unwrap_or_default();

    Some(
        FoodCandidate::new(&name, quantity, &unit, source)
            .with_nutrients(nutrients)
            .with_confidence(confidence)
            .with_metadata(SourceMetadata {
                model: Some(model.to_string()),
                ..Default::default()
            }),
    )
}

/// Items of a JSON array, or a lone object treated as a single item
fn items_of(value: &Value) -> Result<Vec<&Value>, LookupError> {
    match value {
        Value::Array(items) => Ok(items.iter().filter(|item| item.is_object()).collect()),
        Value::Object(_) => Ok(vec![value]),
        _ => Err(LookupError::MalformedResponse(
            "expected a JSON object or array".to_string(),
        )),
    }
}

/// Nutrition estimates from the model dispatcher
pub struct ModelFoodLookup {
    dispatcher: Arc<ModelDispatcher>,
}

impl ModelFoodLookup {
    pub fn new(dispatcher: Arc<ModelDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Whether a provider is configured
    pub fn is_available(&self) -> bool {
        self.dispatcher.is_configured()
    }

    fn ensure_configured(&self) -> Result<(), LookupError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(LookupError::Configuration("OpenAI API key not configured".to_string()))
        }
    }

    fn require_query(query: &str) -> Result<&str, LookupError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(LookupError::InvalidInput("Query must not be empty".to_string()));
        }
        Ok(query)
    }

    /// Single best match for a food name
    pub async fn lookup_by_text(&self, query: &str) -> Result<FoodCandidate, LookupError> {
        self.ensure_configured()?;
        let query = Self::require_query(query)?;

        let request = ModelRequest::new(vec![
            ChatMessage::system(text_prompt()),
            ChatMessage::user(format!("Look up nutritional information for: {query}")),
        ])
        .with_temperature(0.3)
        .with_max_output_tokens(500);

        let response = dispatch_structured(&self.dispatcher, &request, TEXT_FORMATTER, |value| {
            items_of(&value)?
                .first()
                .map(|item| (*item).clone())
                .ok_or_else(|| LookupError::MalformedResponse("No results returned".to_string()))
        })
        .await?;

        let candidate = candidate_from_item(&response.value, query, SourceTag::ModelText, &response.model_used)
            .ok_or_else(|| LookupError::MalformedResponse("expected a JSON object".to_string()))?;

        info!(query = %query, model = %response.model_used, "Model text lookup completed");
        Ok(candidate)
    }

    /// One to three serving size options for a food name
    pub async fn lookup_by_text_options(&self, query: &str) -> Result<Vec<FoodCandidate>, LookupError> {
        self.ensure_configured()?;
        let query = Self::require_query(query)?;

        let request = ModelRequest::new(vec![
            ChatMessage::system(options_prompt()),
            ChatMessage::user(format!("Look up nutritional information for: {query}")),
        ])
        .with_temperature(0.3)
        .with_max_output_tokens(700);

        let response = dispatch_structured(&self.dispatcher, &request, OPTIONS_FORMATTER, |value| {
            let items: Vec<Value> = items_of(&value)?.into_iter().cloned().collect();
            if items.is_empty() {
                return Err(LookupError::MalformedResponse("No results returned".to_string()));
            }
            Ok(items)
        })
        .await?;

        let candidates: Vec<FoodCandidate> = response
            .value
            .iter()
            .filter_map(|item| candidate_from_item(item, query, SourceTag::ModelText, &response.model_used))
            .take(MAX_SIZE_OPTIONS)
            .collect();

        info!(
            query = %query,
            model = %response.model_used,
            options = candidates.len(),
            "Model option lookup completed"
        );
        Ok(candidates)
    }

    /// Foods visible in a base64 encoded image
    pub async fn lookup_by_image(&self, image_base64: &str) -> Result<Vec<FoodCandidate>, LookupError> {
        let encoded = image_base64.trim();
        let encoded = encoded
            .split_once(";base64,")
            .map_or(encoded, |(_, data)| data);
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| LookupError::InvalidInput(format!("Image is not valid base64: {e}")))?;
        self.lookup_by_image_bytes(&bytes).await
    }

    /// Foods visible in an image file
    pub async fn lookup_by_image_file(&self, path: &Path) -> Result<Vec<FoodCandidate>, LookupError> {
        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            LookupError::InvalidInput(format!("Cannot read image {}: {e}", path.display()))
        })?;
        if metadata.len() > MAX_IMAGE_BYTES {
            return Err(LookupError::InvalidInput(format!(
                "Image is {} bytes, the limit is {MAX_IMAGE_BYTES}",
                metadata.len()
            )));
        }
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            LookupError::InvalidInput(format!("Cannot read image {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), bytes = bytes.len(), "Read image for vision lookup");
        self.lookup_by_image_bytes(&bytes).await
    }

    async fn lookup_by_image_bytes(&self, bytes: &[u8]) -> Result<Vec<FoodCandidate>, LookupError> {
        self.ensure_configured()?;
        let mime = image_mime_type(bytes)?;

        let data_url = format!("data:{mime};base64,{}", BASE64.encode(bytes));
        let vision_model = self.dispatcher.config().vision_model.clone();
        let request = ModelRequest::new(vec![ChatMessage::user_parts(vec![
            ContentPart::Text(image_prompt()),
            ContentPart::ImageUrl(data_url),
        ])])
        .with_models(vec![vision_model])
        .with_temperature(0.3)
        .with_max_output_tokens(1000);

        let response = dispatch_structured(&self.dispatcher, &request, IMAGE_FORMATTER, |value| {
            Ok(items_of(&value)?.into_iter().cloned().collect::<Vec<Value>>())
        })
        .await?;

        let candidates: Vec<FoodCandidate> = response
            .value
            .iter()
            .filter_map(|item| {
                candidate_from_item(item, "Unknown Food", SourceTag::ModelVision, &response.model_used)
            })
            .collect();

        info!(
            model = %response.model_used,
            mime = mime,
            items = candidates.len(),
            "Model image lookup completed"
        );
        Ok(candidates)
    }

    /// Product estimate for a barcode; `None` when the model does not know it
    pub async fn lookup_by_code(&self, barcode: &str) -> Result<Option<FoodCandidate>, LookupError> {
        self.ensure_configured()?;
        let barcode = barcode.trim();
        if barcode.is_empty() || !barcode.chars().all(|c| c.is_ascii_digit()) {
            return Err(LookupError::InvalidInput(format!("Invalid barcode: {barcode:?}")));
        }

        let request = ModelRequest::new(vec![
            ChatMessage::system(barcode_prompt()),
            ChatMessage::user(format!("Barcode: {barcode}")),
        ])
        .with_temperature(0.2)
        .with_max_output_tokens(500);

        let response = dispatch_structured(&self.dispatcher, &request, BARCODE_FORMATTER, |value| {
            match value {
                Value::Null => Ok(None),
                Value::Array(items) if items.is_empty() => Ok(None),
                Value::Object(ref fields) if fields.is_empty() => Ok(None),
                other => Ok(items_of(&other)?.first().map(|item| (*item).clone())),
            }
        })
        .await?;

        let Some(item) = response.value else {
            info!(barcode = %barcode, "Model did not recognise barcode");
            return Ok(None);
        };

        let name = format!("Product {barcode}");
        Ok(
            candidate_from_item(&item, &name, SourceTag::ModelBarcode, &response.model_used).map(
                |mut candidate| {
                    candidate.metadata.barcode = Some(barcode.to_string());
                    candidate
                },
            ),
        )
    }

    /// Food name suggestions for a partial query
    ///
    /// Never fails: a missing provider, a short query or any model error
    /// yields an empty list.
    pub async fn suggest(&self, query: &str, limit: usize) -> Vec<String> {
        let query = query.trim();
        let limit = limit.min(MAX_SUGGESTIONS);
        if !self.is_available() || query.chars().count() < 2 || limit == 0 {
            return Vec::new();
        }

        let request = ModelRequest::new(vec![
            ChatMessage::system(SUGGESTION_PROMPT),
            ChatMessage::user(query),
        ])
        .with_temperature(0.4)
        .with_max_output_tokens(200);

        let preferred = self.dispatcher.config().autosuggest_model.clone();
        let first_attempt = match &preferred {
            Some(model) => request.clone().with_models(vec![model.clone()]),
            None => request.clone(),
        };

        let result = match self.suggestions_from(&first_attempt).await {
            Err(err) if preferred.is_some() && !matches!(err, LookupError::MalformedResponse(_)) => {
                warn!(error = %err, "Autosuggest model failed, using default models");
                self.suggestions_from(&request).await
            }
            other => other,
        };

        match result {
            Ok(suggestions) => suggestions.into_iter().take(limit).collect(),
            Err(err) => {
                warn!(query = %query, error = %err, "Food suggestions unavailable");
                Vec::new()
            }
        }
    }

    async fn suggestions_from(&self, request: &ModelRequest) -> Result<Vec<String>, LookupError> {
        let response = dispatch_structured_with_limit(
            &self.dispatcher,
            request,
            SUGGESTION_FORMATTER,
            200,
            parse_suggestions,
        )
        .await?;
        Ok(response.value)
    }
}

fn parse_suggestions(value: Value) -> Result<Vec<String>, LookupError> {
    let Value::Array(items) = value else {
        return Err(LookupError::MalformedResponse("expected a JSON array of strings".to_string()));
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect())
}

/// MIME type of a supported image, detected from its content
fn image_mime_type(bytes: &[u8]) -> Result<&'static str, LookupError> {
    if bytes.is_empty() {
        return Err(LookupError::InvalidInput("Image is empty".to_string()));
    }
    if bytes.len() as u64 > MAX_IMAGE_BYTES {
        return Err(LookupError::InvalidInput(format!(
            "Image is {} bytes, the limit is {MAX_IMAGE_BYTES}",
            bytes.len()
        )));
    }

    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("image/png"),
        Ok(ImageFormat::Jpeg) => Ok("image/jpeg"),
        Ok(ImageFormat::WebP) => Ok("image/webp"),
        Ok(ImageFormat::Gif) => Ok("image/gif"),
        Ok(format) => Err(LookupError::InvalidInput(format!(
            "Unsupported image format: {format:?}"
        ))),
        Err(e) => Err(LookupError::InvalidInput(format!(
            "Could not determine image format: {e}"
        ))),
    }
}

/// Aggregator source backed by `lookup_by_text_options`
pub struct ModelTextSource {
    lookup: Arc<ModelFoodLookup>,
}

impl ModelTextSource {
    pub fn new(lookup: Arc<ModelFoodLookup>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl FoodSource for ModelTextSource {
    fn name(&self) -> &'static str {
        SourceTag::ModelText.as_str()
    }

    fn tag(&self) -> SourceTag {
        SourceTag::ModelText
    }

    fn rate_class(&self, _operation: SourceOperation) -> Option<RateClass> {
        None
    }

    async fn search(&self, query: &str, page_size: usize) -> Result<Vec<FoodCandidate>, LookupError> {
        let mut candidates = self.lookup.lookup_by_text_options(query).await?;
        candidates.truncate(page_size);
        Ok(candidates)
    }
}
