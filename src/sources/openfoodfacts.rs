//! # Open Food Facts Client
//!
//! Keyword search and barcode lookup against the public Open Food Facts
//! database. Nutrients arrive per 100 g/mL and are scaled to the declared
//! serving; anything the product does not report stays absent.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

use super::{json_number, json_text, FoodSource, SourceOperation};
use crate::config::OpenFoodFactsConfig;
use crate::errors::LookupError;
use crate::food_model::{ConfidenceTag, FoodCandidate, Nutrients, SourceMetadata, SourceTag};
use crate::rate_limiter::RateClass;
use crate::units::{format_number, normalize_unit};

pub const SERVICE_NAME: &str = "Open Food Facts";

const SEARCH_FIELDS: &str =
    "code,product_name,brands,image_url,nutriments,serving_size,serving_quantity,serving_quantity_unit,countries_tags";

/// Nutriment keys per 100 g/mL, with the name used in metadata
const NUTRIMENT_KEYS: &[(&str, &str)] = &[
    ("energy-kcal_100g", "calories"),
    ("proteins_100g", "protein"),
    ("fat_100g", "fat"),
    ("saturated-fat_100g", "saturated_fat"),
    ("carbohydrates_100g", "carbohydrate"),
    ("sugars_100g", "sugar"),
    ("fiber_100g", "fibre"),
    ("sodium_100g", "sodium"),
];

pub struct OpenFoodFactsClient {
    client: reqwest::Client,
    config: OpenFoodFactsConfig,
}

impl OpenFoodFactsClient {
    pub fn new(config: OpenFoodFactsConfig) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LookupError::Configuration(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    /// Keyword search returning at most `page_size` usable products
    ///
    /// Twice as many products are requested because entries without a name
    /// are dropped.
    pub async fn search_products(
        &self,
        query: &str,
        page_size: usize,
    ) -> Result<Vec<FoodCandidate>, LookupError> {
        let url = format!("{}/cgi/search.pl", self.base_url());
        let mut params: Vec<(&str, String)> = vec![
            ("search_terms", query.to_string()),
            ("search_simple", "1".to_string()),
            ("action", "process".to_string()),
            ("json", "1".to_string()),
            ("page_size", (page_size * 2).to_string()),
        ];
        if let Some(country) = &self.config.country {
            params.push(("tagtype_0", "countries".to_string()));
            params.push(("tag_contains_0", "contains".to_string()));
            params.push(("tag_0", country.clone()));
        }
        params.push(("fields", SEARCH_FIELDS.to_string()));

        debug!(query = %query, page_size = page_size, "Searching Open Food Facts");
        let response = self.client.get(&url).query(&params).send().await?;
        let data = read_json(response).await?;

        let products = data
            .get("products")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let candidates: Vec<FoodCandidate> = products
            .iter()
            .filter_map(|product| parse_product(product, self.base_url()))
            .take(page_size)
            .collect();

        info!(
            query = %query,
            returned = products.len(),
            usable = candidates.len(),
            "Open Food Facts search completed"
        );
        Ok(candidates)
    }

    /// Product lookup by barcode; `None` when the database does not know it
    pub async fn get_product(&self, barcode: &str) -> Result<Option<FoodCandidate>, LookupError> {
        let url = format!("{}/api/v2/product/{}.json", self.base_url(), barcode);

        debug!(barcode = %barcode, "Fetching Open Food Facts product");
        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let data = read_json(response).await?;

        if data.get("status").and_then(Value::as_i64) != Some(1) {
            return Ok(None);
        }

        Ok(data
            .get("product")
            .and_then(|product| parse_product(product, self.base_url())))
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, LookupError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(LookupError::UpstreamStatus {
            service: SERVICE_NAME.to_string(),
            status: status.as_u16(),
            detail: body.trim().chars().take(200).collect(),
        });
    }
    serde_json::from_str(&body)
        .map_err(|e| LookupError::upstream(SERVICE_NAME, format!("invalid JSON payload: {e}")))
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Convert a raw product record into a per-serving candidate
///
/// Returns `None` for products without a name. `base_url` is used to build
/// the product page link.
pub fn parse_product(product: &Value, base_url: &str) -> Option<FoodCandidate> {
    let product_name = json_text(product.get("product_name"))?;
    let brands = json_text(product.get("brands"));
    let barcode = match product.get("code") {
        Some(Value::String(code)) if !code.trim().is_empty() => Some(code.trim().to_string()),
        Some(Value::Number(code)) => Some(code.to_string()),
        _ => None,
    };

    let name = match &brands {
        Some(brands) => format!("{brands} {product_name}"),
        None => product_name,
    };

    let serving_quantity = json_number(product.get("serving_quantity")).filter(|q| *q > 0.0);
    let serving_unit = json_text(product.get("serving_quantity_unit"))
        .map(|unit| normalize_unit(&unit))
        .unwrap_or_else(|| "g".to_string());
    let multiplier = serving_quantity.map_or(1.0, |q| q / 100.0);

    let nutriments = product.get("nutriments");
    let mut per_100 = BTreeMap::new();
    for (key, label) in NUTRIMENT_KEYS {
        if let Some(value) = json_number(nutriments.and_then(|n| n.get(*key))) {
            per_100.insert(label.to_string(), value);
        }
    }
    let scaled = |label: &str, places: i32| {
        per_100
            .get(label)
            .map(|value| round_to(value * multiplier, places))
    };

    let nutrients = Nutrients {
        calories: scaled("calories", 0),
        protein: scaled("protein", 1),
        fat: scaled("fat", 1),
        saturated_fat: scaled("saturated_fat", 1),
        carbohydrate: scaled("carbohydrate", 1),
        sugar: scaled("sugar", 1),
        fibre: scaled("fibre", 1),
        sodium: per_100
            .get("sodium")
            .map(|grams| round_to(grams * multiplier * 1000.0, 1)),
    };

    let declared_serving = json_text(product.get("serving_size"));
    let serving_description = match (&declared_serving, serving_quantity) {
        (Some(text), _) => text.clone(),
        (None, Some(quantity)) => format!("{}{}", format_number(quantity), serving_unit),
        (None, None) => "100g".to_string(),
    };

    let metadata = SourceMetadata {
        product_url: barcode
            .as_ref()
            .map(|code| format!("{}/product/{}", base_url.trim_end_matches('/'), code)),
        barcode,
        brands,
        image_url: json_text(product.get("image_url"))
            .or_else(|| json_text(product.get("image_front_url"))),
        declared_serving,
        per_100,
        model: None,
    };

    let (quantity, unit) = match serving_quantity {
        Some(quantity) => (quantity, serving_unit.as_str()),
        None => (100.0, "g"),
    };

    Some(
        FoodCandidate::new(&name, quantity, unit, SourceTag::OpenFoodFacts)
            .with_serving_description(&serving_description)
            .with_nutrients(nutrients)
            .with_confidence(ConfidenceTag::High)
            .with_metadata(metadata),
    )
}

#[async_trait]
impl FoodSource for OpenFoodFactsClient {
    fn name(&self) -> &'static str {
        SourceTag::OpenFoodFacts.as_str()
    }

    fn tag(&self) -> SourceTag {
        SourceTag::OpenFoodFacts
    }

    fn rate_class(&self, operation: SourceOperation) -> Option<RateClass> {
        match operation {
            SourceOperation::Search => Some(RateClass::Search),
            SourceOperation::Code => Some(RateClass::Product),
        }
    }

    async fn search(&self, query: &str, page_size: usize) -> Result<Vec<FoodCandidate>, LookupError> {
        self.search_products(query, page_size).await
    }

    fn supports_code(&self) -> bool {
        true
    }

    async fn get_by_code(&self, code: &str) -> Result<Option<FoodCandidate>, LookupError> {
        self.get_product(code).await
    }
}
