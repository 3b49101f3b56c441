//! # Food Candidate Data Model
//!
//! This module defines the normalized nutrition record returned by every data
//! source. Values are always expressed per serving; a nutrient the source did
//! not report stays `None` rather than becoming zero.
//!
//! ## Usage
//!
//! ```rust
//! use nutrition_lookup::food_model::{FoodCandidate, Nutrients, SourceTag};
//!
//! let toast = FoodCandidate::new("Wholemeal toast", 1.0, "slice", SourceTag::ModelText)
//!     .with_nutrients(Nutrients {
//!         calories: Some(95.0),
//!         protein: Some(4.1),
//!         ..Default::default()
//!     });
//!
//! assert_eq!(toast.serving_description, "1 slice");
//! assert!(toast.nutrients.fat.is_none());
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::units::format_number;

/// Per-serving nutrient values, each independently optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    /// Energy in kcal
    pub calories: Option<f64>,
    /// Grams
    pub protein: Option<f64>,
    /// Grams
    pub fat: Option<f64>,
    /// Grams
    pub saturated_fat: Option<f64>,
    /// Grams
    pub carbohydrate: Option<f64>,
    /// Grams
    pub sugar: Option<f64>,
    /// Grams
    pub fibre: Option<f64>,
    /// Milligrams
    pub sodium: Option<f64>,
}

impl Nutrients {
    /// Whether no nutrient is known
    pub fn is_empty(&self) -> bool {
        self.known_count() == 0
    }

    /// Number of nutrients with a value
    pub fn known_count(&self) -> usize {
        [
            self.calories,
            self.protein,
            self.fat,
            self.saturated_fat,
            self.carbohydrate,
            self.sugar,
            self.fibre,
            self.sodium,
        ]
        .iter()
        .filter(|value| value.is_some())
        .count()
    }
}

/// Which source produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTag {
    OpenFoodFacts,
    ModelText,
    ModelVision,
    ModelBarcode,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::OpenFoodFacts => "openfoodfacts",
            SourceTag::ModelText => "ai_text",
            SourceTag::ModelVision => "ai_vision",
            SourceTag::ModelBarcode => "ai_barcode",
        }
    }

    /// Whether the values are model estimates rather than database figures
    pub fn is_estimate(&self) -> bool {
        !matches!(self, SourceTag::OpenFoodFacts)
    }
}

/// How much the values can be trusted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTag {
    High,
    #[default]
    Medium,
    Low,
}

impl ConfidenceTag {
    /// Parse a confidence label, falling back to `Medium`
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" => ConfidenceTag::High,
            "low" => ConfidenceTag::Low,
            _ => ConfidenceTag::Medium,
        }
    }
}

/// Provenance details kept for downstream debugging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brands: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Serving size text as declared by the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_serving: Option<String>,
    /// Raw nutrient figures per 100 g/mL as reported by the source
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub per_100: BTreeMap<String, f64>,
    /// Model that produced an estimate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// A single normalized nutrition record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodCandidate {
    pub name: String,
    pub serving_quantity: f64,
    pub serving_unit: String,
    /// Human readable serving, e.g. "2 biscuits (30g)"
    pub serving_description: String,
    pub nutrients: Nutrients,
    pub source: SourceTag,
    pub confidence: ConfidenceTag,
    pub metadata: SourceMetadata,
}

impl FoodCandidate {
    /// Create a candidate with no known nutrients
    pub fn new(name: &str, serving_quantity: f64, serving_unit: &str, source: SourceTag) -> Self {
        Self {
            name: name.trim().to_string(),
            serving_quantity,
            serving_unit: serving_unit.to_string(),
            serving_description: format!("{} {}", format_number(serving_quantity), serving_unit),
            nutrients: Nutrients::default(),
            source,
            confidence: ConfidenceTag::default(),
            metadata: SourceMetadata::default(),
        }
    }

    pub fn with_nutrients(mut self, nutrients: Nutrients) -> Self {
        self.nutrients = nutrients;
        self
    }

    pub fn with_confidence(mut self, confidence: ConfidenceTag) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_serving_description(mut self, description: &str) -> Self {
        let description = description.trim();
        if !description.is_empty() {
            self.serving_description = description.to_string();
        }
        self
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

impl fmt::Display for FoodCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.serving_description)?;
        if let Some(calories) = self.nutrients.calories {
            write!(f, ": {} kcal", format_number(calories))?;
        }
        if let Some(protein) = self.nutrients.protein {
            write!(f, ", {}g protein", format_number(protein))?;
        }
        Ok(())
    }
}
