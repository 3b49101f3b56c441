//! # Units Module
//!
//! Unit normalization and classification used by the serving conversion
//! engine and by every source adapter when it canonicalizes serving units.
//!
//! ## Features
//!
//! - Alias table for common spellings ("grams", "gr", "tablespoons", ...)
//! - Plural stripping for unrecognized tokens
//! - Mass/volume base-unit factors (g and mL)
//! - Number formatting for conversion explanations

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// The unit a conversion falls back to when nothing is given
pub const SERVING_UNIT: &str = "serving";

/// Mass units with their factor to grams
static MASS_UNITS: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    HashMap::from([("g", 1.0), ("kg", 1000.0), ("oz", 28.3495), ("lb", 453.592)])
});

/// Volume units with their factor to millilitres
static VOLUME_UNITS: LazyLock<HashMap<&'static str, f64>> = LazyLock::new(|| {
    HashMap::from([
        ("mL", 1.0),
        ("L", 1000.0),
        ("tsp", 5.0),
        ("tbsp", 15.0),
        ("cup", 250.0),
    ])
});

/// Discrete units that only convert to themselves
static COUNT_UNITS: &[&str] = &[
    "serving", "piece", "slice", "biscuit", "egg", "can", "bar", "handful",
];

/// Common unit spellings and their canonical form
static UNIT_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();

    // Mass
    map.insert("gram", "g");
    map.insert("grams", "g");
    map.insert("gr", "g");
    map.insert("kilogram", "kg");
    map.insert("kilograms", "kg");

    // Volume
    map.insert("ml", "mL");
    map.insert("milliliter", "mL");
    map.insert("milliliters", "mL");
    map.insert("millilitre", "mL");
    map.insert("millilitres", "mL");
    map.insert("liter", "L");
    map.insert("liters", "L");
    map.insert("litre", "L");
    map.insert("litres", "L");
    map.insert("teaspoon", "tsp");
    map.insert("teaspoons", "tsp");
    map.insert("tablespoon", "tbsp");
    map.insert("tablespoons", "tbsp");
    map.insert("cups", "cup");

    // Count
    map.insert("servings", "serving");
    map.insert("pieces", "piece");
    map.insert("slices", "slice");
    map.insert("biscuits", "biscuit");
    map.insert("eggs", "egg");
    map.insert("cans", "can");
    map.insert("bars", "bar");
    map.insert("handfuls", "handful");

    map
});

/// Category a unit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitKind {
    Mass,
    Volume,
    Count,
    Serving,
    Unknown,
}

/// Map a raw unit string to its canonical spelling
///
/// Blank input means one serving. Unknown units are returned trimmed but
/// otherwise unchanged.
///
/// # Examples
///
/// ```rust
/// use nutrition_lookup::units::normalize_unit;
///
/// assert_eq!(normalize_unit("Grams"), "g");
/// assert_eq!(normalize_unit("ML"), "mL");
/// assert_eq!(normalize_unit("tablespoons"), "tbsp");
/// assert_eq!(normalize_unit(""), "serving");
/// ```
pub fn normalize_unit(raw: &str) -> String {
    let value = raw.trim();
    if value.is_empty() {
        return SERVING_UNIT.to_string();
    }

    let lower = value.to_lowercase();
    if let Some(canonical) = UNIT_ALIASES.get(lower.as_str()) {
        return canonical.to_string();
    }
    if MASS_UNITS.contains_key(lower.as_str()) {
        return lower;
    }
    if lower == "l" {
        return "L".to_string();
    }
    if VOLUME_UNITS.contains_key(lower.as_str()) || COUNT_UNITS.contains(&lower.as_str()) {
        return lower;
    }

    // Strip a trailing plural "s" and retry the alias and count tables
    if lower.len() > 1 {
        if let Some(singular) = lower.strip_suffix('s') {
            if let Some(canonical) = UNIT_ALIASES.get(singular) {
                return canonical.to_string();
            }
            if COUNT_UNITS.contains(&singular) {
                return singular.to_string();
            }
        }
    }

    value.to_string()
}

/// Classify a canonical unit
pub fn classify_unit(unit: &str) -> UnitKind {
    if unit == SERVING_UNIT {
        UnitKind::Serving
    } else if MASS_UNITS.contains_key(unit) {
        UnitKind::Mass
    } else if VOLUME_UNITS.contains_key(unit) {
        UnitKind::Volume
    } else if COUNT_UNITS.contains(&unit) {
        UnitKind::Count
    } else {
        UnitKind::Unknown
    }
}

/// Convert a quantity of a canonical unit to its category's base unit
///
/// Returns the value in g or mL together with the base unit, or the input
/// unchanged for units without a factor.
pub fn to_base_unit(quantity: f64, unit: &str) -> (f64, &str) {
    if let Some(factor) = MASS_UNITS.get(unit) {
        return (quantity * factor, "g");
    }
    if let Some(factor) = VOLUME_UNITS.get(unit) {
        return (quantity * factor, "mL");
    }
    (quantity, unit)
}

/// Format a number for explanations
///
/// Integral values print without a decimal point; others are rounded to two
/// places with trailing zeros trimmed.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.is_finite() {
        return format!("{}", value as i64);
    }
    let rounded = format!("{value:.2}");
    rounded.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_normalization() {
        assert_eq!(normalize_unit("gr"), "g");
        assert_eq!(normalize_unit(" Kilograms "), "kg");
        assert_eq!(normalize_unit("millilitres"), "mL");
        assert_eq!(normalize_unit("l"), "L");
        assert_eq!(normalize_unit("Litre"), "L");
        assert_eq!(normalize_unit("teaspoons"), "tsp");
        assert_eq!(normalize_unit("CUPS"), "cup");
        assert_eq!(normalize_unit("eggs"), "egg");
    }

    #[test]
    fn test_known_units_pass_through() {
        assert_eq!(normalize_unit("oz"), "oz");
        assert_eq!(normalize_unit("TBSP"), "tbsp");
        assert_eq!(normalize_unit("piece"), "piece");
        assert_eq!(normalize_unit("serving"), "serving");
    }

    #[test]
    fn test_plural_stripping_fallback() {
        assert_eq!(normalize_unit("handfulss"), "handful");
        assert_eq!(normalize_unit("servingss"), "serving");
        // Stripping only applies to the alias and count tables
        assert_eq!(normalize_unit("tbsps"), "tbsps");
        assert_eq!(normalize_unit("Cloves"), "Cloves");
    }

    #[test]
    fn test_unknown_unit_keeps_case() {
        assert_eq!(normalize_unit("  Scoop "), "Scoop");
        assert_eq!(classify_unit("Scoop"), UnitKind::Unknown);
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify_unit("g"), UnitKind::Mass);
        assert_eq!(classify_unit("lb"), UnitKind::Mass);
        assert_eq!(classify_unit("cup"), UnitKind::Volume);
        assert_eq!(classify_unit("mL"), UnitKind::Volume);
        assert_eq!(classify_unit("slice"), UnitKind::Count);
        assert_eq!(classify_unit("serving"), UnitKind::Serving);
        assert_eq!(classify_unit("ml"), UnitKind::Unknown);
    }

    #[test]
    fn test_base_unit_conversion() {
        assert_eq!(to_base_unit(2.0, "kg"), (2000.0, "g"));
        assert_eq!(to_base_unit(3.0, "tbsp"), (45.0, "mL"));
        assert_eq!(to_base_unit(1.0, "piece"), (1.0, "piece"));
    }

    #[test]
    fn test_number_formatting() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(0.333333), "0.33");
        assert_eq!(format_number(1.999), "2");
        assert_eq!(format_number(28.3495), "28.35");
    }
}
