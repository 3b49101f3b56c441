//! Decides whether a provider error means "this model cannot serve the
//! request" (try the next candidate) or a genuine request failure (stop).
//!
//! | Condition                                   | Required |
//! |---------------------------------------------|----------|
//! | HTTP status is 400 or 404                   | yes      |
//! | body has an `error` object                  | yes      |
//! | `error.code` is `unsupported_value` or `model_not_found` | any one |
//! | `error.param` is `model`                    | any one  |
//! | lower-cased `error.message` mentions `model`| any one  |

use serde_json::Value;

/// Signature of a model-unavailability classifier
///
/// Receives the HTTP status and the parsed body when it was valid JSON.
pub type ModelErrorClassifier = fn(u16, Option<&Value>) -> bool;

const MODEL_ERROR_CODES: &[&str] = &["unsupported_value", "model_not_found"];

/// Classifier used unless the dispatcher is given another one
pub fn default_model_error_classifier(status: u16, body: Option<&Value>) -> bool {
    if status != 400 && status != 404 {
        return false;
    }
    let Some(error) = body.and_then(|b| b.get("error")).filter(|e| e.is_object()) else {
        return false;
    };

    let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
    let param = error.get("param").and_then(Value::as_str).unwrap_or_default();
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();

    MODEL_ERROR_CODES.contains(&code) || param == "model" || message.contains("model")
}

/// Human readable summary of a provider error body
pub fn error_detail(body: Option<&Value>, raw: &str) -> String {
    body.and_then(|b| b.pointer("/error/message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| raw.trim().chars().take(500).collect())
}
