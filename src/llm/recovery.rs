//! Recovery from model output that is not clean JSON.
//!
//! Models wrap JSON in prose or markdown fences. Parsing tries, in order:
//! the whole trimmed text, the contents of a fenced block, then the span
//! between matching outer brackets. If that fails or the value does not
//! validate, the output is sent back once with a formatter instruction.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, warn};

use super::dispatcher::ModelDispatcher;
use super::messages::{ChatMessage, ModelRequest};
use crate::errors::LookupError;

pub const FORMATTER_TEMPERATURE: f64 = 0.1;
pub const FORMATTER_MAX_OUTPUT_TOKENS: u32 = 400;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("Fenced block pattern should be valid")
});

/// Validated value together with the model that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredResponse<T> {
    pub value: T,
    pub model_used: String,
}

/// Parse model output into JSON
///
/// # Errors
///
/// `MalformedResponse` when the text is blank or no strategy yields JSON.
pub fn parse_structured(text: &str) -> Result<Value, LookupError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LookupError::MalformedResponse("empty model output".to_string()));
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(block) = FENCED_BLOCK.captures(trimmed).and_then(|c| c.get(1)) {
        if let Ok(value) = serde_json::from_str(block.as_str().trim()) {
            return Ok(value);
        }
    }

    for span in bracket_spans(trimmed) {
        if let Ok(value) = serde_json::from_str(span) {
            return Ok(value);
        }
    }

    Err(LookupError::MalformedResponse(format!(
        "no JSON found in model output: {}",
        preview(trimmed)
    )))
}

/// Candidate spans from the first opening to the last closing bracket
///
/// Arrays are tried before objects unless an object opens first, so an
/// object holding an array is not reduced to its inner list.
fn bracket_spans(text: &str) -> Vec<&str> {
    match (bracket_span(text, '[', ']'), bracket_span(text, '{', '}')) {
        (Some((array_start, array)), Some((object_start, object))) => {
            if object_start < array_start {
                vec![object, array]
            } else {
                vec![array, object]
            }
        }
        (Some((_, array)), None) => vec![array],
        (None, Some((_, object))) => vec![object],
        (None, None) => Vec::new(),
    }
}

fn bracket_span(text: &str, open: char, close: char) -> Option<(usize, &str)> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| (start, &text[start..=end]))
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        preview.push_str("...");
    }
    preview
}

/// Dispatch `request` and turn the output into `T`
///
/// `validate` receives the parsed JSON and decides whether it has the
/// required structure. On a parse or validation failure the previous output
/// is sent back once under `formatter_instruction`.
///
/// # Errors
///
/// Dispatcher errors propagate unchanged; a second parse or validation
/// failure becomes `MalformedResponse`.
pub async fn dispatch_structured<T, F>(
    dispatcher: &ModelDispatcher,
    request: &ModelRequest,
    formatter_instruction: &str,
    validate: F,
) -> Result<StructuredResponse<T>, LookupError>
where
    F: Fn(Value) -> Result<T, LookupError>,
{
    dispatch_structured_with_limit(
        dispatcher,
        request,
        formatter_instruction,
        FORMATTER_MAX_OUTPUT_TOKENS,
        validate,
    )
    .await
}

/// `dispatch_structured` with an explicit output limit for the reformat call
pub async fn dispatch_structured_with_limit<T, F>(
    dispatcher: &ModelDispatcher,
    request: &ModelRequest,
    formatter_instruction: &str,
    formatter_max_output_tokens: u32,
    validate: F,
) -> Result<StructuredResponse<T>, LookupError>
where
    F: Fn(Value) -> Result<T, LookupError>,
{
    let first = dispatcher.dispatch(request).await?;
    let first_error = match parse_structured(&first.text).and_then(&validate) {
        Ok(value) => {
            return Ok(StructuredResponse {
                value,
                model_used: first.model_used,
            })
        }
        Err(err) => err,
    };

    warn!(model = %first.model_used, error = %first_error, "Model output unusable, requesting reformat");

    let retry = ModelRequest::new(vec![
        ChatMessage::system(formatter_instruction),
        ChatMessage::user(first.text),
    ])
    .with_models(request.models.clone())
    .with_temperature(FORMATTER_TEMPERATURE)
    .with_max_output_tokens(formatter_max_output_tokens);

    let second = dispatcher.dispatch(&retry).await?;
    match parse_structured(&second.text).and_then(&validate) {
        Ok(value) => {
            debug!(model = %second.model_used, "Reformatted output accepted");
            Ok(StructuredResponse {
                value,
                model_used: second.model_used,
            })
        }
        Err(err) => Err(LookupError::MalformedResponse(format!(
            "output still unusable after reformat: {err}"
        ))),
    }
}
