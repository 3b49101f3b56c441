//! Translation between `ModelRequest` and the two provider payload shapes.
//!
//! The provider exposes a conventional chat-completions endpoint and a newer
//! responses endpoint. They differ in URL, message layout, token limit field
//! and where the generated text lives in the reply.

use serde_json::{json, Map, Value};

use super::messages::{ChatMessage, ContentPart, MessageContent, ModelRequest};
use crate::config::{ProviderConfig, DEFAULT_RESPONSES_URL};

/// Output token limit sent on the responses shape when the caller gives none
pub const DEFAULT_RESPONSES_MAX_OUTPUT_TOKENS: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestShape {
    ChatCompletions,
    Responses,
}

impl RequestShape {
    /// Pick the shape for `model` under `config`
    ///
    /// A base URL ending in `/responses` forces the responses shape for every
    /// model; otherwise models carrying a configured prefix use it.
    pub fn select(config: &ProviderConfig, model: &str) -> Self {
        let base = config.base_url.trim_end_matches('/');
        if base.ends_with("/responses") || has_prefix(model, &config.responses_model_prefixes) {
            RequestShape::Responses
        } else {
            RequestShape::ChatCompletions
        }
    }

    /// Whether `temperature` may be sent for `model` with this shape
    pub fn supports_temperature(self, config: &ProviderConfig, model: &str) -> bool {
        !(self == RequestShape::Responses && has_prefix(model, &config.no_temperature_prefixes))
    }

    /// Endpoint URL for this shape given the configured base URL
    pub fn endpoint(self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        match self {
            RequestShape::ChatCompletions => base.to_string(),
            RequestShape::Responses => {
                if let Some(prefix) = base.strip_suffix("/chat/completions") {
                    format!("{prefix}/responses")
                } else if base.ends_with("/v1") {
                    format!("{base}/responses")
                } else if base.ends_with("/responses") {
                    base.to_string()
                } else {
                    DEFAULT_RESPONSES_URL.to_string()
                }
            }
        }
    }

    /// JSON payload for `model`
    pub fn build_payload(self, model: &str, request: &ModelRequest, include_temperature: bool) -> Value {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(model));

        match self {
            RequestShape::Responses => {
                payload.insert("input".to_string(), responses_input(&request.messages));
                payload.insert("reasoning".to_string(), json!({ "effort": "low" }));
                payload.insert(
                    "text".to_string(),
                    json!({ "format": { "type": "text" }, "verbosity": "low" }),
                );
                if include_temperature {
                    payload.insert("temperature".to_string(), json!(request.temperature));
                }
                let max_tokens = request
                    .max_output_tokens
                    .unwrap_or(DEFAULT_RESPONSES_MAX_OUTPUT_TOKENS);
                payload.insert("max_output_tokens".to_string(), json!(max_tokens));
            }
            RequestShape::ChatCompletions => {
                payload.insert("messages".to_string(), chat_messages(&request.messages));
                if include_temperature {
                    payload.insert("temperature".to_string(), json!(request.temperature));
                }
                if let Some(max_tokens) = request.max_output_tokens {
                    payload.insert("max_tokens".to_string(), json!(max_tokens));
                }
            }
        }

        Value::Object(payload)
    }
}

fn has_prefix(model: &str, prefixes: &[String]) -> bool {
    prefixes
        .iter()
        .any(|prefix| !prefix.is_empty() && model.starts_with(prefix.as_str()))
}

fn chat_messages(messages: &[ChatMessage]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|message| {
                let content = match &message.content {
                    MessageContent::Text(text) => json!(text),
                    MessageContent::Parts(parts) => Value::Array(
                        parts
                            .iter()
                            .map(|part| match part {
                                ContentPart::Text(text) => json!({ "type": "text", "text": text }),
                                ContentPart::ImageUrl(url) => {
                                    json!({ "type": "image_url", "image_url": { "url": url } })
                                }
                            })
                            .collect(),
                    ),
                };
                json!({ "role": message.role.as_str(), "content": content })
            })
            .collect(),
    )
}

fn responses_input(messages: &[ChatMessage]) -> Value {
    Value::Array(
        messages
            .iter()
            .map(|message| {
                let mut items: Vec<Value> = match &message.content {
                    MessageContent::Text(text) => vec![json!({ "type": "input_text", "text": text })],
                    MessageContent::Parts(parts) => parts
                        .iter()
                        .map(|part| match part {
                            ContentPart::Text(text) => json!({ "type": "input_text", "text": text }),
                            ContentPart::ImageUrl(url) => {
                                json!({ "type": "input_image", "image_url": url })
                            }
                        })
                        .collect(),
                };
                if items.is_empty() {
                    items.push(json!({ "type": "input_text", "text": "" }));
                }
                json!({ "role": message.role.as_str(), "content": items })
            })
            .collect(),
    )
}

/// Pull the generated text out of either reply shape
///
/// Order: a non-blank `output_text` string, then the joined text fragments
/// of `output[].content[]`, then `choices[0].message.content`. Returns an
/// empty string when none is present.
pub fn extract_content(data: &Value) -> String {
    if let Some(text) = data.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.to_string();
        }
    }

    if let Some(items) = data.get("output").and_then(Value::as_array) {
        let fragments: Vec<&str> = items
            .iter()
            .filter_map(|item| item.get("content").and_then(Value::as_array))
            .flatten()
            .filter_map(|content| {
                content
                    .get("text")
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                    .or_else(|| content.get("output_text").and_then(Value::as_str))
            })
            .filter(|text| !text.is_empty())
            .collect();
        let joined = fragments.join("\n");
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
    }

    data.get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.pointer("/message/content"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_base(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_shape_selection() {
        let chat = config_with_base("https://api.openai.com/v1/chat/completions");
        assert_eq!(RequestShape::select(&chat, "gpt-4o-mini"), RequestShape::ChatCompletions);
        assert_eq!(RequestShape::select(&chat, "gpt-5-mini"), RequestShape::Responses);

        let responses = config_with_base("https://api.openai.com/v1/responses/");
        assert_eq!(RequestShape::select(&responses, "gpt-4o-mini"), RequestShape::Responses);
    }

    #[test]
    fn test_temperature_support() {
        let config = ProviderConfig::default();
        assert!(!RequestShape::Responses.supports_temperature(&config, "gpt-5-mini"));
        assert!(RequestShape::Responses.supports_temperature(&config, "gpt-4.1"));
        assert!(RequestShape::ChatCompletions.supports_temperature(&config, "gpt-5-mini"));
    }

    #[test]
    fn test_endpoint_resolution() {
        let shape = RequestShape::Responses;
        assert_eq!(
            shape.endpoint("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com/v1/responses"
        );
        assert_eq!(shape.endpoint("https://proxy.local/v1/"), "https://proxy.local/v1/responses");
        assert_eq!(shape.endpoint("https://proxy.local/v1/responses"), "https://proxy.local/v1/responses");
        assert_eq!(shape.endpoint("https://proxy.local/custom"), DEFAULT_RESPONSES_URL);
        assert_eq!(
            RequestShape::ChatCompletions.endpoint("https://proxy.local/v1/chat/completions/"),
            "https://proxy.local/v1/chat/completions"
        );
    }

    #[test]
    fn test_chat_payload() {
        let request = ModelRequest::new(vec![
            ChatMessage::system("rules"),
            ChatMessage::user_parts(vec![
                ContentPart::Text("what is this".to_string()),
                ContentPart::ImageUrl("data:image/jpeg;base64,AA".to_string()),
            ]),
        ])
        .with_temperature(0.3);

        let payload = RequestShape::ChatCompletions.build_payload("gpt-4o", &request, true);

        assert_eq!(payload["model"], "gpt-4o");
        assert_eq!(payload["temperature"], 0.3);
        assert!(payload.get("max_tokens").is_none());
        assert_eq!(payload["messages"][0]["content"], "rules");
        assert_eq!(payload["messages"][1]["content"][1]["type"], "image_url");
        assert_eq!(
            payload["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AA"
        );
    }

    #[test]
    fn test_responses_payload() {
        let request = ModelRequest::new(vec![ChatMessage::user("hello")]).with_temperature(0.2);

        let payload = RequestShape::Responses.build_payload("gpt-5-mini", &request, false);

        assert!(payload.get("temperature").is_none());
        assert_eq!(payload["max_output_tokens"], 400);
        assert_eq!(payload["reasoning"]["effort"], "low");
        assert_eq!(payload["text"]["verbosity"], "low");
        assert_eq!(payload["input"][0]["role"], "user");
        assert_eq!(payload["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(payload["input"][0]["content"][0]["text"], "hello");
    }

    #[test]
    fn test_extract_prefers_output_text() {
        let data = json!({
            "output_text": "direct",
            "choices": [{"message": {"content": "chat"}}]
        });
        assert_eq!(extract_content(&data), "direct");
    }

    #[test]
    fn test_extract_joins_output_items() {
        let data = json!({
            "output_text": "   ",
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "[{\"FoodName\":"},
                    {"type": "output_text", "text": "\"Egg\"}]"}
                ]}
            ]
        });
        assert_eq!(extract_content(&data), "[{\"FoodName\":\n\"Egg\"}]");
    }

    #[test]
    fn test_extract_falls_back_to_choices_then_empty() {
        let chat = json!({"choices": [{"message": {"content": "from chat"}}]});
        assert_eq!(extract_content(&chat), "from chat");

        assert_eq!(extract_content(&json!({"id": "x"})), "");
        assert_eq!(extract_content(&json!({"choices": []})), "");
    }
}
