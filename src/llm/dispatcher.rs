//! # Model Dispatcher
//!
//! Executes a `ModelRequest` against an ordered list of candidate models.
//! A candidate the provider reports as unavailable is skipped; any other
//! failure ends the dispatch immediately.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::classifier::{default_model_error_classifier, error_detail, ModelErrorClassifier};
use super::messages::{ModelRequest, ModelResponse};
use super::shapes::{extract_content, RequestShape};
use super::transport::{HttpTransport, ModelTransport};
use crate::config::ProviderConfig;
use crate::errors::LookupError;

pub struct ModelDispatcher {
    config: ProviderConfig,
    transport: Arc<dyn ModelTransport>,
    classifier: ModelErrorClassifier,
}

impl ModelDispatcher {
    pub fn new(config: ProviderConfig, transport: Arc<dyn ModelTransport>) -> Self {
        Self {
            config,
            transport,
            classifier: default_model_error_classifier,
        }
    }

    /// Dispatcher backed by an HTTP transport using the configured timeout
    pub fn with_http(config: ProviderConfig) -> Result<Self, LookupError> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Replace the model-unavailability classifier
    pub fn with_classifier(mut self, classifier: ModelErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    /// Run the request against each candidate model until one answers
    ///
    /// # Errors
    ///
    /// - `Configuration` when no API key is set (no call is made)
    /// - `ProviderRequest`, `Timeout` or `Transport` from the first candidate
    ///   that fails for a reason other than model availability
    /// - the last `ModelUnavailable` when every candidate was rejected
    /// - `DispatchFailed` when the candidate list is empty
    pub async fn dispatch(&self, request: &ModelRequest) -> Result<ModelResponse, LookupError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or_else(|| LookupError::Configuration("OPENAI_API_KEY is not set".to_string()))?;

        let candidates = if request.models.is_empty() {
            self.config.candidate_models()
        } else {
            dedup_models(&request.models)
        };

        let mut last_error = None;
        for model in &candidates {
            match self.request_model(model, request, api_key).await {
                Ok(response) => {
                    info!(model = %response.model_used, "Model request succeeded");
                    return Ok(response);
                }
                Err(err @ LookupError::ModelUnavailable { .. }) => {
                    warn!(model = %model, error = %err, "Model unavailable, trying next candidate");
                    last_error = Some(err);
                }
                Err(err) => {
                    warn!(model = %model, error = %err, "Model request failed");
                    return Err(err);
                }
            }
        }

        Err(last_error.unwrap_or(LookupError::DispatchFailed))
    }

    /// Like `dispatch` but returns only the generated text
    pub async fn dispatch_text(&self, request: &ModelRequest) -> Result<String, LookupError> {
        Ok(self.dispatch(request).await?.text)
    }

    async fn request_model(
        &self,
        model: &str,
        request: &ModelRequest,
        api_key: &str,
    ) -> Result<ModelResponse, LookupError> {
        let shape = RequestShape::select(&self.config, model);
        let url = shape.endpoint(&self.config.base_url);
        let include_temperature = shape.supports_temperature(&self.config, model);
        let payload = shape.build_payload(model, request, include_temperature);

        debug!(model = %model, shape = ?shape, url = %url, "Sending model request");
        let response = self.transport.post_json(&url, api_key, &payload).await?;

        if !response.is_success() {
            let body: Option<Value> = serde_json::from_str(&response.body).ok();
            let detail = error_detail(body.as_ref(), &response.body);
            if (self.classifier)(response.status, body.as_ref()) {
                return Err(LookupError::ModelUnavailable {
                    model: model.to_string(),
                    detail,
                });
            }
            return Err(LookupError::ProviderRequest {
                status: response.status,
                url,
                detail,
            });
        }

        let data: Value = serde_json::from_str(&response.body).map_err(|e| {
            LookupError::MalformedResponse(format!("provider returned a non-JSON body: {e}"))
        })?;

        let model_used = data
            .get("model")
            .and_then(Value::as_str)
            .filter(|m| !m.is_empty())
            .unwrap_or(model)
            .to_string();

        Ok(ModelResponse {
            text: extract_content(&data),
            model_used,
        })
    }
}

fn dedup_models(models: &[String]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(models.len());
    for model in models.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
        if !unique.iter().any(|existing| existing == model) {
            unique.push(model.to_string());
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::messages::ChatMessage;
    use crate::llm::transport::scripted::{chat_reply, error_reply, ScriptedTransport};
    use crate::llm::transport::TransportResponse;
    use serde_json::json;

    fn configured() -> ProviderConfig {
        ProviderConfig {
            api_key: Some("sk-test".to_string()),
            primary_model: "gpt-4.1".to_string(),
            fallback_models: vec!["gpt-4o-mini".to_string()],
            ..Default::default()
        }
    }

    fn request() -> ModelRequest {
        ModelRequest::new(vec![ChatMessage::user("2 eggs")])
    }

    #[tokio::test]
    async fn test_missing_key_makes_no_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let dispatcher = ModelDispatcher::new(ProviderConfig::default(), transport.clone());

        let result = dispatcher.dispatch(&request()).await;

        assert!(matches!(result, Err(LookupError::Configuration(_))));
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn test_falls_back_on_unavailable_model() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            error_reply(404, json!({"code": "model_not_found", "message": "no such model"})),
            chat_reply("gpt-4o-mini-2024-07-18", "hello"),
        ]));
        let dispatcher = ModelDispatcher::new(configured(), transport.clone());

        let response = dispatcher.dispatch(&request()).await.unwrap();

        assert_eq!(response.text, "hello");
        assert_eq!(response.model_used, "gpt-4o-mini-2024-07-18");
        assert_eq!(transport.request_count(), 2);
        assert_eq!(transport.payload(0)["model"], "gpt-4.1");
        assert_eq!(transport.payload(1)["model"], "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_other_provider_error_aborts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            error_reply(401, json!({"message": "bad key"})),
            chat_reply("gpt-4o-mini", "never"),
        ]));
        let dispatcher = ModelDispatcher::new(configured(), transport.clone());

        let err = dispatcher.dispatch(&request()).await.unwrap_err();

        match err {
            LookupError::ProviderRequest { status, detail, .. } => {
                assert_eq!(status, 401);
                assert_eq!(detail, "bad key");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_unavailable() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            error_reply(400, json!({"param": "model", "message": "first"})),
            error_reply(404, json!({"code": "model_not_found", "message": "second"})),
        ]));
        let dispatcher = ModelDispatcher::new(configured(), transport);

        let err = dispatcher.dispatch(&request()).await.unwrap_err();

        match err {
            LookupError::ModelUnavailable { model, detail } => {
                assert_eq!(model, "gpt-4o-mini");
                assert_eq!(detail, "second");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_aborts() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(LookupError::Timeout(
            "30s".to_string(),
        ))]));
        let dispatcher = ModelDispatcher::new(configured(), transport.clone());

        let err = dispatcher.dispatch(&request()).await.unwrap_err();

        assert!(matches!(err, LookupError::Timeout(_)));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn test_request_models_override_configuration() {
        let transport = Arc::new(ScriptedTransport::new(vec![chat_reply("", "ok")]));
        let dispatcher = ModelDispatcher::new(configured(), transport.clone());

        let response = dispatcher
            .dispatch(&request().with_models(vec!["gpt-4o".to_string(), "gpt-4o".to_string()]))
            .await
            .unwrap();

        assert_eq!(response.model_used, "gpt-4o");
        assert_eq!(transport.payload(0)["model"], "gpt-4o");
    }

    #[tokio::test]
    async fn test_responses_shape_for_gpt5() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(TransportResponse {
            status: 200,
            body: json!({"model": "gpt-5-mini", "output_text": "done"}).to_string(),
        })]));
        let config = ProviderConfig {
            primary_model: "gpt-5-mini".to_string(),
            ..configured()
        };
        let dispatcher = ModelDispatcher::new(config, transport.clone());

        let text = dispatcher
            .dispatch_text(&request().with_temperature(0.2))
            .await
            .unwrap();

        assert_eq!(text, "done");
        assert_eq!(transport.url(0), "https://api.openai.com/v1/responses");
        let payload = transport.payload(0);
        assert!(payload.get("temperature").is_none());
        assert!(payload.get("input").is_some());
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        fn everything_is_unavailable(_: u16, _: Option<&Value>) -> bool {
            true
        }

        let transport = Arc::new(ScriptedTransport::new(vec![
            error_reply(500, json!({"message": "overloaded"})),
            chat_reply("gpt-4o-mini", "recovered"),
        ]));
        let dispatcher = ModelDispatcher::new(configured(), transport)
            .with_classifier(everything_is_unavailable);

        let response = dispatcher.dispatch(&request()).await.unwrap();
        assert_eq!(response.text, "recovered");
    }
}
