use anyhow::Context;
use quill_contracts::generation::GenerationRequest;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{response_json_or_error, trim_api_base, TextProvider};
use crate::error::ServiceError;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Text generation through the Generative Language `generateContent` endpoint.
pub struct GeminiTextProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl GeminiTextProvider {
    pub fn new(api_key: Option<String>, api_base: &str) -> Self {
        Self {
            api_base: trim_api_base(api_base),
            api_key,
            http: HttpClient::new(),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut payload = Map::new();
        payload.insert(
            "contents".to_string(),
            json!([{
                "role": "user",
                "parts": [{ "text": request.combined_input() }],
            }]),
        );
        if let Some(sampling) = request.sampling() {
            payload.insert(
                "generationConfig".to_string(),
                json!({
                    "temperature": sampling.temperature,
                    "topP": sampling.nucleus_threshold,
                    "topK": sampling.top_k,
                    "maxOutputTokens": sampling.max_output_tokens,
                }),
            );
        }
        Value::Object(payload)
    }

    /// Concatenates the text parts of the first candidate. A blocked prompt or a
    /// candidate without text is a failed call, never an empty answer.
    fn extract_text(response_payload: &Value) -> Result<String, ServiceError> {
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(candidate) = candidates.first() else {
            if let Some(reason) = response_payload
                .get("promptFeedback")
                .and_then(|feedback| feedback.get("blockReason"))
                .and_then(Value::as_str)
            {
                return Err(ServiceError::unavailable(format!(
                    "Gemini blocked the prompt ({reason})"
                )));
            }
            return Err(ServiceError::EmptyResponse("Gemini".to_string()));
        };

        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let text = parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("");
        if !text.trim().is_empty() {
            return Ok(text);
        }
        match candidate.get("finishReason").and_then(Value::as_str) {
            Some(reason) if reason != "STOP" => Err(ServiceError::unavailable(format!(
                "Gemini returned no text (finishReason {reason})"
            ))),
            _ => Err(ServiceError::EmptyResponse("Gemini".to_string())),
        }
    }
}

impl TextProvider for GeminiTextProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<String, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::unavailable(
                "GEMINI_API_KEY or GOOGLE_API_KEY not set",
            ));
        };
        let endpoint = self.endpoint_for_model(model);
        let payload = Self::build_payload(request);
        debug!(
            model,
            prompt_chars = request.prompt_text().chars().count(),
            context_chars = request.context_text().chars().count(),
            "gemini generateContent"
        );

        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", api_key)])
            .json(&payload)
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("Gemini", response)?;
        Self::extract_text(&response_payload)
    }
}
