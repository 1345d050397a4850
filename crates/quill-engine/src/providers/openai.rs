use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quill_contracts::generation::GenerationRequest;
use quill_contracts::imagery::ImageResult;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::{
    parse_dims, response_json_or_error, timestamp_millis, trim_api_base, ImageProvider,
    ImageServiceRequest, TextProvider,
};
use crate::error::ServiceError;

pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com/v1";

const MISSING_KEY: &str = "OPENAI_API_KEY or OPENAI_API_KEY_BACKUP not set";

/// Text generation through the Responses API.
pub struct OpenAiTextProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
}

impl OpenAiTextProvider {
    pub fn new(api_key: Option<String>, api_base: &str) -> Self {
        Self {
            api_base: trim_api_base(api_base),
            api_key,
            http: HttpClient::new(),
        }
    }

    fn build_payload(model: &str, request: &GenerationRequest) -> Value {
        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::String(model.to_string()));
        payload.insert(
            "input".to_string(),
            json!([{
                "role": "user",
                "content": [{ "type": "input_text", "text": request.combined_input() }],
            }]),
        );
        if let Some(sampling) = request.sampling() {
            payload.insert("temperature".to_string(), json!(sampling.temperature));
            payload.insert("top_p".to_string(), json!(sampling.nucleus_threshold));
            payload.insert(
                "max_output_tokens".to_string(),
                json!(sampling.max_output_tokens),
            );
            debug!(
                top_k = sampling.top_k,
                "OpenAI Responses API has no top-k setting; ignoring"
            );
        }
        Value::Object(payload)
    }
}

impl TextProvider for OpenAiTextProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<String, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::unavailable(MISSING_KEY));
        };
        let endpoint = format!("{}/responses", self.api_base);
        let payload = Self::build_payload(model, request);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("OpenAI", response)?;
        let text = extract_output_text(&response_payload);
        if text.is_empty() {
            return Err(ServiceError::EmptyResponse("OpenAI".to_string()));
        }
        Ok(text)
    }
}

/// `output_text` when present, else every `output_text` chunk of every message.
fn extract_output_text(response: &Value) -> String {
    if let Some(text) = response.get("output_text").and_then(Value::as_str) {
        if !text.trim().is_empty() {
            return text.trim().to_string();
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let rows = response
        .get("output")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for row in rows {
        let content = row
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for chunk in content {
            let kind = chunk.get("type").and_then(Value::as_str).unwrap_or_default();
            if !matches!(kind, "output_text" | "text") {
                continue;
            }
            if let Some(text) = chunk.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    parts.push(text.trim().to_string());
                }
            }
        }
    }

    parts.join("\n").trim().to_string()
}

/// Image generation through `/images/generations`.
///
/// DALL·E models answer with a URL. `gpt-image-*` models only return base64,
/// which is written under `out_dir` and reported by path.
pub struct OpenAiImageProvider {
    api_base: String,
    api_key: Option<String>,
    out_dir: Option<PathBuf>,
    http: HttpClient,
}

impl OpenAiImageProvider {
    pub fn new(api_key: Option<String>, api_base: &str, out_dir: Option<PathBuf>) -> Self {
        Self {
            api_base: trim_api_base(api_base),
            api_key,
            out_dir,
            http: HttpClient::new(),
        }
    }

    fn build_payload(request: &ImageServiceRequest, warnings: &mut Vec<String>) -> Value {
        let gpt_image = is_gpt_image_model(&request.model);
        let size = normalize_size(&request.spec.size, gpt_image, warnings);
        let quality = normalize_quality(&request.spec.quality, gpt_image, warnings);
        let mut payload = Map::new();
        payload.insert("model".to_string(), Value::String(request.model.clone()));
        payload.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        payload.insert("n".to_string(), json!(request.spec.n.max(1)));
        payload.insert("size".to_string(), Value::String(size));
        payload.insert("quality".to_string(), Value::String(quality));
        if !gpt_image {
            payload.insert(
                "response_format".to_string(),
                Value::String("url".to_string()),
            );
        }
        Value::Object(payload)
    }

    fn reference_from_item(&self, item: &Map<String, Value>) -> Result<String, ServiceError> {
        if let Some(url) = item.get("url").and_then(Value::as_str) {
            return Ok(url.to_string());
        }
        let Some(b64) = item.get("b64_json").and_then(Value::as_str) else {
            return Err(ServiceError::unavailable(
                "OpenAI image response carried neither url nor b64_json",
            ));
        };
        let Some(out_dir) = self.out_dir.as_ref() else {
            return Err(ServiceError::unavailable(
                "OpenAI returned base64 image data but no output directory is configured",
            ));
        };
        let bytes = BASE64
            .decode(b64.as_bytes())
            .context("OpenAI image base64 decode failed")?;
        fs::create_dir_all(out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let image_path = out_dir.join(format!("illustration-{}.png", timestamp_millis()));
        fs::write(&image_path, bytes)
            .with_context(|| format!("failed to write {}", image_path.display()))?;
        Ok(image_path.to_string_lossy().to_string())
    }
}

impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn generate(&self, request: &ImageServiceRequest) -> Result<ImageResult, ServiceError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ServiceError::unavailable(MISSING_KEY));
        };
        let endpoint = format!("{}/images/generations", self.api_base);
        let mut warnings = Vec::new();
        let payload = Self::build_payload(request, &mut warnings);
        for warning in &warnings {
            warn!(model = %request.model, "{warning}");
        }

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .with_context(|| format!("OpenAI images request failed ({endpoint})"))?;
        let response_payload = response_json_or_error("OpenAI images", response)?;
        let Some(item) = response_payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .and_then(Value::as_object)
        else {
            return Err(ServiceError::unavailable("OpenAI response returned no images"));
        };

        Ok(ImageResult {
            reference_handle: self.reference_from_item(item)?,
            provider: self.name().to_string(),
            model: request.model.clone(),
            revised_prompt: item
                .get("revised_prompt")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

fn is_gpt_image_model(model: &str) -> bool {
    model.trim().to_ascii_lowercase().starts_with("gpt-image")
}

/// Snaps a `WxH` size to the closest one the model family accepts.
fn normalize_size(raw: &str, gpt_image: bool, warnings: &mut Vec<String>) -> String {
    let supported: &[(&str, u32, u32)] = if gpt_image {
        &[
            ("1024x1024", 1024, 1024),
            ("1536x1024", 1536, 1024),
            ("1024x1536", 1024, 1536),
        ]
    } else {
        &[
            ("1024x1024", 1024, 1024),
            ("1792x1024", 1792, 1024),
            ("1024x1792", 1024, 1792),
        ]
    };
    let Some((width, height)) = parse_dims(raw) else {
        warnings.push(format!("OpenAI size '{raw}' unsupported; using 1024x1024."));
        return "1024x1024".to_string();
    };
    let target_ratio = width as f64 / height as f64;
    let mut best = supported[0];
    let mut best_delta = f64::MAX;
    for candidate in supported {
        if candidate.1 == width && candidate.2 == height {
            return candidate.0.to_string();
        }
        let delta = (candidate.1 as f64 / candidate.2 as f64 - target_ratio).abs();
        if delta < best_delta {
            best = *candidate;
            best_delta = delta;
        }
    }
    warnings.push(format!("OpenAI size snapped to {}.", best.0));
    best.0.to_string()
}

fn normalize_quality(raw: &str, gpt_image: bool, warnings: &mut Vec<String>) -> String {
    let normalized = raw.trim().to_ascii_lowercase();
    let mapped = match (gpt_image, normalized.as_str()) {
        (false, "standard" | "hd") => normalized.clone(),
        (false, "high") => "hd".to_string(),
        (false, _) => "standard".to_string(),
        (true, "low" | "medium" | "high" | "auto") => normalized.clone(),
        (true, "hd") => "high".to_string(),
        (true, _) => "medium".to_string(),
    };
    if mapped != normalized {
        warnings.push(format!("OpenAI quality '{raw}' mapped to '{mapped}'."));
    }
    mapped
}

#[cfg(test)]
mod tests {
    use std::fs;

    use base64::Engine as _;
    use mockito::Matcher;
    use quill_contracts::generation::{GenerationRequest, SamplingParameters};
    use quill_contracts::imagery::ImageSpec;
    use serde_json::json;

    use super::{
        extract_output_text, normalize_quality, normalize_size, OpenAiImageProvider,
        OpenAiTextProvider, BASE64,
    };
    use crate::error::ServiceError;
    use crate::providers::{ImageProvider, ImageServiceRequest, TextProvider};

    fn image_request(model: &str) -> ImageServiceRequest {
        ImageServiceRequest {
            model: model.to_string(),
            prompt: "abstract shapes".to_string(),
            spec: ImageSpec::wide_standard(),
        }
    }

    #[test]
    fn text_provider_posts_responses_payload() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/responses")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-4o-mini",
                "max_output_tokens": 1024,
            })))
            .with_status(200)
            .with_body(
                json!({
                    "output": [{
                        "type": "message",
                        "content": [{ "type": "output_text", "text": "Um parágrafo." }]
                    }]
                })
                .to_string(),
            )
            .create();

        let provider = OpenAiTextProvider::new(Some("sk-test".to_string()), &server.url());
        let request = GenerationRequest::new("Escreva.").with_sampling(SamplingParameters::PRECISE);
        assert_eq!(provider.generate("gpt-4o-mini", &request)?, "Um parágrafo.");
        mock.assert();
        Ok(())
    }

    #[test]
    fn response_without_output_text_is_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/responses")
            .with_status(200)
            .with_body(json!({ "status": "incomplete", "output": [] }).to_string())
            .create();

        let provider = OpenAiTextProvider::new(Some("sk-test".to_string()), &server.url());
        let err = provider
            .generate("gpt-4o-mini", &GenerationRequest::new("Escreva."))
            .err();
        assert!(matches!(err, Some(ServiceError::EmptyResponse(_))));
    }

    #[test]
    fn output_text_shortcut_wins() {
        let payload = json!({ "output_text": "  pronto  ", "output": [] });
        assert_eq!(extract_output_text(&payload), "pronto");
    }

    #[test]
    fn dalle_request_returns_url_handle() -> anyhow::Result<()> {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/images/generations")
            .match_body(Matcher::PartialJson(json!({
                "model": "dall-e-3",
                "size": "1792x1024",
                "quality": "standard",
                "n": 1,
                "response_format": "url",
            })))
            .with_status(200)
            .with_body(
                json!({
                    "created": 1,
                    "data": [{ "url": "https://images.example/abc.png", "revised_prompt": "shapes" }]
                })
                .to_string(),
            )
            .create();

        let provider = OpenAiImageProvider::new(Some("sk".to_string()), &server.url(), None);
        let result = provider.generate(&image_request("dall-e-3"))?;
        assert_eq!(result.reference_handle, "https://images.example/abc.png");
        assert_eq!(result.revised_prompt.as_deref(), Some("shapes"));
        assert_eq!(result.provider, "openai");
        mock.assert();
        Ok(())
    }

    #[test]
    fn gpt_image_base64_is_written_to_out_dir() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/images/generations")
            .match_body(Matcher::PartialJson(json!({
                "model": "gpt-image-1",
                "size": "1536x1024",
                "quality": "medium",
            })))
            .with_status(200)
            .with_body(json!({ "data": [{ "b64_json": BASE64.encode(b"png-bytes") }] }).to_string())
            .create();

        let provider = OpenAiImageProvider::new(
            Some("sk".to_string()),
            &server.url(),
            Some(temp.path().to_path_buf()),
        );
        let result = provider.generate(&image_request("gpt-image-1"))?;
        assert_eq!(fs::read(&result.reference_handle)?, b"png-bytes");
        Ok(())
    }

    #[test]
    fn policy_rejection_body_maps_to_content_policy() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/images/generations")
            .with_status(400)
            .with_body(
                json!({
                    "error": {
                        "code": "content_policy_violation",
                        "message": "Your request was rejected as a result of our safety system."
                    }
                })
                .to_string(),
            )
            .create();

        let provider = OpenAiImageProvider::new(Some("sk".to_string()), &server.url(), None);
        let err = provider.generate(&image_request("dall-e-3")).err();
        let Some(ServiceError::ContentPolicy(message)) = err else {
            panic!("expected content policy rejection");
        };
        assert_eq!(
            message,
            "Your request was rejected as a result of our safety system."
        );
    }

    #[test]
    fn other_http_failures_are_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/images/generations")
            .with_status(500)
            .with_body(r#"{"error": {"message": "internal error"}}"#)
            .create();

        let provider = OpenAiImageProvider::new(Some("sk".to_string()), &server.url(), None);
        let err = provider.generate(&image_request("dall-e-3")).err();
        assert!(matches!(err, Some(ServiceError::Unavailable(_))));
    }

    #[test]
    fn size_and_quality_follow_model_family() {
        let mut warnings = Vec::new();
        assert_eq!(normalize_size("1792x1024", false, &mut warnings), "1792x1024");
        assert!(warnings.is_empty());
        assert_eq!(normalize_size("1792x1024", true, &mut warnings), "1536x1024");
        assert_eq!(normalize_size("wide", true, &mut warnings), "1024x1024");
        assert_eq!(warnings.len(), 2);

        let mut warnings = Vec::new();
        assert_eq!(normalize_quality("standard", false, &mut warnings), "standard");
        assert_eq!(normalize_quality("standard", true, &mut warnings), "medium");
        assert_eq!(normalize_quality("hd", true, &mut warnings), "high");
        assert_eq!(warnings.len(), 2);
    }
}
