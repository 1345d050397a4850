use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use quill_contracts::generation::GenerationRequest;
use quill_contracts::imagery::{ImageResult, ImageSpec};
use reqwest::blocking::Response as HttpResponse;
use serde_json::Value;

use crate::error::{is_content_policy_signal, truncate_text, ServiceError};

mod dryrun;
mod gemini;
mod openai;

pub use dryrun::{DryrunImageProvider, DryrunTextProvider};
pub use gemini::{GeminiTextProvider, DEFAULT_GEMINI_API_BASE};
pub use openai::{OpenAiImageProvider, OpenAiTextProvider, DEFAULT_OPENAI_API_BASE};

/// A text-generation service.
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<String, ServiceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageServiceRequest {
    pub model: String,
    pub prompt: String,
    pub spec: ImageSpec,
}

/// An image-generation service.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;
    fn generate(&self, request: &ImageServiceRequest) -> Result<ImageResult, ServiceError>;
}

/// Providers keyed by name; registering a name twice replaces the first.
pub struct ProviderRegistry<P: ?Sized> {
    providers: BTreeMap<String, Box<P>>,
}

pub type TextProviderRegistry = ProviderRegistry<dyn TextProvider>;
pub type ImageProviderRegistry = ProviderRegistry<dyn ImageProvider>;

impl<P: ?Sized> Default for ProviderRegistry<P> {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }
}

impl<P: ?Sized> ProviderRegistry<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&P> {
        self.providers.get(name).map(|provider| provider.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

impl ProviderRegistry<dyn TextProvider> {
    pub fn register<T: TextProvider + 'static>(&mut self, provider: T) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }
}

impl ProviderRegistry<dyn ImageProvider> {
    pub fn register<T: ImageProvider + 'static>(&mut self, provider: T) {
        self.providers
            .insert(provider.name().to_string(), Box::new(provider));
    }
}

/// Reads a JSON body, turning HTTP failures into [`ServiceError`]s. Error bodies
/// that carry a content-policy marker become [`ServiceError::ContentPolicy`].
pub(crate) fn response_json_or_error(
    service: &str,
    response: HttpResponse,
) -> Result<Value, ServiceError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| anyhow::Error::new(err).context(format!("{service} response body read failed")))?;
    if !status.is_success() {
        let message = error_message_from_body(&body);
        if is_content_policy_signal(&body) {
            return Err(ServiceError::ContentPolicy(message));
        }
        return Err(ServiceError::unavailable(format!(
            "{service} request failed ({code}): {message}"
        )));
    }
    serde_json::from_str::<Value>(&body).map_err(|err| {
        ServiceError::Unavailable(
            anyhow::Error::new(err).context(format!("{service} returned invalid JSON payload")),
        )
    })
}

/// `error.message` from a JSON error body, or the truncated raw body.
fn error_message_from_body(body: &str) -> String {
    let message = serde_json::from_str::<Value>(body).ok().and_then(|payload| {
        let error = payload.get("error")?;
        error
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| error.as_str())
            .map(str::to_string)
    });
    match message {
        Some(message) if !message.trim().is_empty() => truncate_text(message.trim(), 512),
        _ => truncate_text(body.trim(), 512),
    }
}

pub(crate) fn trim_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

pub(crate) fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}

pub(crate) fn parse_dims(size: &str) -> Option<(u32, u32)> {
    let normalized = size.trim().to_ascii_lowercase();
    let (left, right) = normalized.split_once('x')?;
    let width = left.trim().parse::<u32>().ok()?;
    let height = right.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

#[cfg(test)]
mod tests {
    use quill_contracts::generation::GenerationRequest;

    use super::{error_message_from_body, parse_dims, TextProvider, TextProviderRegistry};
    use crate::error::ServiceError;

    struct Named(&'static str, &'static str);

    impl TextProvider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn generate(&self, _model: &str, _request: &GenerationRequest) -> Result<String, ServiceError> {
            Ok(self.1.to_string())
        }
    }

    #[test]
    fn registry_replaces_providers_with_the_same_name() -> anyhow::Result<()> {
        let mut registry = TextProviderRegistry::new();
        registry.register(Named("gemini", "first"));
        registry.register(Named("dryrun", "offline"));
        registry.register(Named("gemini", "second"));

        assert_eq!(registry.names(), vec!["dryrun", "gemini"]);
        let provider = registry
            .get("gemini")
            .ok_or_else(|| anyhow::anyhow!("missing gemini"))?;
        assert_eq!(provider.generate("m", &GenerationRequest::new("p"))?, "second");
        assert!(!registry.contains("openai"));
        Ok(())
    }

    #[test]
    fn error_message_prefers_json_error_message() {
        let body = r#"{"error": {"code": "content_policy_violation", "message": "Your request was rejected."}}"#;
        assert_eq!(error_message_from_body(body), "Your request was rejected.");
        assert_eq!(error_message_from_body("  plain failure "), "plain failure");
    }

    #[test]
    fn parse_dims_accepts_width_by_height() {
        assert_eq!(parse_dims("1792x1024"), Some((1792, 1024)));
        assert_eq!(parse_dims(" 512 X 256 "), Some((512, 256)));
        assert_eq!(parse_dims("wide"), None);
        assert_eq!(parse_dims("0x10"), None);
    }
}
