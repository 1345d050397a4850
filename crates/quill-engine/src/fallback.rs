use quill_contracts::imagery::{ImagePrompt, ImageResult, ImageSpec};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{error_chain_text, PipelineError, ServiceError};
use crate::providers::{ImageProvider, ImageServiceRequest};

pub const PRIMARY_SAFETY_SUFFIX: &str =
    "Safe for all audiences, non-controversial, abstract artistic style.";

/// Sent instead of the synthesized prompt after a content-policy rejection.
pub const FALLBACK_PROMPT: &str = "Create an abstract artistic illustration representing literature and storytelling: an open book with pages turning into flowing ribbons of color, soft geometric shapes and warm light. Digital art, elegant, minimalist, safe for all audiences, no people, no text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImagePhase {
    Primary,
    Fallback,
}

/// A successful image call and how it was reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedImage {
    pub image: ImageResult,
    pub phase: ImagePhase,
    pub prompt_sent: String,
    /// The primary rejection message when the fallback produced the image.
    pub rejection: Option<String>,
}

enum PrimaryAttempt {
    Success(ImageResult),
    Rejected(String),
    Failed(ServiceError),
}

/// Primary call with the safety suffix; on a content-policy rejection, exactly
/// one more call with [`FALLBACK_PROMPT`]. Other failures are final.
pub struct FallbackController<'a> {
    provider: &'a dyn ImageProvider,
    model: &'a str,
    spec: ImageSpec,
}

impl<'a> FallbackController<'a> {
    pub fn new(provider: &'a dyn ImageProvider, model: &'a str) -> Self {
        Self::with_spec(provider, model, ImageSpec::wide_standard())
    }

    pub fn with_spec(provider: &'a dyn ImageProvider, model: &'a str, spec: ImageSpec) -> Self {
        Self {
            provider,
            model,
            spec,
        }
    }

    pub fn generate_image(&self, prompt: &ImagePrompt) -> Result<GeneratedImage, PipelineError> {
        let primary_prompt = format!("{} {PRIMARY_SAFETY_SUFFIX}", prompt.as_str().trim());
        let rejection = match self.attempt_primary(&primary_prompt) {
            PrimaryAttempt::Success(image) => {
                info!(handle = %image.reference_handle, "primary image generated");
                return Ok(GeneratedImage {
                    image,
                    phase: ImagePhase::Primary,
                    prompt_sent: primary_prompt,
                    rejection: None,
                });
            }
            PrimaryAttempt::Failed(source) => return Err(PipelineError::PrimaryImage(source)),
            PrimaryAttempt::Rejected(rejection) => rejection,
        };

        warn!(%rejection, "primary image prompt rejected; retrying with generic prompt");
        match self.call(FALLBACK_PROMPT) {
            Ok(image) => {
                info!(handle = %image.reference_handle, "fallback image generated");
                Ok(GeneratedImage {
                    image,
                    phase: ImagePhase::Fallback,
                    prompt_sent: FALLBACK_PROMPT.to_string(),
                    rejection: Some(rejection),
                })
            }
            Err(source) => Err(PipelineError::FallbackImage { rejection, source }),
        }
    }

    fn attempt_primary(&self, prompt: &str) -> PrimaryAttempt {
        match self.call(prompt) {
            Ok(image) => PrimaryAttempt::Success(image),
            Err(ServiceError::ContentPolicy(message)) => PrimaryAttempt::Rejected(message),
            Err(err) if err.is_content_policy() => {
                PrimaryAttempt::Rejected(error_chain_text(&err, 512))
            }
            Err(err) => PrimaryAttempt::Failed(err),
        }
    }

    fn call(&self, prompt: &str) -> Result<ImageResult, ServiceError> {
        self.provider.generate(&ImageServiceRequest {
            model: self.model.to_string(),
            prompt: prompt.to_string(),
            spec: self.spec.clone(),
        })
    }
}
