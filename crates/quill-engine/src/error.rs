use std::error::Error as StdError;

use thiserror::Error;

/// Phrases an image service uses when its safety filter refuses a prompt.
const CONTENT_POLICY_MARKERS: [&str; 5] = [
    "content_policy_violation",
    "content filters",
    "content filter",
    "content policy",
    "safety system",
];

/// Failure of one external service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The image service refused the prompt on safety grounds.
    #[error("content policy rejection: {0}")]
    ContentPolicy(String),

    /// The service answered but produced no usable text.
    #[error("{0} returned an empty response")]
    EmptyResponse(String),

    /// Network, auth, quota or protocol failure.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(anyhow::Error::msg(message.into()))
    }

    /// True for explicit rejections and for generic failures whose message carries
    /// one of the known rejection phrases.
    pub fn is_content_policy(&self) -> bool {
        match self {
            Self::ContentPolicy(_) => true,
            Self::EmptyResponse(_) => false,
            Self::Unavailable(err) => is_content_policy_signal(&anyhow_chain_text(err, 4096)),
        }
    }
}

/// Pipeline failure, tagged with the stage that produced it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("subject line is empty")]
    EmptySubject,

    #[error("no {capability} model available: {reason}")]
    ModelUnavailable { capability: String, reason: String },

    #[error("paragraph stage {index} ({label}) failed")]
    Stage {
        index: usize,
        label: String,
        #[source]
        source: ServiceError,
    },

    #[error("image prompt synthesis failed")]
    PromptSynthesis(#[source] ServiceError),

    #[error("primary image call failed")]
    PrimaryImage(#[source] ServiceError),

    #[error("fallback image call failed after content-policy rejection ({rejection})")]
    FallbackImage {
        rejection: String,
        #[source]
        source: ServiceError,
    },

    #[error("concept description failed")]
    ConceptDescription(#[source] ServiceError),
}

impl PipelineError {
    /// Short name of the failing stage, used in events and CLI output.
    pub fn stage_name(&self) -> String {
        match self {
            Self::EmptySubject => "input".to_string(),
            Self::ModelUnavailable { capability, .. } => format!("{capability} model selection"),
            Self::Stage { index, .. } => format!("paragraph stage {index}"),
            Self::PromptSynthesis(_) => "prompt synthesis".to_string(),
            Self::PrimaryImage(_) => "primary image call".to_string(),
            Self::FallbackImage { .. } => "fallback image call".to_string(),
            Self::ConceptDescription(_) => "concept description".to_string(),
        }
    }
}

pub fn is_content_policy_signal(text: &str) -> bool {
    let lowered = text.to_lowercase();
    CONTENT_POLICY_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Joins an error and its sources into one line, collapsing repeats.
pub fn error_chain_text(err: &(dyn StdError + 'static), max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        push_chain_part(&mut parts, cause.to_string());
        current = cause.source();
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn anyhow_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        push_chain_part(&mut parts, cause.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

fn push_chain_part(parts: &mut Vec<String>, text: String) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if parts
        .last()
        .map(|existing| existing == trimmed)
        .unwrap_or(false)
    {
        return;
    }
    parts.push(trimmed.to_string());
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
