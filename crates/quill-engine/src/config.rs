use std::env;
use std::fmt;
use std::path::PathBuf;

use anyhow::Result;

use crate::denylist::Denylist;
use crate::providers::{DEFAULT_GEMINI_API_BASE, DEFAULT_OPENAI_API_BASE};
use crate::stages::{review_schedule, StageDescriptor};

pub const DEFAULT_TEXT_MODEL: &str = "gemini-pro";
pub const DEFAULT_IMAGE_MODEL: &str = "dall-e-3";

/// API keys handed to the service clients at construction.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub google_api_key: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            google_api_key: first_non_empty_env(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            openai_api_key: first_non_empty_env(&["OPENAI_API_KEY", "OPENAI_API_KEY_BACKUP"]),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("google_api_key", &redacted(&self.google_api_key))
            .field("openai_api_key", &redacted(&self.openai_api_key))
            .finish()
    }
}

fn redacted(value: &Option<String>) -> &'static str {
    if value.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoints {
    pub gemini_api_base: String,
    pub openai_api_base: String,
}

impl Default for ServiceEndpoints {
    fn default() -> Self {
        Self {
            gemini_api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            openai_api_base: DEFAULT_OPENAI_API_BASE.to_string(),
        }
    }
}

impl ServiceEndpoints {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gemini_api_base: non_empty_env("GEMINI_API_BASE").unwrap_or(defaults.gemini_api_base),
            openai_api_base: non_empty_env("OPENAI_API_BASE").unwrap_or(defaults.openai_api_base),
        }
    }
}

/// Everything one [`crate::ReviewEngine`] needs besides its providers.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    /// Where image providers write files; `None` keeps results as URLs or handles.
    pub out_dir: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
    pub denylist: Denylist,
    pub stages: Vec<StageDescriptor>,
    pub generate_image: bool,
    pub describe_concept: bool,
    pub credentials: Credentials,
    pub endpoints: ServiceEndpoints,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            text_model: Some(DEFAULT_TEXT_MODEL.to_string()),
            image_model: Some(DEFAULT_IMAGE_MODEL.to_string()),
            out_dir: None,
            events_path: None,
            denylist: Denylist::builtin(),
            stages: review_schedule(),
            generate_image: true,
            describe_concept: true,
            credentials: Credentials::default(),
            endpoints: ServiceEndpoints::default(),
        }
    }
}

impl EngineConfig {
    /// Defaults overlaid with `QUILL_TEXT_MODEL`, `QUILL_IMAGE_MODEL`, `QUILL_OUT_DIR`,
    /// `QUILL_EVENTS_PATH`, `QUILL_DENYLIST_PATH`, API keys and API bases.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let denylist_path = non_empty_env("QUILL_DENYLIST_PATH").map(PathBuf::from);
        Ok(Self {
            text_model: non_empty_env("QUILL_TEXT_MODEL").or(defaults.text_model),
            image_model: non_empty_env("QUILL_IMAGE_MODEL").or(defaults.image_model),
            out_dir: non_empty_env("QUILL_OUT_DIR").map(PathBuf::from),
            events_path: non_empty_env("QUILL_EVENTS_PATH").map(PathBuf::from),
            denylist: Denylist::load(denylist_path.as_deref())?,
            credentials: Credentials::from_env(),
            endpoints: ServiceEndpoints::from_env(),
            ..defaults
        })
    }
}

pub fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn first_non_empty_env(keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty_env(key))
}

#[cfg(test)]
mod tests {
    use super::{Credentials, EngineConfig, DEFAULT_IMAGE_MODEL, DEFAULT_TEXT_MODEL};

    #[test]
    fn debug_output_never_shows_keys() {
        let credentials = Credentials {
            google_api_key: Some("AIza-secret".to_string()),
            openai_api_key: None,
        };
        let rendered = format!("{credentials:?}");
        assert!(!rendered.contains("AIza-secret"));
        assert!(rendered.contains("<set>"));
        assert!(rendered.contains("<unset>"));
    }

    #[test]
    fn defaults_run_the_full_pipeline() {
        let config = EngineConfig::default();
        assert_eq!(config.text_model.as_deref(), Some(DEFAULT_TEXT_MODEL));
        assert_eq!(config.image_model.as_deref(), Some(DEFAULT_IMAGE_MODEL));
        assert_eq!(config.stages.len(), 4);
        assert!(config.generate_image);
        assert!(config.describe_concept);
        assert!(!config.denylist.is_empty());
    }
}
