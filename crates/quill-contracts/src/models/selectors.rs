use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_default(),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        self.select_available(requested, capability, |_| true)
    }

    /// Like [`ModelSelector::select`], but only models whose provider passes
    /// `provider_available` are eligible. A requested model with an unavailable
    /// provider falls back to the first eligible model and says why.
    pub fn select_available(
        &self,
        requested: Option<&str>,
        capability: &str,
        provider_available: impl Fn(&str) -> bool,
    ) -> Result<ModelSelection, String> {
        let requested_value = requested
            .map(str::trim)
            .filter(|value| !value.is_empty());

        let fallback_reason = if let Some(requested_value) = requested_value {
            match self.registry.ensure(requested_value, capability) {
                Some(model) if provider_available(&model.provider) => {
                    return Ok(ModelSelection {
                        model,
                        requested: Some(requested_value.to_string()),
                        fallback_reason: None,
                    });
                }
                Some(model) => format!(
                    "Provider '{}' for model '{requested_value}' is not registered.",
                    model.provider
                ),
                None => format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                ),
            }
        } else {
            "No model specified; using default.".to_string()
        };

        let candidates = self.registry.by_capability(capability);
        if candidates.is_empty() {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        }
        let Some(model) = candidates
            .into_iter()
            .find(|candidate| provider_available(&candidate.provider))
        else {
            return Err(format!(
                "No registered provider serves capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_value.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use crate::models::{ModelRegistry, ModelSelector, ModelSpec, IMAGE, TEXT};

    fn model(name: &str, provider: &str, capability: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: vec![capability.to_string()],
            context_window: None,
        }
    }

    fn registry(models: &[ModelSpec]) -> ModelRegistry {
        let mut map = IndexMap::new();
        for spec in models {
            map.insert(spec.name.clone(), spec.clone());
        }
        ModelRegistry::new(Some(map))
    }

    #[test]
    fn requested_model_is_used_when_available() {
        let selection = ModelSelector::new(Some(registry(&[
            model("gemini-pro", "gemini", TEXT),
            model("gpt-4o-mini", "openai", TEXT),
        ])))
        .select(Some("gpt-4o-mini"), TEXT)
        .unwrap();
        assert_eq!(selection.model.name, "gpt-4o-mini");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn unknown_model_falls_back_with_reason() {
        let selection = ModelSelector::new(Some(registry(&[model(
            "dall-e-3", "openai", IMAGE,
        )])))
        .select(Some("missing"), IMAGE)
        .unwrap();
        assert_eq!(selection.model.name, "dall-e-3");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'image'.")
        );
    }

    #[test]
    fn no_request_uses_default_with_explanation() {
        let selection = ModelSelector::new(Some(registry(&[model(
            "gemini-pro", "gemini", TEXT,
        )])))
        .select(None, TEXT)
        .unwrap();
        assert_eq!(selection.model.name, "gemini-pro");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn unregistered_provider_is_skipped() {
        let selection = ModelSelector::new(Some(registry(&[
            model("gemini-pro", "gemini", TEXT),
            model("dryrun-text-1", "dryrun", TEXT),
        ])))
        .select_available(Some("gemini-pro"), TEXT, |provider| provider == "dryrun")
        .unwrap();
        assert_eq!(selection.model.name, "dryrun-text-1");
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Provider 'gemini' for model 'gemini-pro' is not registered.")
        );
    }

    #[test]
    fn errors_when_no_models_for_capability() {
        let err = ModelSelector::new(Some(registry(&[model("text-only", "dryrun", TEXT)])))
            .select(Some("dall-e-3"), IMAGE)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'image'.");
    }

    #[test]
    fn errors_when_no_provider_serves_capability() {
        let err = ModelSelector::new(Some(registry(&[model("dall-e-3", "openai", IMAGE)])))
            .select_available(None, IMAGE, |_| false)
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No registered provider serves capability 'image'.");
    }
}
