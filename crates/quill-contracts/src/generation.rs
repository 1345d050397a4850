use serde::{Deserialize, Serialize};

/// Sampling knobs forwarded to the text service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParameters {
    pub temperature: f32,
    pub nucleus_threshold: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl SamplingParameters {
    /// Low-temperature settings used by every paragraph stage; later stages lean on
    /// earlier ones staying on topic.
    pub const PRECISE: Self = Self {
        temperature: 0.1,
        nucleus_threshold: 0.8,
        top_k: 40,
        max_output_tokens: 1024,
    };
}

/// One call to the text service. Built once, then only read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    prompt_text: String,
    context_text: String,
    sampling: Option<SamplingParameters>,
}

impl GenerationRequest {
    pub fn new(prompt_text: impl Into<String>) -> Self {
        Self {
            prompt_text: prompt_text.into(),
            context_text: String::new(),
            sampling: None,
        }
    }

    pub fn with_context(mut self, context_text: impl Into<String>) -> Self {
        self.context_text = context_text.into();
        self
    }

    pub fn with_sampling(mut self, sampling: SamplingParameters) -> Self {
        self.sampling = Some(sampling);
        self
    }

    pub fn prompt_text(&self) -> &str {
        &self.prompt_text
    }

    pub fn context_text(&self) -> &str {
        &self.context_text
    }

    /// `None` means the service's own defaults.
    pub fn sampling(&self) -> Option<&SamplingParameters> {
        self.sampling.as_ref()
    }

    /// Context followed by a blank line and the prompt, or just the prompt when
    /// there is no context yet.
    pub fn combined_input(&self) -> String {
        if self.context_text.trim().is_empty() {
            return self.prompt_text.clone();
        }
        format!("{}\n\n{}", self.context_text, self.prompt_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutput {
    pub text: String,
    pub stage_index: usize,
}
