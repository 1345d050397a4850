pub mod config;
pub mod denylist;
pub mod error;
pub mod fallback;
pub mod format;
pub mod pipeline;
pub mod providers;
pub mod stages;
pub mod synth;
pub mod transcript;

#[cfg(test)]
mod test_support;

use quill_contracts::document::Document;
use quill_contracts::events::{new_run_id, EventPayload, EventWriter};
use quill_contracts::imagery::ImagePrompt;
use quill_contracts::models::{ModelSelection, ModelSelector, IMAGE, TEXT};
use serde_json::{json, Map, Value};
use tracing::{info, info_span, warn};

use crate::config::EngineConfig;
use crate::error::{error_chain_text, PipelineError};
use crate::fallback::{FallbackController, GeneratedImage, ImagePhase};
use crate::pipeline::{FilterReason, ParagraphPipeline, StageDisposition, StageReport};
use crate::providers::{
    DryrunImageProvider, DryrunTextProvider, GeminiTextProvider, ImageProviderRegistry,
    OpenAiImageProvider, OpenAiTextProvider, TextProviderRegistry,
};
use crate::synth::ImagePromptSynthesizer;
use crate::transcript::Transcript;

const DEFAULT_CONTEXT_WINDOW: u64 = 8192;
const ERROR_TEXT_CHARS: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub used_tokens: u64,
    pub max_tokens: u64,
    pub pct: f64,
    pub alert_level: String,
}

#[derive(Debug)]
pub enum ImageOutcome {
    /// Image generation was turned off for this run.
    Skipped,
    Generated(GeneratedImage),
    /// Prompt synthesis, the primary call, or the fallback call failed.
    Failed(PipelineError),
}

#[derive(Debug)]
pub enum ConceptOutcome {
    Skipped,
    Described(String),
    Failed(PipelineError),
}

/// Everything one review run produced. The document is complete even when the
/// image or concept steps failed.
#[derive(Debug)]
pub struct ReviewRun {
    pub run_id: String,
    pub subject: String,
    pub text_model: String,
    pub image_model: Option<String>,
    pub document: Document,
    pub transcript: Transcript,
    pub stages: Vec<StageReport>,
    pub image_prompt: Option<ImagePrompt>,
    pub image: ImageOutcome,
    pub concept: ConceptOutcome,
}

impl ReviewRun {
    pub fn image_reference(&self) -> Option<&str> {
        match &self.image {
            ImageOutcome::Generated(generated) => Some(generated.image.reference_handle.as_str()),
            _ => None,
        }
    }

    pub fn concept_description(&self) -> Option<&str> {
        match &self.concept {
            ConceptOutcome::Described(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Failures that did not abort the run.
    pub fn failures(&self) -> Vec<&PipelineError> {
        let mut failures = Vec::new();
        if let ImageOutcome::Failed(err) = &self.image {
            failures.push(err);
        }
        if let ConceptOutcome::Failed(err) = &self.concept {
            failures.push(err);
        }
        failures
    }

    pub fn to_report(&self) -> Value {
        let image = match &self.image {
            ImageOutcome::Skipped => json!({ "status": "skipped" }),
            ImageOutcome::Generated(generated) => json!({
                "status": "generated",
                "reference": generated.image.reference_handle,
                "provider": generated.image.provider,
                "model": generated.image.model,
                "phase": generated.phase,
                "prompt_sent": generated.prompt_sent,
                "revised_prompt": generated.image.revised_prompt,
                "rejection": generated.rejection,
            }),
            ImageOutcome::Failed(err) => json!({
                "status": "failed",
                "error": failure_payload(err),
            }),
        };
        let concept = match &self.concept {
            ConceptOutcome::Skipped => json!({ "status": "skipped" }),
            ConceptOutcome::Described(text) => json!({ "status": "described", "text": text }),
            ConceptOutcome::Failed(err) => json!({
                "status": "failed",
                "error": failure_payload(err),
            }),
        };
        json!({
            "run_id": self.run_id,
            "subject": self.subject,
            "text_model": self.text_model,
            "image_model": self.image_model,
            "document": self.document.render(),
            "paragraphs": self.document.paragraphs(),
            "stages": self.stages,
            "image_prompt": self.image_prompt,
            "image": image,
            "concept": concept,
        })
    }
}

/// Wires the paragraph pipeline, prompt synthesis, the image fallback
/// controller and concept description for one subject at a time.
pub struct ReviewEngine {
    config: EngineConfig,
    model_selector: ModelSelector,
    text_providers: TextProviderRegistry,
    image_providers: ImageProviderRegistry,
}

impl ReviewEngine {
    pub fn new(config: EngineConfig) -> Self {
        let text_providers = default_text_providers(&config);
        let image_providers = default_image_providers(&config);
        Self::with_providers(config, text_providers, image_providers)
    }

    pub fn with_providers(
        config: EngineConfig,
        text_providers: TextProviderRegistry,
        image_providers: ImageProviderRegistry,
    ) -> Self {
        Self {
            config,
            model_selector: ModelSelector::default(),
            text_providers,
            image_providers,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run(&self, subject: &str) -> Result<ReviewRun, PipelineError> {
        if subject.trim().is_empty() {
            return Err(PipelineError::EmptySubject);
        }
        let run_id = new_run_id();
        let span = info_span!("review", run_id = %run_id);
        let _entered = span.enter();
        let events = self
            .config
            .events_path
            .as_ref()
            .map(|path| EventWriter::new(path, run_id.clone()));
        let events = events.as_ref();

        info!(subject, "review started");
        emit(events, "run_started", json!({ "subject": subject }));

        let text_selection = match self.select_text_model() {
            Ok(selection) => selection,
            Err(err) => return Err(abort_run(events, err)),
        };
        emit_model_selected(events, TEXT, &text_selection);
        let text_model = text_selection.model.name.clone();
        let Some(text_provider) = self.text_providers.get(&text_selection.model.provider) else {
            return Err(abort_run(
                events,
                PipelineError::ModelUnavailable {
                    capability: TEXT.to_string(),
                    reason: format!("provider '{}' missing", text_selection.model.provider),
                },
            ));
        };
        let max_tokens = text_selection
            .model
            .context_window
            .unwrap_or(DEFAULT_CONTEXT_WINDOW);

        let pipeline = ParagraphPipeline::new(
            text_provider,
            &text_model,
            &self.config.stages,
            &self.config.denylist,
        );
        let document_run = pipeline.generate_document_with(subject, |report, transcript| {
            emit_stage(events, report);
            let usage = context_usage(&transcript.context_text(), max_tokens);
            emit(
                events,
                "context_window_update",
                json!({
                    "model": text_model,
                    "used_tokens": usage.used_tokens,
                    "max_tokens": usage.max_tokens,
                    "pct": usage.pct,
                    "alert_level": usage.alert_level,
                }),
            );
        });
        let document_run = match document_run {
            Ok(document_run) => document_run,
            Err(err) => return Err(abort_run(events, err)),
        };
        info!(paragraphs = document_run.document.len(), "document ready");
        emit(
            events,
            "document_ready",
            json!({
                "paragraphs": document_run.document.len(),
                "chars": document_run.document.render().chars().count(),
            }),
        );

        let synthesizer = ImagePromptSynthesizer::new(text_provider, &text_model);
        let mut image_model = None;
        let mut image_prompt = None;
        let image = if !self.config.generate_image {
            ImageOutcome::Skipped
        } else {
            match synthesizer.synthesize(&document_run.document, subject) {
                Ok(prompt) => {
                    emit(
                        events,
                        "image_prompt_ready",
                        json!({ "prompt": prompt.as_str() }),
                    );
                    let outcome = self.generate_image(events, &prompt, &mut image_model);
                    image_prompt = Some(prompt);
                    outcome
                }
                Err(err) => {
                    emit(events, "image_prompt_failed", failure_payload(&err));
                    ImageOutcome::Failed(err)
                }
            }
        };

        let concept = if !self.config.describe_concept || image_prompt.is_none() {
            ConceptOutcome::Skipped
        } else {
            match synthesizer.describe_concept(&document_run.document) {
                Ok(text) => {
                    emit(
                        events,
                        "concept_ready",
                        json!({ "chars": text.chars().count() }),
                    );
                    ConceptOutcome::Described(text)
                }
                Err(err) => {
                    emit(events, "concept_failed", failure_payload(&err));
                    ConceptOutcome::Failed(err)
                }
            }
        };

        let run = ReviewRun {
            run_id: run_id.clone(),
            subject: subject.to_string(),
            text_model,
            image_model,
            document: document_run.document,
            transcript: document_run.transcript,
            stages: document_run.stages,
            image_prompt,
            image,
            concept,
        };
        for failure in run.failures() {
            warn!(stage = %failure.stage_name(), error = %error_chain_text(failure, ERROR_TEXT_CHARS), "review step failed");
        }
        emit(
            events,
            "run_finished",
            json!({
                "status": "ok",
                "paragraphs": run.document.len(),
                "image": run.image_reference(),
                "failures": run.failures().len(),
            }),
        );
        info!(paragraphs = run.document.len(), "review finished");
        Ok(run)
    }

    fn select_text_model(&self) -> Result<ModelSelection, PipelineError> {
        self.model_selector
            .select_available(self.config.text_model.as_deref(), TEXT, |provider| {
                self.text_providers.contains(provider)
            })
            .map_err(|reason| PipelineError::ModelUnavailable {
                capability: TEXT.to_string(),
                reason,
            })
    }

    fn generate_image(
        &self,
        events: Option<&EventWriter>,
        prompt: &ImagePrompt,
        image_model: &mut Option<String>,
    ) -> ImageOutcome {
        let selection = match self.model_selector.select_available(
            self.config.image_model.as_deref(),
            IMAGE,
            |provider| self.image_providers.contains(provider),
        ) {
            Ok(selection) => selection,
            Err(reason) => {
                let err = PipelineError::ModelUnavailable {
                    capability: IMAGE.to_string(),
                    reason,
                };
                emit(events, "image_failed", failure_payload(&err));
                return ImageOutcome::Failed(err);
            }
        };
        emit_model_selected(events, IMAGE, &selection);
        *image_model = Some(selection.model.name.clone());
        let Some(provider) = self.image_providers.get(&selection.model.provider) else {
            let err = PipelineError::ModelUnavailable {
                capability: IMAGE.to_string(),
                reason: format!("provider '{}' missing", selection.model.provider),
            };
            emit(events, "image_failed", failure_payload(&err));
            return ImageOutcome::Failed(err);
        };

        let controller = FallbackController::new(provider, &selection.model.name);
        match controller.generate_image(prompt) {
            Ok(generated) => {
                if let Some(rejection) = generated.rejection.as_deref() {
                    emit(events, "image_rejected", json!({ "rejection": rejection }));
                }
                emit(
                    events,
                    "image_generated",
                    json!({
                        "reference": generated.image.reference_handle,
                        "phase": generated.phase,
                        "model": generated.image.model,
                        "fallback": generated.phase == ImagePhase::Fallback,
                    }),
                );
                ImageOutcome::Generated(generated)
            }
            Err(err) => {
                if let PipelineError::FallbackImage { rejection, .. } = &err {
                    emit(events, "image_rejected", json!({ "rejection": rejection }));
                }
                emit(events, "image_failed", failure_payload(&err));
                ImageOutcome::Failed(err)
            }
        }
    }
}

pub fn default_text_providers(config: &EngineConfig) -> TextProviderRegistry {
    let mut registry = TextProviderRegistry::new();
    registry.register(GeminiTextProvider::new(
        config.credentials.google_api_key.clone(),
        &config.endpoints.gemini_api_base,
    ));
    registry.register(OpenAiTextProvider::new(
        config.credentials.openai_api_key.clone(),
        &config.endpoints.openai_api_base,
    ));
    registry.register(DryrunTextProvider::new());
    registry
}

pub fn default_image_providers(config: &EngineConfig) -> ImageProviderRegistry {
    let mut registry = ImageProviderRegistry::new();
    registry.register(OpenAiImageProvider::new(
        config.credentials.openai_api_key.clone(),
        &config.endpoints.openai_api_base,
        config.out_dir.clone(),
    ));
    registry.register(DryrunImageProvider::new(config.out_dir.clone()));
    registry
}

pub fn context_usage(text: &str, max_tokens: u64) -> ContextUsage {
    let used_tokens = estimate_tokens(text);
    let pct = if max_tokens == 0 {
        0.0
    } else {
        used_tokens as f64 / max_tokens as f64
    }
    .clamp(0.0, 1.0);
    let alert_level = if pct >= 0.95 {
        "critical"
    } else if pct >= 0.9 {
        "high"
    } else if pct >= 0.75 {
        "medium"
    } else {
        "none"
    }
    .to_string();
    ContextUsage {
        used_tokens,
        max_tokens,
        pct,
        alert_level,
    }
}

fn estimate_tokens(text: &str) -> u64 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() as f64) / 4.0).ceil() as u64
}

fn emit_stage(events: Option<&EventWriter>, report: &StageReport) {
    match &report.disposition {
        StageDisposition::Retained => emit(
            events,
            "stage_completed",
            json!({
                "stage_index": report.stage_index,
                "label": report.label,
                "raw_chars": report.raw_chars,
            }),
        ),
        StageDisposition::Filtered { reason } => {
            let FilterReason::Denylisted(phrase) = reason;
            emit(
                events,
                "stage_filtered",
                json!({
                    "stage_index": report.stage_index,
                    "label": report.label,
                    "reason": "denylisted",
                    "phrase": phrase,
                }),
            );
        }
    }
}

fn emit_model_selected(events: Option<&EventWriter>, capability: &str, selection: &ModelSelection) {
    if let Some(reason) = selection.fallback_reason.as_deref() {
        info!(capability, model = %selection.model.name, reason, "model fallback");
    }
    emit(
        events,
        "model_selected",
        json!({
            "capability": capability,
            "model": selection.model.name,
            "provider": selection.model.provider,
            "requested": selection.requested,
            "fallback_reason": selection.fallback_reason,
        }),
    );
}

/// Logs a run-ending failure and closes the event log for the run.
fn abort_run(events: Option<&EventWriter>, err: PipelineError) -> PipelineError {
    warn!(stage = %err.stage_name(), error = %error_chain_text(&err, ERROR_TEXT_CHARS), "review aborted");
    emit(events, "stage_failed", failure_payload(&err));
    emit(events, "run_finished", json!({ "status": "failed" }));
    err
}

fn failure_payload(err: &PipelineError) -> Value {
    json!({
        "stage": err.stage_name(),
        "message": error_chain_text(err, ERROR_TEXT_CHARS),
    })
}

/// Event-log failures never fail a run.
fn emit(events: Option<&EventWriter>, event_type: &str, payload: Value) {
    let Some(events) = events else {
        return;
    };
    if let Err(err) = events.emit(event_type, map_object(payload)) {
        warn!(event_type, error = %err, "failed to write event");
    }
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_else(Map::new)
}
