use quill_contracts::document::{Document, Paragraph};
use quill_contracts::generation::{GenerationRequest, SamplingParameters, StageOutput};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::denylist::Denylist;
use crate::error::{PipelineError, ServiceError};
use crate::format::format_paragraph;
use crate::providers::TextProvider;
use crate::stages::StageDescriptor;
use crate::transcript::Transcript;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "phrase", rename_all = "snake_case")]
pub enum FilterReason {
    Denylisted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum StageDisposition {
    Retained,
    Filtered { reason: FilterReason },
}

impl StageDisposition {
    pub fn is_retained(&self) -> bool {
        matches!(self, Self::Retained)
    }
}

/// What happened to one stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage_index: usize,
    pub label: String,
    #[serde(flatten)]
    pub disposition: StageDisposition,
    pub raw_chars: usize,
}

/// Outcome of the paragraph stages: the document plus the full transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentRun {
    pub document: Document,
    pub transcript: Transcript,
    pub stages: Vec<StageReport>,
}

/// Runs the stage schedule in order against one text model.
///
/// Every stage sees the raw text of all earlier stages as context, including
/// stages whose output was filtered out of the document.
pub struct ParagraphPipeline<'a> {
    provider: &'a dyn TextProvider,
    model: &'a str,
    stages: &'a [StageDescriptor],
    denylist: &'a Denylist,
}

impl<'a> ParagraphPipeline<'a> {
    pub fn new(
        provider: &'a dyn TextProvider,
        model: &'a str,
        stages: &'a [StageDescriptor],
        denylist: &'a Denylist,
    ) -> Self {
        Self {
            provider,
            model,
            stages,
            denylist,
        }
    }

    pub fn generate_document(&self, subject: &str) -> Result<DocumentRun, PipelineError> {
        self.generate_document_with(subject, |_, _| {})
    }

    /// Like [`Self::generate_document`], calling `on_stage` after each stage with its
    /// report and the transcript the next stage will receive.
    pub fn generate_document_with(
        &self,
        subject: &str,
        mut on_stage: impl FnMut(&StageReport, &Transcript),
    ) -> Result<DocumentRun, PipelineError> {
        if subject.trim().is_empty() {
            return Err(PipelineError::EmptySubject);
        }

        let mut transcript = Transcript::new();
        let mut retained: Vec<StageOutput> = Vec::new();
        let mut reports = Vec::with_capacity(self.stages.len());

        for (offset, stage) in self.stages.iter().enumerate() {
            let stage_index = offset + 1;
            let request = GenerationRequest::new(stage.render(subject))
                .with_context(transcript.context_text())
                .with_sampling(SamplingParameters::PRECISE);
            debug!(
                stage_index,
                label = %stage.label,
                context_chars = request.context_text().chars().count(),
                "requesting paragraph"
            );

            let raw = self
                .provider
                .generate(self.model, &request)
                .map_err(|source| PipelineError::Stage {
                    index: stage_index,
                    label: stage.label.clone(),
                    source,
                })?;
            let output = StageOutput {
                text: raw.trim().to_string(),
                stage_index,
            };
            if format_paragraph(&output.text).is_empty() {
                return Err(PipelineError::Stage {
                    index: stage_index,
                    label: stage.label.clone(),
                    source: ServiceError::EmptyResponse(self.provider.name().to_string()),
                });
            }

            let disposition = self.screen(&output.text);
            match &disposition {
                StageDisposition::Retained => {
                    info!(stage_index, label = %stage.label, "paragraph retained");
                }
                StageDisposition::Filtered { reason } => {
                    warn!(stage_index, label = %stage.label, ?reason, "paragraph filtered");
                }
            }

            transcript = transcript.append(&output.text);
            let report = StageReport {
                stage_index,
                label: stage.label.clone(),
                disposition,
                raw_chars: output.text.chars().count(),
            };
            on_stage(&report, &transcript);
            if report.disposition.is_retained() {
                retained.push(output);
            }
            reports.push(report);
        }

        let paragraphs = retained
            .into_iter()
            .map(|output| Paragraph {
                stage_index: output.stage_index,
                text: format_paragraph(&output.text),
            })
            .collect();
        Ok(DocumentRun {
            document: Document::new(paragraphs),
            transcript,
            stages: reports,
        })
    }

    fn screen(&self, text: &str) -> StageDisposition {
        if let Some(phrase) = self.denylist.matches(text) {
            return StageDisposition::Filtered {
                reason: FilterReason::Denylisted(phrase.to_string()),
            };
        }
        StageDisposition::Retained
    }
}
