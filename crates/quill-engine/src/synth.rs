use quill_contracts::document::Document;
use quill_contracts::generation::GenerationRequest;
use quill_contracts::imagery::ImagePrompt;
use tracing::{debug, info};

use crate::error::{PipelineError, ServiceError};
use crate::providers::TextProvider;

/// Longest slice of the document shown to the visual-prompt request.
pub const VISUAL_EXCERPT_CHARS: usize = 1000;
/// Longest slice of the document shown to the concept-description request.
pub const CONCEPT_EXCERPT_CHARS: usize = 500;
pub const PROMPT_STYLE_SUFFIX: &str =
    "Style: digital art, professional, elegant, suitable for all audiences.";

/// Turns a finished review into an image prompt, and optionally into a prose
/// description of the illustration concept.
pub struct ImagePromptSynthesizer<'a> {
    provider: &'a dyn TextProvider,
    model: &'a str,
}

impl<'a> ImagePromptSynthesizer<'a> {
    pub fn new(provider: &'a dyn TextProvider, model: &'a str) -> Self {
        Self { provider, model }
    }

    /// Meta-prompt over the first [`VISUAL_EXCERPT_CHARS`] characters of the review.
    pub fn meta_prompt(document: &Document, subject: &str) -> String {
        let excerpt = document.excerpt(VISUAL_EXCERPT_CHARS);
        format!(
            "Com base nesta resenha do livro '{subject}', crie um prompt em inglês para gerar uma ilustração artística e abstrata.

Resenha:
{excerpt}

Regras obrigatórias:
- Use apenas elementos simbólicos, metafóricos e abstratos
- NÃO inclua pessoas reconhecíveis, rostos realistas, marcas ou logotipos
- NÃO inclua violência, sangue, armas ou conteúdo adulto
- Prefira paisagens, objetos, cores e formas que evoquem o tema da obra
- Escreva no máximo duas frases

Responda SOMENTE com o prompt, seguindo o modelo:
Create a 9:6 artistic [style] illustration showing a [main subject] with [elements and atmosphere]"
        )
    }

    pub fn synthesize(&self, document: &Document, subject: &str) -> Result<ImagePrompt, PipelineError> {
        let request = GenerationRequest::new(Self::meta_prompt(document, subject));
        let raw = self
            .provider
            .generate(self.model, &request)
            .map_err(PipelineError::PromptSynthesis)?;
        let body = raw.trim();
        if body.is_empty() {
            return Err(PipelineError::PromptSynthesis(ServiceError::EmptyResponse(
                self.provider.name().to_string(),
            )));
        }
        let prompt = ImagePrompt::new(format!("{body} {PROMPT_STYLE_SUFFIX}"));
        info!(prompt_chars = prompt.as_str().chars().count(), "image prompt ready");
        Ok(prompt)
    }

    /// Prose description of the illustration, over the first
    /// [`CONCEPT_EXCERPT_CHARS`] characters of the review.
    pub fn describe_concept(&self, document: &Document) -> Result<String, PipelineError> {
        let excerpt = document.excerpt(CONCEPT_EXCERPT_CHARS);
        let prompt = format!(
            "Com base nesta resenha, descreva em português como seria uma ilustração que capture a essência da obra:

{excerpt}

Descreva:
1. Os principais elementos visuais
2. O simbolismo das cores e formas
3. A atmosfera geral
4. Como esses elementos se relacionam com os temas do livro"
        );
        debug!(excerpt_chars = excerpt.chars().count(), "describing visual concept");
        let raw = self
            .provider
            .generate(self.model, &GenerationRequest::new(prompt))
            .map_err(PipelineError::ConceptDescription)?;
        let description = raw.trim();
        if description.is_empty() {
            return Err(PipelineError::ConceptDescription(
                ServiceError::EmptyResponse(self.provider.name().to_string()),
            ));
        }
        Ok(description.to_string())
    }
}

#[cfg(test)]
mod tests {
    use quill_contracts::document::{Document, Paragraph};

    use super::{ImagePromptSynthesizer, PROMPT_STYLE_SUFFIX, VISUAL_EXCERPT_CHARS};
    use crate::error::PipelineError;
    use crate::test_support::{Reply, ScriptedText};

    fn long_document() -> Document {
        Document::new(
            (1..=4)
                .map(|stage_index| Paragraph {
                    stage_index,
                    text: format!("{stage_index}").repeat(600),
                })
                .collect(),
        )
    }

    #[test]
    fn meta_prompt_carries_a_bounded_excerpt() {
        let document = long_document();
        let prompt = ImagePromptSynthesizer::meta_prompt(&document, "Dom Casmurro");
        let excerpt: String = document.render().chars().take(VISUAL_EXCERPT_CHARS).collect();
        assert!(prompt.contains(&excerpt));
        assert!(!prompt.contains(&document.render().chars().take(VISUAL_EXCERPT_CHARS + 1).collect::<String>()));
        assert!(!prompt.contains("3333"));
        assert!(prompt.contains("Create a 9:6 artistic [style] illustration"));
    }

    #[test]
    fn synthesize_trims_and_appends_style_suffix() -> anyhow::Result<()> {
        let provider = ScriptedText::texts(
            "gemini",
            ["  Create a 9:6 artistic watercolor illustration showing a lonely house by the sea.\n"],
        );
        let synthesizer = ImagePromptSynthesizer::new(&provider, "gemini-pro");
        let prompt = synthesizer.synthesize(&long_document(), "Dom Casmurro")?;
        assert_eq!(
            prompt.as_str(),
            format!(
                "Create a 9:6 artistic watercolor illustration showing a lonely house by the sea. {PROMPT_STYLE_SUFFIX}"
            )
        );
        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].sampling().is_none());
        assert!(calls[0].context_text().is_empty());
        Ok(())
    }

    #[test]
    fn blank_or_failed_synthesis_is_reported() {
        let provider = ScriptedText::new(
            "gemini",
            [Reply::Ok("   ".to_string()), Reply::Fail("timeout".to_string())],
        );
        let synthesizer = ImagePromptSynthesizer::new(&provider, "gemini-pro");
        let document = long_document();
        assert!(matches!(
            synthesizer.synthesize(&document, "x"),
            Err(PipelineError::PromptSynthesis(_))
        ));
        assert!(matches!(
            synthesizer.synthesize(&document, "x"),
            Err(PipelineError::PromptSynthesis(_))
        ));
    }

    #[test]
    fn concept_description_sees_at_most_500_characters() -> anyhow::Result<()> {
        let provider = ScriptedText::texts("gemini", ["Um farol sob névoa azulada."]);
        let synthesizer = ImagePromptSynthesizer::new(&provider, "gemini-pro");
        let description = synthesizer.describe_concept(&long_document())?;
        assert_eq!(description, "Um farol sob névoa azulada.");

        let calls = provider.calls();
        assert!(calls[0].prompt_text().contains(&"1".repeat(500)));
        assert!(!calls[0].prompt_text().contains(&"1".repeat(501)));
        Ok(())
    }
}
