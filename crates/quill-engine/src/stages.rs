pub const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// One step of the review schedule: a label for reporting and a prompt
/// template with a `{subject}` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDescriptor {
    pub label: String,
    pub template: String,
}

impl StageDescriptor {
    pub fn new(label: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            template: template.into(),
        }
    }

    /// Embeds the subject line verbatim; no parsing of title or author.
    pub fn render(&self, subject: &str) -> String {
        self.template.replace(SUBJECT_PLACEHOLDER, subject)
    }
}

const REVIEW_OUTLINE: &str = "\
Atuando como crítico literário, você vai redigir uma resenha acadêmica de '{subject}' em quatro parágrafos:

1. Introdução: a obra e o autor em seu contexto
2. Análise: técnica narrativa e estilo
3. Interpretação: temas centrais e simbolismo
4. Avaliação: a contribuição da obra para a literatura";

/// The fixed four-paragraph review schedule.
pub fn review_schedule() -> Vec<StageDescriptor> {
    vec![
        StageDescriptor::new(
            "contextualização",
            format!(
                "{REVIEW_OUTLINE}\n\nRedija SOMENTE o primeiro parágrafo, situando a obra e o autor no período histórico e no contexto literário em que surgiram:"
            ),
        ),
        StageDescriptor::new(
            "análise",
            "Levando em conta o texto anterior sobre '{subject}', redija SOMENTE o segundo parágrafo, analisando a estrutura narrativa, o estilo de escrita e as técnicas literárias empregadas:",
        ),
        StageDescriptor::new(
            "interpretação",
            "A partir dos parágrafos anteriores sobre '{subject}', redija SOMENTE o terceiro parágrafo, explorando os temas centrais, os simbolismos e os significados mais profundos da obra:",
        ),
        StageDescriptor::new(
            "avaliação",
            "Para concluir a resenha de '{subject}', redija SOMENTE o parágrafo final com uma avaliação crítica da contribuição da obra para a literatura, SEM repetir conclusões já apresentadas:",
        ),
    ]
}
