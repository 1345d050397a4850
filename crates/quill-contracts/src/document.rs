use serde::Serialize;

pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paragraph {
    pub stage_index: usize,
    pub text: String,
}

/// The retained, formatted paragraphs of one run, in generation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Document {
    paragraphs: Vec<Paragraph>,
}

impl Document {
    pub fn new(paragraphs: Vec<Paragraph>) -> Self {
        Self { paragraphs }
    }

    pub fn paragraphs(&self) -> &[Paragraph] {
        &self.paragraphs
    }

    pub fn len(&self) -> usize {
        self.paragraphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }

    pub fn render(&self) -> String {
        self.paragraphs
            .iter()
            .map(|paragraph| paragraph.text.as_str())
            .collect::<Vec<&str>>()
            .join(PARAGRAPH_SEPARATOR)
    }

    /// The first `max_chars` characters of the rendered text.
    pub fn excerpt(&self, max_chars: usize) -> String {
        self.render().chars().take(max_chars).collect()
    }
}
