use serde::Serialize;

/// Raw text of every stage run so far, in order.
///
/// Appending returns a new transcript; a transcript already handed to a request
/// never changes underneath it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Transcript {
    entries: Vec<String>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn append(&self, text: &str) -> Self {
        let mut entries = Vec::with_capacity(self.entries.len() + 1);
        entries.extend(self.entries.iter().cloned());
        entries.push(text.to_string());
        Self { entries }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Each entry preceded by a newline; empty before the first stage.
    pub fn context_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push('\n');
            out.push_str(entry);
        }
        out
    }
}
