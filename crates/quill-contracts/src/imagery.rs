use std::fmt;

use serde::Serialize;

/// A visual prompt ready for the image service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ImagePrompt(String);

impl ImagePrompt {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ImagePrompt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Size, quality and count requested from the image service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSpec {
    pub size: String,
    pub quality: String,
    pub n: u32,
}

impl ImageSpec {
    pub fn wide_standard() -> Self {
        Self {
            size: "1792x1024".to_string(),
            quality: "standard".to_string(),
            n: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageResult {
    /// URL, local file path, or an opaque provider id.
    pub reference_handle: String,
    pub provider: String,
    pub model: String,
    pub revised_prompt: Option<String>,
}
