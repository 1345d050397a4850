use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use image::{Rgb, RgbImage};
use quill_contracts::generation::GenerationRequest;
use quill_contracts::imagery::ImageResult;
use sha2::{Digest, Sha256};

use super::{parse_dims, ImageProvider, ImageServiceRequest, TextProvider};
use crate::error::ServiceError;

/// Offline text provider. Output depends only on the model and the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunTextProvider;

impl DryrunTextProvider {
    pub fn new() -> Self {
        Self
    }
}

impl TextProvider for DryrunTextProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<String, ServiceError> {
        let digest = short_digest(&[model, &request.combined_input()]);
        let prompt_words = request.prompt_text().split_whitespace().count();
        Ok(format!(
            "Texto de ensaio {digest} gerado por {model}. O pedido tinha {prompt_words} palavras. O contexto acumulado tinha {} caracteres.",
            request.context_text().chars().count()
        ))
    }
}

/// Offline image provider. Writes a solid-colour PNG derived from the prompt
/// when an output directory is set, otherwise returns a `dryrun://` handle.
#[derive(Debug, Clone, Default)]
pub struct DryrunImageProvider {
    out_dir: Option<PathBuf>,
}

impl DryrunImageProvider {
    pub fn new(out_dir: Option<PathBuf>) -> Self {
        Self { out_dir }
    }
}

impl ImageProvider for DryrunImageProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ImageServiceRequest) -> Result<ImageResult, ServiceError> {
        let digest = short_digest(&[&request.model, &request.prompt]);
        let reference_handle = match self.out_dir.as_ref() {
            Some(out_dir) => {
                let (width, height) = parse_dims(&request.spec.size).unwrap_or((1024, 1024));
                fs::create_dir_all(out_dir)
                    .with_context(|| format!("failed to create {}", out_dir.display()))?;
                let path = out_dir.join(format!("dryrun-{digest}.png"));
                let (r, g, b) = color_from_prompt(&request.prompt);
                let mut image = RgbImage::new(width, height);
                for pixel in image.pixels_mut() {
                    *pixel = Rgb([r, g, b]);
                }
                image
                    .save(&path)
                    .with_context(|| format!("failed to save {}", path.display()))?;
                path.to_string_lossy().to_string()
            }
            None => format!("dryrun://{digest}"),
        };
        Ok(ImageResult {
            reference_handle,
            provider: self.name().to_string(),
            model: request.model.clone(),
            revised_prompt: None,
        })
    }
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(&hasher.finalize()[..4])
}
