use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use quill_contracts::generation::GenerationRequest;
use quill_contracts::imagery::ImageResult;

use crate::error::ServiceError;
use crate::providers::{ImageProvider, ImageServiceRequest, TextProvider};

/// One canned answer from a scripted provider.
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Reject(String),
    Fail(String),
}

impl Reply {
    fn into_result(self) -> Result<String, ServiceError> {
        match self {
            Self::Ok(text) => Ok(text),
            Self::Reject(message) => Err(ServiceError::ContentPolicy(message)),
            Self::Fail(message) => Err(ServiceError::unavailable(message)),
        }
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Text provider that answers from a queue and records every request.
pub struct ScriptedText {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedText {
    pub fn new(name: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn texts<'a>(name: &str, texts: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(name, texts.into_iter().map(|text| Reply::Ok(text.to_string())))
    }

    pub fn calls(&self) -> Vec<GenerationRequest> {
        locked(&self.calls).clone()
    }
}

impl TextProvider for ScriptedText {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, _model: &str, request: &GenerationRequest) -> Result<String, ServiceError> {
        locked(&self.calls).push(request.clone());
        match locked(&self.replies).pop_front() {
            Some(reply) => reply.into_result(),
            None => Err(ServiceError::unavailable("script exhausted")),
        }
    }
}

/// Image provider that answers from a queue and records every request.
pub struct ScriptedImage {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<ImageServiceRequest>>,
}

impl ScriptedImage {
    pub fn new(name: &str, replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ImageServiceRequest> {
        locked(&self.calls).clone()
    }
}

impl ImageProvider for ScriptedImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, request: &ImageServiceRequest) -> Result<ImageResult, ServiceError> {
        locked(&self.calls).push(request.clone());
        let reply = locked(&self.replies)
            .pop_front()
            .unwrap_or_else(|| Reply::Fail("script exhausted".to_string()));
        let reference_handle = reply.into_result()?;
        Ok(ImageResult {
            reference_handle,
            provider: self.name.clone(),
            model: request.model.clone(),
            revised_prompt: None,
        })
    }
}

impl<T: TextProvider> TextProvider for Arc<T> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn generate(&self, model: &str, request: &GenerationRequest) -> Result<String, ServiceError> {
        self.as_ref().generate(model, request)
    }
}

impl<T: ImageProvider> ImageProvider for Arc<T> {
    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn generate(&self, request: &ImageServiceRequest) -> Result<ImageResult, ServiceError> {
        self.as_ref().generate(request)
    }
}
