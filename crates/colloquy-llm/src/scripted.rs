//! Deterministic in-process [`LanguageModel`] for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::provider::{ChunkStream, LanguageModel, ModelRequest, ProviderChunk};

/// What one call to [`LanguageModel::stream`] produces.
#[derive(Debug, Clone)]
pub enum Step {
    Chunks(Vec<ProviderChunk>),
    /// Emits the chunks, then fails with the message.
    FailAfter(Vec<ProviderChunk>, String),
    FailToStart(String),
}

#[derive(Default)]
pub struct ScriptedModel {
    steps: Mutex<VecDeque<Step>>,
    repeat: Option<Step>,
    completion: Option<String>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Self::default()
        }
    }

    /// Answers every call with the same step.
    pub fn repeating(step: Step) -> Self {
        Self {
            repeat: Some(step),
            ..Self::default()
        }
    }

    pub fn with_completion(mut self, text: &str) -> Self {
        self.completion = Some(text.to_string());
        self
    }

    /// Requests received by `stream`, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn next_step(&self) -> Step {
        let next = self.steps.lock().ok().and_then(|mut s| s.pop_front());
        next.or_else(|| self.repeat.clone())
            .unwrap_or(Step::FailToStart("script exhausted".into()))
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn stream(&self, request: ModelRequest) -> Result<ChunkStream, LlmError> {
        if let Ok(mut seen) = self.requests.lock() {
            seen.push(request);
        }
        let items: Vec<Result<ProviderChunk, LlmError>> = match self.next_step() {
            Step::Chunks(chunks) => chunks.into_iter().map(Ok).collect(),
            Step::FailAfter(chunks, message) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(LlmError::Decode(message))))
                .collect(),
            Step::FailToStart(message) => return Err(LlmError::Decode(message)),
        };
        Ok(Box::pin(futures_util::stream::iter(items)))
    }

    async fn complete(&self, _request: ModelRequest) -> Result<String, LlmError> {
        self.completion
            .clone()
            .ok_or_else(|| LlmError::Decode("no completion scripted".into()))
    }
}
