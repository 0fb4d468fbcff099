use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use tracing::{debug, error, info};

use colloquy_types::events::{FinishReason, StreamEvent};
use colloquy_types::models::Message;

use crate::convert::to_model_messages;
use crate::provider::{LanguageModel, ModelMessage, ModelRequest, ProviderChunk, ToolCallRequest};
use crate::reasoning::{ReasoningExtractor, Segment};
use crate::smooth::{Smoothing, WordSmoother};
use crate::tools::ToolSet;

/// Everything needed to generate one assistant turn.
pub struct TurnRequest {
    pub system: String,
    pub history: Vec<Message>,
    pub tools: ToolSet,
    /// Upper bound on model calls; each step after the first follows a tool round.
    pub max_steps: usize,
    /// Route `<think>` spans to reasoning events instead of text.
    pub extract_reasoning: bool,
}

/// Uniform streaming front for a [`LanguageModel`], running the tool loop.
#[derive(Clone)]
pub struct ModelAdapter {
    model: Arc<dyn LanguageModel>,
    smoothing: Smoothing,
}

impl ModelAdapter {
    pub fn new(model: Arc<dyn LanguageModel>, smoothing: Smoothing) -> Self {
        Self { model, smoothing }
    }

    pub fn model(&self) -> Arc<dyn LanguageModel> {
        self.model.clone()
    }

    /// Lazily generate the turn. The stream always ends with exactly one
    /// terminal event (`Done` or `Error`) and nothing after it.
    pub fn stream_turn(&self, request: TurnRequest) -> impl Stream<Item = StreamEvent> + Send + 'static {
        let model = self.model.clone();
        let delay = self.smoothing.delay;

        async_stream::stream! {
            let TurnRequest { system, history, tools, max_steps, extract_reasoning } = request;
            let mut messages = to_model_messages(&history);
            let specs = tools.specs();
            let max_steps = max_steps.max(1);

            for step in 1..=max_steps {
                let call = ModelRequest {
                    system: system.clone(),
                    messages: messages.clone(),
                    tools: specs.clone(),
                };
                let mut chunks = match model.stream(call).await {
                    Ok(s) => s,
                    Err(e) => {
                        error!(step, error = %e, "model stream failed to start");
                        yield StreamEvent::Error(e.to_string());
                        return;
                    }
                };

                let mut shaper = TextShaper::new(extract_reasoning);
                let mut calls: Vec<ToolCallRequest> = Vec::new();
                let mut reason = FinishReason::Other;

                while let Some(chunk) = chunks.next().await {
                    match chunk {
                        Ok(ProviderChunk::TextDelta(delta)) => {
                            for event in shaper.push(&delta) {
                                if matches!(event, StreamEvent::TextDelta(_)) && !delay.is_zero() {
                                    tokio::time::sleep(delay).await;
                                }
                                yield event;
                            }
                        }
                        Ok(ProviderChunk::ToolCall(c)) => calls.push(c),
                        Ok(ProviderChunk::Finish(r)) => reason = r,
                        Err(e) => {
                            for event in shaper.finish() {
                                yield event;
                            }
                            error!(step, error = %e, "model stream failed");
                            yield StreamEvent::Error(e.to_string());
                            return;
                        }
                    }
                }
                for event in shaper.finish() {
                    yield event;
                }

                if calls.is_empty() {
                    debug!(step, ?reason, "generation finished");
                    yield StreamEvent::Done(reason);
                    return;
                }

                messages.push(ModelMessage::Assistant {
                    text: shaper.visible_text(),
                    tool_calls: calls.clone(),
                });
                // All inputs of a step are announced before any result, so a
                // result followed by anything else marks the next step.
                for c in &calls {
                    yield StreamEvent::ToolCallStart {
                        call_id: c.id.clone(),
                        tool_name: c.name.clone(),
                        input: c.arguments.clone(),
                    };
                }
                for c in calls {
                    let output = tools.execute(&c.name, c.arguments).await;
                    messages.push(ModelMessage::Tool {
                        call_id: c.id.clone(),
                        content: output.to_string(),
                    });
                    yield StreamEvent::ToolCallResult {
                        call_id: c.id,
                        tool_name: c.name,
                        output,
                    };
                }
            }

            info!(max_steps, "tool step cap reached, ending turn");
            yield StreamEvent::Done(FinishReason::ToolCalls);
        }
    }
}

/// Per-step text pipeline: reasoning extraction, then word pacing.
struct TextShaper {
    smoother: WordSmoother,
    extractor: Option<ReasoningExtractor>,
    visible: String,
}

impl TextShaper {
    fn new(extract_reasoning: bool) -> Self {
        Self {
            smoother: WordSmoother::new(),
            extractor: extract_reasoning.then(ReasoningExtractor::new),
            visible: String::new(),
        }
    }

    fn push(&mut self, delta: &str) -> Vec<StreamEvent> {
        let segments = match &mut self.extractor {
            Some(x) => x.push(delta),
            None => vec![Segment::Text(delta.to_string())],
        };
        let mut out = Vec::new();
        for segment in segments {
            self.route(segment, &mut out);
        }
        out
    }

    fn finish(&mut self) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        if let Some(segment) = self.extractor.as_mut().and_then(|x| x.finish()) {
            self.route(segment, &mut out);
        }
        if let Some(rest) = self.smoother.finish() {
            out.push(StreamEvent::TextDelta(rest));
        }
        out
    }

    fn route(&mut self, segment: Segment, out: &mut Vec<StreamEvent>) {
        match segment {
            Segment::Text(text) => {
                self.visible.push_str(&text);
                out.extend(self.smoother.push(&text).into_iter().map(StreamEvent::TextDelta));
            }
            Segment::Reasoning(text) => {
                // Text held by the smoother precedes this reasoning.
                if let Some(rest) = self.smoother.finish() {
                    out.push(StreamEvent::TextDelta(rest));
                }
                out.push(StreamEvent::ReasoningDelta(text));
            }
        }
    }

    fn visible_text(&self) -> Option<String> {
        (!self.visible.is_empty()).then(|| self.visible.clone())
    }
}
