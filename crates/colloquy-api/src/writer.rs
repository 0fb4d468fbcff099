//! Maps adapter events onto the UI message stream protocol.
//!
//! The writer owns the block bookkeeping the protocol needs (step boundaries,
//! text and reasoning block ids) and guarantees exactly one terminal chunk.

use colloquy_types::events::{StreamEvent, UiChunk};

/// Text shown to the client when generation fails. Details stay in the logs.
pub const GENERIC_STREAM_ERROR: &str = "An error occurred while generating the response.";

/// SSE payload that closes the stream after the terminal chunk.
pub const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug)]
pub struct StreamWriter {
    message_id: String,
    started: bool,
    step_open: bool,
    /// Set after a tool result; the next non-result event opens a new step.
    after_results: bool,
    text_block: Option<String>,
    reasoning_block: Option<String>,
    blocks: u32,
    finished: bool,
}

impl StreamWriter {
    pub fn new(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            started: false,
            step_open: false,
            after_results: false,
            text_block: None,
            reasoning_block: None,
            blocks: 0,
            finished: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Chunks for one event. Empty once a terminal chunk has been written.
    pub fn write(&mut self, event: &StreamEvent) -> Vec<UiChunk> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.ensure_started(&mut out);

        match event {
            StreamEvent::TextDelta(delta) => {
                self.ensure_step(&mut out);
                self.close_reasoning(&mut out);
                let id = match &self.text_block {
                    Some(id) => id.clone(),
                    None => {
                        let id = self.next_block_id();
                        out.push(UiChunk::TextStart { id: id.clone() });
                        self.text_block = Some(id.clone());
                        id
                    }
                };
                out.push(UiChunk::TextDelta {
                    id,
                    delta: delta.clone(),
                });
            }
            StreamEvent::ReasoningDelta(delta) => {
                self.ensure_step(&mut out);
                self.close_text(&mut out);
                let id = match &self.reasoning_block {
                    Some(id) => id.clone(),
                    None => {
                        let id = self.next_block_id();
                        out.push(UiChunk::ReasoningStart { id: id.clone() });
                        self.reasoning_block = Some(id.clone());
                        id
                    }
                };
                out.push(UiChunk::ReasoningDelta {
                    id,
                    delta: delta.clone(),
                });
            }
            StreamEvent::ToolCallStart {
                call_id,
                tool_name,
                input,
            } => {
                self.ensure_step(&mut out);
                self.close_blocks(&mut out);
                out.push(UiChunk::ToolInputAvailable {
                    tool_call_id: call_id.clone(),
                    tool_name: tool_name.clone(),
                    input: input.clone(),
                });
            }
            StreamEvent::ToolCallResult { call_id, output, .. } => {
                if !self.step_open {
                    self.open_step(&mut out);
                }
                out.push(UiChunk::ToolOutputAvailable {
                    tool_call_id: call_id.clone(),
                    output: output.clone(),
                });
                self.after_results = true;
            }
            StreamEvent::Error(_) => {
                self.close_blocks(&mut out);
                self.finished = true;
                out.push(UiChunk::Error {
                    error_text: GENERIC_STREAM_ERROR.to_string(),
                });
            }
            StreamEvent::Done(reason) => {
                self.close_blocks(&mut out);
                if self.step_open {
                    out.push(UiChunk::FinishStep);
                    self.step_open = false;
                }
                self.finished = true;
                out.push(UiChunk::Finish {
                    finish_reason: *reason,
                });
            }
        }
        out
    }

    /// Terminate a stream whose producer vanished without a terminal event.
    pub fn abort(&mut self) -> Vec<UiChunk> {
        self.write(&StreamEvent::Error(GENERIC_STREAM_ERROR.to_string()))
    }

    fn ensure_started(&mut self, out: &mut Vec<UiChunk>) {
        if !self.started {
            self.started = true;
            out.push(UiChunk::Start {
                message_id: self.message_id.clone(),
            });
        }
    }

    fn ensure_step(&mut self, out: &mut Vec<UiChunk>) {
        if self.after_results {
            self.after_results = false;
            self.close_blocks(out);
            if self.step_open {
                out.push(UiChunk::FinishStep);
                self.step_open = false;
            }
        }
        if !self.step_open {
            self.open_step(out);
        }
    }

    fn open_step(&mut self, out: &mut Vec<UiChunk>) {
        out.push(UiChunk::StartStep);
        self.step_open = true;
    }

    fn close_text(&mut self, out: &mut Vec<UiChunk>) {
        if let Some(id) = self.text_block.take() {
            out.push(UiChunk::TextEnd { id });
        }
    }

    fn close_reasoning(&mut self, out: &mut Vec<UiChunk>) {
        if let Some(id) = self.reasoning_block.take() {
            out.push(UiChunk::ReasoningEnd { id });
        }
    }

    fn close_blocks(&mut self, out: &mut Vec<UiChunk>) {
        self.close_reasoning(out);
        self.close_text(out);
    }

    fn next_block_id(&mut self) -> String {
        self.blocks += 1;
        format!("{}-{}", self.message_id, self.blocks)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use colloquy_types::events::FinishReason;

    use super::*;

    fn types(chunks: &[UiChunk]) -> Vec<String> {
        chunks
            .iter()
            .map(|c| serde_json::to_value(c).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }

    fn run(events: &[StreamEvent]) -> Vec<UiChunk> {
        let mut writer = StreamWriter::new("msg");
        events.iter().flat_map(|e| writer.write(e)).collect()
    }

    #[test]
    fn text_turn_has_one_step_and_one_block() {
        let chunks = run(&[
            StreamEvent::TextDelta("Hi ".into()),
            StreamEvent::TextDelta("there".into()),
            StreamEvent::Done(FinishReason::Stop),
        ]);
        assert_eq!(
            types(&chunks),
            [
                "start",
                "start-step",
                "text-start",
                "text-delta",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
        assert_eq!(chunks[0], UiChunk::Start { message_id: "msg".into() });
    }

    #[test]
    fn tool_round_splits_steps() {
        let chunks = run(&[
            StreamEvent::ToolCallStart {
                call_id: "c1".into(),
                tool_name: "getInformation".into(),
                input: json!({}),
            },
            StreamEvent::ToolCallStart {
                call_id: "c2".into(),
                tool_name: "getInformation".into(),
                input: json!({}),
            },
            StreamEvent::ToolCallResult {
                call_id: "c1".into(),
                tool_name: "getInformation".into(),
                output: json!([]),
            },
            StreamEvent::ToolCallResult {
                call_id: "c2".into(),
                tool_name: "getInformation".into(),
                output: json!([]),
            },
            StreamEvent::TextDelta("Nothing found.".into()),
            StreamEvent::Done(FinishReason::Stop),
        ]);
        assert_eq!(
            types(&chunks),
            [
                "start",
                "start-step",
                "tool-input-available",
                "tool-input-available",
                "tool-output-available",
                "tool-output-available",
                "finish-step",
                "start-step",
                "text-start",
                "text-delta",
                "text-end",
                "finish-step",
                "finish"
            ]
        );
    }

    #[test]
    fn error_masks_details_and_is_final() {
        let mut writer = StreamWriter::new("msg");
        let mut chunks = writer.write(&StreamEvent::TextDelta("par".into()));
        chunks.extend(writer.write(&StreamEvent::Error("upstream 500: secret".into())));
        chunks.extend(writer.write(&StreamEvent::Done(FinishReason::Stop)));
        chunks.extend(writer.abort());

        assert_eq!(chunks.iter().filter(|c| c.is_terminal()).count(), 1);
        let last = chunks.last().unwrap();
        assert_eq!(
            *last,
            UiChunk::Error {
                error_text: GENERIC_STREAM_ERROR.into()
            }
        );
        assert!(writer.is_finished());
    }

    #[test]
    fn reasoning_closes_before_text() {
        let chunks = run(&[
            StreamEvent::ReasoningDelta("hmm".into()),
            StreamEvent::TextDelta("Yes.".into()),
            StreamEvent::Done(FinishReason::Stop),
        ]);
        assert_eq!(
            types(&chunks)[2..6],
            ["reasoning-start", "reasoning-delta", "reasoning-end", "text-start"]
        );
    }
}
