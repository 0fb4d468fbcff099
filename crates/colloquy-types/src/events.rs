use serde::{Deserialize, Serialize};

/// Why a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    /// The model still wanted tools when the step cap was reached.
    ToolCalls,
    Other,
}

/// Typed events produced by the model adapter for one turn, in generation order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    ReasoningDelta(String),
    ToolCallStart {
        call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolCallResult {
        call_id: String,
        tool_name: String,
        output: serde_json::Value,
    },
    /// Terminal. Already delivered text stays delivered.
    Error(String),
    /// Terminal.
    Done(FinishReason),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_) | Self::Done(_))
    }
}

/// One chunk of the UI message stream protocol, sent as an SSE `data:` line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum UiChunk {
    Start {
        message_id: String,
    },
    StartStep,
    TextStart {
        id: String,
    },
    TextDelta {
        id: String,
        delta: String,
    },
    TextEnd {
        id: String,
    },
    ReasoningStart {
        id: String,
    },
    ReasoningDelta {
        id: String,
        delta: String,
    },
    ReasoningEnd {
        id: String,
    },
    ToolInputAvailable {
        tool_call_id: String,
        tool_name: String,
        input: serde_json::Value,
    },
    ToolOutputAvailable {
        tool_call_id: String,
        output: serde_json::Value,
    },
    FinishStep,
    Finish {
        finish_reason: FinishReason,
    },
    Error {
        error_text: String,
    },
}

impl UiChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish { .. } | Self::Error { .. })
    }
}
