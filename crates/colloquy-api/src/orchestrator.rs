//! Turn orchestration.
//!
//! A submitted turn walks through [`TurnPhase`]s: it is validated, the caller
//! is authorized and checked against the daily quota, the conversation is
//! loaded (or created), the user message is committed, and only then does
//! generation start on its own task. The task publishes into the
//! [`StreamHub`] whether or not anyone is reading, and saves the assistant
//! message once the model finishes.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures_util::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use colloquy_llm::{ModelAdapter, ToolSet, TurnRequest};
use colloquy_llm::title::TitleGenerator;
use colloquy_types::api::{ChatModel, ChatResponse, Claims, CompletionRequest, PostRequestBody};
use colloquy_types::events::{FinishReason, StreamEvent, UiChunk};
use colloquy_types::models::{Chat, Message, Part, Role, ToolInvocation, Visibility, generate_id};

use crate::attachments::normalize_history;
use crate::entitlements::Entitlements;
use crate::error::ChatError;
use crate::hub::{FrameStream, StreamHub, StreamPublisher};
use crate::store::{ChatStore, PostWrite, TurnLedger};
use crate::validation::{validate_chat_id, validate_completion, validate_turn};
use crate::writer::{DONE_SENTINEL, StreamWriter};

pub const SYSTEM_PROMPT: &str = "You are a helpful research agent acting as a user's personal assistant. \
Check your knowledge base before answering any questions. \
Only respond to questions using information from tool calls. \
If no relevant information is found in the tool calls, respond, \"Sorry, I don't know.\"";

/// Stateless completions see at most this many trailing messages.
pub const COMPLETION_HISTORY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Validating,
    Authorizing,
    ResumingHistory,
    PersistingUserTurn,
    StreamingModel,
    PersistingAssistantTurn,
    Done,
    Failed,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Authorizing => "authorizing",
            Self::ResumingHistory => "resuming-history",
            Self::PersistingUserTurn => "persisting-user-turn",
            Self::StreamingModel => "streaming-model",
            Self::PersistingAssistantTurn => "persisting-assistant-turn",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub system_prompt: String,
    pub max_steps: usize,
    /// Tools offered on chat turns. Stateless completions get the whole set.
    pub enabled_tools: Vec<String>,
    pub visibility: Visibility,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            system_prompt: SYSTEM_PROMPT.to_string(),
            max_steps: 5,
            enabled_tools: vec!["getInformation".to_string()],
            visibility: Visibility::Public,
        }
    }
}

/// How a generation task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// `Done` or `Failed`.
    pub phase: TurnPhase,
    pub finish_reason: Option<FinishReason>,
    /// `None` when nothing was to be saved.
    pub assistant: Option<PostWrite>,
}

/// A turn whose generation is underway.
pub struct StartedTurn {
    pub stream_id: String,
    /// Reader attached at offset 0 before generation began.
    pub frames: FrameStream,
    pub task: JoinHandle<TurnOutcome>,
}

pub struct TurnOrchestrator {
    store: Arc<dyn ChatStore>,
    adapter: ModelAdapter,
    titles: TitleGenerator,
    tools: ToolSet,
    entitlements: Entitlements,
    hub: StreamHub,
    settings: TurnSettings,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<dyn ChatStore>,
        adapter: ModelAdapter,
        titles: TitleGenerator,
        tools: ToolSet,
        entitlements: Entitlements,
        hub: StreamHub,
        settings: TurnSettings,
    ) -> Self {
        Self {
            store,
            adapter,
            titles,
            tools,
            entitlements,
            hub,
            settings,
        }
    }

    pub fn hub(&self) -> &StreamHub {
        &self.hub
    }

    /// Run a chat turn up to the start of generation.
    pub async fn submit(&self, identity: Option<&Claims>, body: PostRequestBody) -> Result<StartedTurn, ChatError> {
        let chat_id = body.id.clone();
        let mut phase = TurnPhase::Validating;
        match self.prepare(identity, body, &mut phase).await {
            Ok(turn) => Ok(turn),
            Err(e) => {
                warn!(chat_id = %chat_id, phase = %phase, code = e.code(), error = %e, "turn failed");
                Err(e)
            }
        }
    }

    async fn prepare(
        &self,
        identity: Option<&Claims>,
        body: PostRequestBody,
        phase: &mut TurnPhase,
    ) -> Result<StartedTurn, ChatError> {
        let turn = validate_turn(body)?;

        *phase = TurnPhase::Authorizing;
        let claims = identity.ok_or(ChatError::Unauthorized)?;
        self.entitlements
            .check(self.store.as_ref(), &claims.sub, claims.tier)
            .await?;

        *phase = TurnPhase::ResumingHistory;
        match self.store.get_chat(&turn.chat_id).await? {
            Some(chat) if chat.user_id != claims.sub => return Err(ChatError::Forbidden),
            Some(_) => {}
            None => {
                let title = self.titles.generate(&turn.message.text()).await;
                let chat = Chat {
                    id: turn.chat_id.clone(),
                    user_id: claims.sub.clone(),
                    title,
                    visibility: self.settings.visibility,
                    created_at: Utc::now(),
                };
                self.store.create_chat(&chat).await?;
                info!(chat_id = %chat.id, title = %chat.title, "chat created");
            }
        }
        let mut history = self.store.list_messages(&turn.chat_id).await?;
        history.push(turn.message.clone());
        let history = normalize_history(history);

        *phase = TurnPhase::PersistingUserTurn;
        let ledger = TurnLedger::new(self.store.clone(), &turn.chat_id);
        let record = ledger.commit_user_turn(&turn.message).await?;

        *phase = TurnPhase::StreamingModel;
        let request = TurnRequest {
            system: self.settings.system_prompt.clone(),
            history,
            tools: self.tools.select(&self.settings.enabled_tools),
            max_steps: self.settings.max_steps,
            extract_reasoning: turn.model == ChatModel::Reasoning,
        };
        self.launch(&record.id, request, Some(ledger), turn.chat_id).await
    }

    /// Answer a free-standing message list: no chat, no quota, nothing saved.
    pub async fn complete(&self, identity: Option<&Claims>, request: CompletionRequest) -> Result<StartedTurn, ChatError> {
        let history = validate_completion(&request.messages)?;
        identity.ok_or(ChatError::Unauthorized)?;

        let skip = history.len().saturating_sub(COMPLETION_HISTORY);
        let history = normalize_history(history.into_iter().skip(skip).collect());
        let request = TurnRequest {
            system: self.settings.system_prompt.clone(),
            history,
            tools: self.tools.clone(),
            max_steps: self.settings.max_steps,
            extract_reasoning: false,
        };
        self.launch(&generate_id(), request, None, String::new()).await
    }

    async fn launch(
        &self,
        stream_id: &str,
        request: TurnRequest,
        ledger: Option<TurnLedger>,
        chat_id: String,
    ) -> Result<StartedTurn, ChatError> {
        let publisher = self.hub.open(stream_id).await;
        let frames = self
            .hub
            .subscribe(stream_id, 0)
            .await
            .ok_or_else(|| ChatError::StoreUnavailable(anyhow::anyhow!("stream {stream_id} vanished on open")))?;
        let task = tokio::spawn(generate(self.adapter.clone(), request, publisher, ledger, chat_id));
        Ok(StartedTurn {
            stream_id: stream_id.to_string(),
            frames,
            task,
        })
    }

    /// Delete a chat owned by the caller.
    pub async fn delete_chat(&self, identity: Option<&Claims>, chat_id: &str) -> Result<Chat, ChatError> {
        validate_chat_id(chat_id)?;
        let claims = identity.ok_or(ChatError::Unauthorized)?;
        let chat = self.store.get_chat(chat_id).await?.ok_or(ChatError::NotFound)?;
        if chat.user_id != claims.sub {
            return Err(ChatError::Forbidden);
        }
        let deleted = self.store.delete_chat(chat_id).await?;
        info!(chat_id, "chat deleted");
        Ok(deleted)
    }

    pub async fn load_chat(&self, identity: Option<&Claims>, chat_id: &str) -> Result<ChatResponse, ChatError> {
        let chat = self.readable_chat(identity, chat_id).await?;
        let messages = self.store.list_messages(chat_id).await?;
        Ok(ChatResponse { chat, messages })
    }

    /// Re-attach to the chat's latest stream from `from`. `None` when there is
    /// no stream left to follow.
    pub async fn resume(
        &self,
        identity: Option<&Claims>,
        chat_id: &str,
        from: u64,
    ) -> Result<Option<FrameStream>, ChatError> {
        self.readable_chat(identity, chat_id).await?;
        let records = self.store.list_stream_records(chat_id).await?;
        let Some(latest) = records.last() else {
            return Ok(None);
        };
        Ok(self.hub.subscribe(&latest.id, from).await)
    }

    async fn readable_chat(&self, identity: Option<&Claims>, chat_id: &str) -> Result<Chat, ChatError> {
        validate_chat_id(chat_id)?;
        let chat = self.store.get_chat(chat_id).await?.ok_or(ChatError::NotFound)?;
        if chat.visibility == Visibility::Public {
            return Ok(chat);
        }
        let claims = identity.ok_or(ChatError::Unauthorized)?;
        if claims.sub != chat.user_id {
            return Err(ChatError::Forbidden);
        }
        Ok(chat)
    }
}

/// Drive the adapter to completion, publishing every frame, then save the
/// assistant message if the model finished.
async fn generate(
    adapter: ModelAdapter,
    request: TurnRequest,
    publisher: StreamPublisher,
    ledger: Option<TurnLedger>,
    chat_id: String,
) -> TurnOutcome {
    let stream_id = publisher.stream_id().to_string();
    let assistant_id = generate_id();
    let mut writer = StreamWriter::new(&assistant_id);
    let mut draft = AssistantDraft::default();
    let mut finish = None;
    info!(chat_id = %chat_id, stream_id = %stream_id, phase = %TurnPhase::StreamingModel, "generation started");

    let run = async {
        let mut events = Box::pin(adapter.stream_turn(request));
        while let Some(event) = events.next().await {
            draft.apply(&event);
            if let StreamEvent::Done(reason) = event {
                finish = Some(reason);
            }
            emit(&publisher, writer.write(&event));
        }
    };
    if AssertUnwindSafe(run).catch_unwind().await.is_err() {
        error!(chat_id = %chat_id, stream_id = %stream_id, phase = %TurnPhase::StreamingModel, "generation panicked");
    }

    if !writer.is_finished() {
        emit(&publisher, writer.abort());
    }
    publisher.publish(DONE_SENTINEL);
    publisher.close();

    let Some(reason) = finish else {
        warn!(chat_id = %chat_id, stream_id = %stream_id, phase = %TurnPhase::Failed, "turn ended with an error");
        return TurnOutcome {
            phase: TurnPhase::Failed,
            finish_reason: None,
            assistant: None,
        };
    };

    let assistant = match ledger {
        Some(ledger) if !draft.is_empty() => {
            info!(chat_id = %chat_id, phase = %TurnPhase::PersistingAssistantTurn, "saving assistant turn");
            let message = draft.into_message(assistant_id, &chat_id);
            Some(ledger.record_assistant_turn(message).await)
        }
        _ => None,
    };
    info!(chat_id = %chat_id, stream_id = %stream_id, phase = %TurnPhase::Done, ?reason, "turn complete");

    TurnOutcome {
        phase: TurnPhase::Done,
        finish_reason: Some(reason),
        assistant,
    }
}

fn emit(publisher: &StreamPublisher, chunks: Vec<UiChunk>) {
    for chunk in chunks {
        match serde_json::to_string(&chunk) {
            Ok(json) => {
                publisher.publish(json);
            }
            Err(e) => error!(stream_id = publisher.stream_id(), error = %e, "failed to encode stream chunk"),
        }
    }
}

/// Assistant message assembled from the events of one turn.
#[derive(Debug, Default)]
struct AssistantDraft {
    parts: Vec<Part>,
    pending_calls: HashMap<String, (String, Value)>,
}

impl AssistantDraft {
    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TextDelta(delta) => match self.parts.last_mut() {
                Some(Part::Text { text }) => text.push_str(delta),
                _ => self.parts.push(Part::Text { text: delta.clone() }),
            },
            StreamEvent::ReasoningDelta(delta) => match self.parts.last_mut() {
                Some(Part::Reasoning { text }) => text.push_str(delta),
                _ => self.parts.push(Part::Reasoning { text: delta.clone() }),
            },
            StreamEvent::ToolCallStart {
                call_id,
                tool_name,
                input,
            } => {
                self.pending_calls
                    .insert(call_id.clone(), (tool_name.clone(), input.clone()));
            }
            StreamEvent::ToolCallResult {
                call_id,
                tool_name,
                output,
            } => {
                let (tool_name, input) = self
                    .pending_calls
                    .remove(call_id)
                    .unwrap_or_else(|| (tool_name.clone(), Value::Null));
                self.parts.push(Part::Tool(ToolInvocation {
                    tool_call_id: call_id.clone(),
                    tool_name,
                    input,
                    output: output.clone(),
                }));
            }
            StreamEvent::Error(_) | StreamEvent::Done(_) => {}
        }
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    fn into_message(self, id: String, chat_id: &str) -> Message {
        let mut message = Message {
            id,
            chat_id: chat_id.to_string(),
            role: Role::Assistant,
            parts: self.parts,
            attachments: vec![],
            created_at: Utc::now(),
        };
        message.attachments = message.file_parts();
        message
    }
}
