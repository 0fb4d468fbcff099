//! Chat persistence.
//!
//! [`ChatStore`] is the seam the orchestrator talks to; [`SqliteStore`] backs it
//! with `colloquy-db`, running every call on the blocking pool. [`TurnLedger`]
//! wraps the store with the two write phases of a turn: the user turn is
//! committed strictly before generation, the assistant turn best-effort after.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use colloquy_db::Database;
use colloquy_db::models::{ChatRow, MessageRow, StreamRow};
use colloquy_types::models::{Chat, Message, Role, StreamRecord, Visibility, generate_id};

use crate::error::ChatError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, StoreError>;
    async fn create_chat(&self, chat: &Chat) -> Result<(), StoreError>;
    /// Remove a chat with all of its messages and stream records.
    async fn delete_chat(&self, id: &str) -> Result<Chat, StoreError>;
    /// Messages of a chat in creation order.
    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, StoreError>;
    /// Append a batch atomically: all messages land or none do.
    async fn append_messages(&self, batch: &[Message]) -> Result<(), StoreError>;
    /// User-role messages across all chats owned by `user_id`, created at or after `since`.
    async fn count_user_messages(&self, user_id: &str, since: DateTime<Utc>) -> Result<u64, StoreError>;
    async fn create_stream_record(&self, stream_id: &str, chat_id: &str) -> Result<StreamRecord, StoreError>;
    /// Stream records of a chat, oldest first.
    async fn list_stream_records(&self, chat_id: &str) -> Result<Vec<StreamRecord>, StoreError>;
}

// ── SQLite ──────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(db) }
    }

    /// Run a blocking DB call off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                StoreError::Unavailable(anyhow!(e))
            })?
            .map_err(StoreError::Unavailable)
    }
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()))
        .unwrap_or_else(|e| {
            warn!("Failed to parse timestamp '{}': {}", s, e);
            DateTime::default()
        })
}

fn chat_from_row(row: ChatRow) -> Chat {
    let visibility = Visibility::parse(&row.visibility).unwrap_or_else(|| {
        warn!(chat_id = %row.id, "unknown visibility '{}', treating as private", row.visibility);
        Visibility::Private
    });
    Chat {
        created_at: parse_timestamp(&row.created_at),
        id: row.id,
        user_id: row.user_id,
        title: row.title,
        visibility,
    }
}

fn message_to_row(m: &Message) -> anyhow::Result<MessageRow> {
    Ok(MessageRow {
        id: m.id.clone(),
        chat_id: m.chat_id.clone(),
        role: m.role.as_str().to_string(),
        parts: serde_json::to_string(&m.parts)?,
        attachments: serde_json::to_string(&m.attachments)?,
        created_at: timestamp(&m.created_at),
    })
}

/// `None` for rows that no longer decode; they are skipped with a warning.
fn message_from_row(row: MessageRow) -> Option<Message> {
    let Some(role) = Role::parse(&row.role) else {
        warn!(message_id = %row.id, "skipping message with unknown role '{}'", row.role);
        return None;
    };
    let parts = match serde_json::from_str(&row.parts) {
        Ok(p) => p,
        Err(e) => {
            warn!(message_id = %row.id, error = %e, "skipping message with undecodable parts");
            return None;
        }
    };
    let attachments = serde_json::from_str(&row.attachments).unwrap_or_else(|e| {
        warn!(message_id = %row.id, error = %e, "ignoring undecodable attachments");
        Vec::new()
    });
    Some(Message {
        created_at: parse_timestamp(&row.created_at),
        id: row.id,
        chat_id: row.chat_id,
        role,
        parts,
        attachments,
    })
}

fn stream_from_row(row: StreamRow) -> StreamRecord {
    StreamRecord {
        created_at: parse_timestamp(&row.created_at),
        id: row.id,
        chat_id: row.chat_id,
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn get_chat(&self, id: &str) -> Result<Option<Chat>, StoreError> {
        let id = id.to_string();
        let row = self.blocking(move |db| db.get_chat(&id)).await?;
        Ok(row.map(chat_from_row))
    }

    async fn create_chat(&self, chat: &Chat) -> Result<(), StoreError> {
        let row = ChatRow {
            id: chat.id.clone(),
            user_id: chat.user_id.clone(),
            title: chat.title.clone(),
            visibility: chat.visibility.as_str().to_string(),
            created_at: timestamp(&chat.created_at),
        };
        self.blocking(move |db| db.insert_chat(&row)).await
    }

    async fn delete_chat(&self, id: &str) -> Result<Chat, StoreError> {
        let id = id.to_string();
        self.blocking(move |db| db.delete_chat(&id))
            .await?
            .map(chat_from_row)
            .ok_or(StoreError::NotFound)
    }

    async fn list_messages(&self, chat_id: &str) -> Result<Vec<Message>, StoreError> {
        let chat_id = chat_id.to_string();
        let rows = self.blocking(move |db| db.get_messages(&chat_id)).await?;
        Ok(rows.into_iter().filter_map(message_from_row).collect())
    }

    async fn append_messages(&self, batch: &[Message]) -> Result<(), StoreError> {
        let rows = batch.iter().map(message_to_row).collect::<anyhow::Result<Vec<_>>>()?;
        self.blocking(move |db| db.insert_messages(&rows)).await
    }

    async fn count_user_messages(&self, user_id: &str, since: DateTime<Utc>) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        let since = timestamp(&since);
        self.blocking(move |db| db.count_user_messages(&user_id, &since)).await
    }

    async fn create_stream_record(&self, stream_id: &str, chat_id: &str) -> Result<StreamRecord, StoreError> {
        let record = StreamRecord {
            id: stream_id.to_string(),
            chat_id: chat_id.to_string(),
            created_at: Utc::now(),
        };
        let row = StreamRow {
            id: record.id.clone(),
            chat_id: record.chat_id.clone(),
            created_at: timestamp(&record.created_at),
        };
        self.blocking(move |db| db.insert_stream(&row)).await?;
        Ok(record)
    }

    async fn list_stream_records(&self, chat_id: &str) -> Result<Vec<StreamRecord>, StoreError> {
        let chat_id = chat_id.to_string();
        let rows = self.blocking(move |db| db.get_streams(&chat_id)).await?;
        Ok(rows.into_iter().map(stream_from_row).collect())
    }
}

// ── Turn ledger ─────────────────────────────────────────────────────────

/// Outcome of the post-generation write. A dropped assistant turn has already
/// been streamed to the client, so it is reported rather than raised.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostWrite {
    Saved,
    Dropped,
}

#[derive(Clone)]
pub struct TurnLedger {
    store: Arc<dyn ChatStore>,
    chat_id: String,
}

impl TurnLedger {
    pub fn new(store: Arc<dyn ChatStore>, chat_id: &str) -> Self {
        Self {
            store,
            chat_id: chat_id.to_string(),
        }
    }

    /// Persist the user message and register a fresh stream for the turn.
    /// Any failure aborts the turn before generation starts.
    pub async fn commit_user_turn(&self, message: &Message) -> Result<StreamRecord, ChatError> {
        self.store.append_messages(std::slice::from_ref(message)).await?;
        let stream_id = generate_id();
        let record = self.store.create_stream_record(&stream_id, &self.chat_id).await?;
        info!(chat_id = %self.chat_id, message_id = %message.id, stream_id = %record.id, "user turn committed");
        Ok(record)
    }

    /// Persist the finished assistant message. Failures are logged, never raised.
    pub async fn record_assistant_turn(&self, message: Message) -> PostWrite {
        match self.store.append_messages(std::slice::from_ref(&message)).await {
            Ok(()) => {
                info!(chat_id = %self.chat_id, message_id = %message.id, "assistant turn saved");
                PostWrite::Saved
            }
            Err(e) => {
                error!(
                    chat_id = %self.chat_id,
                    message_id = %message.id,
                    error = %e,
                    "failed to save assistant turn; the client already received it"
                );
                PostWrite::Dropped
            }
        }
    }
}
