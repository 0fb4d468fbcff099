//! Row types as stored in SQLite. Timestamps are RFC 3339 strings, structured
//! message content is JSON text.

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub visibility: String,
    pub created_at: String,
}

/// `parts` and `attachments` hold JSON arrays.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub parts: String,
    pub attachments: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct StreamRow {
    pub id: String,
    pub chat_id: String,
    pub created_at: String,
}
