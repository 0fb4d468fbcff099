use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (chats, messages, streams)");
        conn.execute_batch(
            "
            CREATE TABLE chats (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                title       TEXT NOT NULL,
                visibility  TEXT NOT NULL DEFAULT 'private',
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_chats_user ON chats(user_id, created_at);

            CREATE TABLE messages (
                id           TEXT PRIMARY KEY,
                chat_id      TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role         TEXT NOT NULL,
                parts        TEXT NOT NULL,
                attachments  TEXT NOT NULL DEFAULT '[]',
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);

            -- Stream records point at a chat by id only.
            CREATE TABLE streams (
                id          TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_streams_chat ON streams(chat_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
